// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PanPrep.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! License activation against the vendor license server

use super::{ResponseRule, StageResult, classify_response};
use crate::error::{PrepError, Result};
use crate::progress::Reporter;
use crate::session::{CommandSession, DEFAULT_READ_TIMEOUT};
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_COMMAND: &str = "request license fetch";
const INFO_COMMAND: &str = "request license info";

const FETCH_RULES: &[ResponseRule] = &[
    (StageResult::Success, &["successfully"]),
    (
        StageResult::Failed,
        &["failed", "unable to connect", "invalid auth code"],
    ),
];

const ACTIVE_LICENSE_MARKERS: &[&str] = &[
    "threat prevention",
    "pandb url filtering",
    "wildfire",
    "globalprotect",
    "valid",
];

/// Fixed-delay retry for license fetching
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LicenseStage {
    reporter: Reporter,
    fetch_timeout: Duration,
}

impl LicenseStage {
    pub fn new(reporter: Reporter, fetch_timeout: Duration) -> Self {
        Self {
            reporter,
            fetch_timeout,
        }
    }

    /// Fetch licenses once. Unrecognised output is accepted as-is.
    pub async fn fetch(&self, session: &mut dyn CommandSession) -> Result<String> {
        self.reporter
            .status("Fetching licenses from license server...");
        let output = session
            .send_command(FETCH_COMMAND, self.fetch_timeout)
            .await?;
        debug!("License fetch output: {output}");

        match classify_response(&output, FETCH_RULES) {
            StageResult::Success | StageResult::AlreadyDone => {
                self.reporter.status("Licenses fetched successfully");
                Ok(output)
            }
            StageResult::Failed => Err(fetch_failure(output)),
            StageResult::JobStarted | StageResult::Unrecognized => {
                self.reporter.status("License fetch completed");
                Ok(output)
            }
        }
    }

    pub async fn info(&self, session: &mut dyn CommandSession) -> Result<String> {
        self.reporter.status("Checking license status...");
        session.send_command(INFO_COMMAND, DEFAULT_READ_TIMEOUT).await
    }

    /// Whether `request license info` shows any active subscription
    pub async fn verify_active(&self, session: &mut dyn CommandSession) -> Result<bool> {
        let output = self.info(session).await?;
        Ok(licenses_look_active(&output))
    }

    /// Fetch with retries. Verification afterwards is advisory only.
    pub async fn fetch_with_retry(
        &self,
        session: &mut dyn CommandSession,
        policy: RetryPolicy,
    ) -> Result<()> {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.reporter
                .status(format!("License fetch attempt {attempt}/{attempts}..."));

            let outcome = match self.fetch(session).await {
                Ok(_) => self.verify_active(session).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(true) => {
                    self.reporter.status("Licenses verified as active");
                    return Ok(());
                }
                Ok(false) => {
                    self.reporter
                        .status("Warning: Could not verify license activation");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, "License fetch attempt failed: {e}");
                    last_error = Some(e);
                    if attempt < attempts {
                        self.reporter.status(format!(
                            "Retrying in {} seconds...",
                            policy.delay.as_secs()
                        ));
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }

        Err(PrepError::LicenseFetchExhausted {
            attempts,
            last_error: last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string()),
        })
    }
}

pub fn licenses_look_active(info: &str) -> bool {
    let lower = info.to_lowercase();
    ACTIVE_LICENSE_MARKERS.iter().any(|m| lower.contains(m))
}

fn fetch_failure(output: String) -> PrepError {
    let lower = output.to_lowercase();
    let output = if lower.contains("unable to connect") {
        "Unable to connect to license server. Check internet connectivity.".to_owned()
    } else if lower.contains("invalid auth code") {
        "Invalid auth code. Check firewall registration.".to_owned()
    } else {
        output
    };
    PrepError::CommandRejected {
        command: FETCH_COMMAND.to_owned(),
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_licenses_look_active() {
        assert!(licenses_look_active("Feature: Threat Prevention\nExpires: 2027"));
        assert!(licenses_look_active("License entry: WildFire License"));
        assert!(!licenses_look_active("No licenses installed"));
    }

    #[test]
    fn test_fetch_failure_hints() {
        let err = fetch_failure("Error: Unable to connect to server".to_owned());
        assert!(err.to_string().contains("Check internet connectivity"));

        let err = fetch_failure("Invalid Auth Code".to_owned());
        assert!(err.to_string().contains("registration"));

        let err = fetch_failure("Fetch failed: quota".to_owned());
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn test_fetch_rules() {
        assert_eq!(
            classify_response("VM Device License installed successfully", FETCH_RULES),
            StageResult::Success
        );
        assert_eq!(
            classify_response("Failed to fetch licenses", FETCH_RULES),
            StageResult::Failed
        );
        assert_eq!(
            classify_response("Nothing to do", FETCH_RULES),
            StageResult::Unrecognized
        );
    }
}
