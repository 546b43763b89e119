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

//! Content (apps & threats) database update

use super::{ResponseRule, StageResult, classify_response};
use crate::error::{PrepError, Result};
use crate::poller::{CommandStatus, JobStatus, PollSettings, poll_job};
use crate::progress::Reporter;
use crate::session::{CommandSession, DEFAULT_READ_TIMEOUT};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const CHECK_COMMAND: &str = "request content upgrade check";
const DOWNLOAD_COMMAND: &str = "request content upgrade download latest";
const INSTALL_COMMAND: &str = "request content upgrade install version latest";
const INFO_COMMAND: &str = "request content upgrade info";

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// A content row such as `8799-8509  ...  yes` marks a downloaded package
static DOWNLOADED_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+-\d+)\s+yes").expect("valid regex"));

const DOWNLOAD_RULES: &[ResponseRule] = &[
    (StageResult::JobStarted, &["download job enqueued"]),
    (StageResult::AlreadyDone, &["already downloaded"]),
    (StageResult::Success, &["download succeeded", "successfully"]),
    (StageResult::Failed, &["failed"]),
];

const INSTALL_RULES: &[ResponseRule] = &[
    (StageResult::JobStarted, &["install job enqueued"]),
    (StageResult::AlreadyDone, &["already installed"]),
    (StageResult::Success, &["successfully", "installed"]),
    (StageResult::Failed, &["failed"]),
];

#[derive(Debug, Clone, Copy)]
pub struct ContentTimeouts {
    pub download: Duration,
    pub install: Duration,
}

impl Default for ContentTimeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(600),
            install: Duration::from_secs(300),
        }
    }
}

/// Version of a downloaded content package listed in the info output
pub fn downloaded_content_version(status: &str) -> Option<String> {
    DOWNLOADED_ROW
        .captures(&status.to_lowercase())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

pub fn classify_download_status(status: &str) -> JobStatus {
    let lower = status.to_lowercase();
    if lower.contains("currently downloading") {
        JobStatus::InProgress
    } else if lower.contains("download") && lower.contains("complete") {
        JobStatus::Complete
    } else if lower.contains("failed") {
        JobStatus::Failed
    } else if downloaded_content_version(status).is_some() {
        JobStatus::Complete
    } else {
        JobStatus::Unknown
    }
}

pub fn classify_install_status(status: &str) -> JobStatus {
    let lower = status.to_lowercase();
    if lower.contains("currently installing") {
        JobStatus::InProgress
    } else if lower.contains("install") && lower.contains("complete") {
        JobStatus::Complete
    } else if lower.contains("failed") {
        JobStatus::Failed
    } else if lower.contains("version") && lower.contains("current") {
        JobStatus::Complete
    } else {
        JobStatus::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct ContentStage {
    reporter: Reporter,
    timeouts: ContentTimeouts,
}

impl ContentStage {
    pub fn new(reporter: Reporter, timeouts: ContentTimeouts) -> Self {
        Self { reporter, timeouts }
    }

    pub async fn check(&self, session: &mut dyn CommandSession) -> Result<String> {
        session.send_command(CHECK_COMMAND, DEFAULT_READ_TIMEOUT).await
    }

    pub async fn download_latest(&self, session: &mut dyn CommandSession) -> Result<String> {
        self.reporter.status("Downloading latest content update...");
        let output = session
            .send_command(DOWNLOAD_COMMAND, self.timeouts.download)
            .await?;
        debug!("Content download output: {output}");

        match classify_response(&output, DOWNLOAD_RULES) {
            StageResult::JobStarted => {
                self.reporter
                    .status("Content download job started, waiting for completion...");
                let mut source = CommandStatus::new(session, INFO_COMMAND, DEFAULT_READ_TIMEOUT);
                let status = poll_job(
                    "Content download",
                    &mut source,
                    classify_download_status,
                    PollSettings::new(POLL_INTERVAL, self.timeouts.download),
                    &self.reporter,
                )
                .await?;
                self.reporter.status("Content download completed");
                Ok(status)
            }
            StageResult::AlreadyDone => {
                self.reporter.status("Latest content already downloaded");
                Ok(output)
            }
            StageResult::Success => {
                self.reporter.status("Content download completed");
                Ok(output)
            }
            StageResult::Failed => Err(PrepError::CommandRejected {
                command: DOWNLOAD_COMMAND.to_owned(),
                output,
            }),
            StageResult::Unrecognized => Ok(output),
        }
    }

    pub async fn install_latest(&self, session: &mut dyn CommandSession) -> Result<String> {
        self.reporter.status("Installing content update...");
        let output = session
            .send_command(INSTALL_COMMAND, self.timeouts.install)
            .await?;
        debug!("Content install output: {output}");

        match classify_response(&output, INSTALL_RULES) {
            StageResult::JobStarted => {
                self.reporter
                    .status("Content install job started, waiting for completion...");
                let mut source = CommandStatus::new(session, INFO_COMMAND, DEFAULT_READ_TIMEOUT);
                let status = poll_job(
                    "Content install",
                    &mut source,
                    classify_install_status,
                    PollSettings::new(POLL_INTERVAL, self.timeouts.install),
                    &self.reporter,
                )
                .await?;
                self.reporter.status("Content installation completed");
                Ok(status)
            }
            StageResult::AlreadyDone => {
                self.reporter.status("Latest content already installed");
                Ok(output)
            }
            StageResult::Success => {
                self.reporter.status("Content installed successfully");
                Ok(output)
            }
            StageResult::Failed => Err(PrepError::CommandRejected {
                command: INSTALL_COMMAND.to_owned(),
                output,
            }),
            StageResult::Unrecognized => Ok(output),
        }
    }

    /// Download then install the latest content
    pub async fn update(&self, session: &mut dyn CommandSession) -> Result<()> {
        self.reporter.status("Starting content update...");
        self.download_latest(session).await?;
        self.install_latest(session).await?;
        self.reporter.status("Content update complete");
        Ok(())
    }
}
