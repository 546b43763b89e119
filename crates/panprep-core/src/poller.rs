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

//! Polling loop for asynchronous device jobs (downloads, installs)

use crate::error::{PrepError, Result};
use crate::progress::Reporter;
use crate::session::CommandSession;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").expect("valid regex"));

/// Classification of a single status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Complete,
    Failed,
    InProgress,
    /// Nothing recognisable; keep polling
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Log and keep polling when the status fetch itself errors
    pub tolerate_fetch_errors: bool,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            tolerate_fetch_errors: false,
        }
    }

    #[must_use]
    pub fn tolerating_fetch_errors(mut self) -> Self {
        self.tolerate_fetch_errors = true;
        self
    }
}

/// Where the poller gets its status text from
#[async_trait]
pub trait StatusSource: Send {
    async fn fetch_status(&mut self) -> Result<String>;
}

/// Status fetched by running a command on a live session
pub struct CommandStatus<'a> {
    session: &'a mut dyn CommandSession,
    command: &'a str,
    read_timeout: Duration,
}

impl<'a> CommandStatus<'a> {
    pub fn new(session: &'a mut dyn CommandSession, command: &'a str, read_timeout: Duration) -> Self {
        Self {
            session,
            command,
            read_timeout,
        }
    }
}

#[async_trait]
impl StatusSource for CommandStatus<'_> {
    async fn fetch_status(&mut self) -> Result<String> {
        self.session.send_command(self.command, self.read_timeout).await
    }
}

/// Last `NN%` figure in a status text, if any
pub fn extract_percent(status: &str) -> Option<u8> {
    PERCENT
        .captures_iter(status)
        .filter_map(|c| c.get(1)?.as_str().parse::<u8>().ok())
        .last()
}

/// Poll `source` until `classify` reports a terminal state or `settings.timeout` elapses.
///
/// Sleeps one interval before every fetch. `Failed` is never retried.
pub async fn poll_job<C>(
    job: &str,
    source: &mut dyn StatusSource,
    classify: C,
    settings: PollSettings,
    reporter: &Reporter,
) -> Result<String>
where
    C: Fn(&str) -> JobStatus + Send,
{
    let start = Instant::now();
    let mut polls: u32 = 0;

    while start.elapsed() < settings.timeout {
        tokio::time::sleep(settings.interval).await;
        polls += 1;

        let status = match source.fetch_status().await {
            Ok(status) => status,
            Err(e) if settings.tolerate_fetch_errors => {
                warn!(job, poll = polls, "Error checking job status: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        match classify(&status) {
            JobStatus::Complete => {
                debug!(job, polls, "Job complete");
                return Ok(status);
            }
            JobStatus::Failed => {
                return Err(PrepError::JobFailed {
                    job: job.to_owned(),
                    status: status.trim().to_owned(),
                });
            }
            JobStatus::InProgress => {
                if let Some(percent) = extract_percent(&status) {
                    reporter.status(format!("{job}: {percent}%"));
                } else {
                    reporter.status(format!("{job}..."));
                }
            }
            JobStatus::Unknown => {
                debug!(job, poll = polls, "Unrecognised job status, still waiting");
            }
        }
    }

    Err(PrepError::JobTimeout {
        job: job.to_owned(),
        timeout: settings.timeout,
    })
}
