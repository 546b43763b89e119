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

//! PAN-OS software image download, install and reboot

use super::{ResponseRule, StageResult, classify_response};
use crate::error::{PrepError, Result};
use crate::poller::{CommandStatus, JobStatus, PollSettings, poll_job};
use crate::progress::Reporter;
use crate::session::{CommandSession, DEFAULT_READ_TIMEOUT};
use crate::upgrade_path::{UpgradeMap, base_version_for};
use crate::version::Version;
use std::time::Duration;
use tracing::{debug, info};

const CHECK_COMMAND: &str = "request system software check";
const INFO_COMMAND: &str = "request system software info";
const JOBS_COMMAND: &str = "show jobs all";
const RESTART_COMMAND: &str = "request restart system";

const TRIGGER_READ_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(30);

const DOWNLOAD_RULES: &[ResponseRule] = &[
    (StageResult::AlreadyDone, &["already downloaded"]),
    (StageResult::JobStarted, &["download job enqueued", "started"]),
    (StageResult::Success, &["successfully"]),
    (StageResult::Failed, &["failed", "error"]),
];

const INSTALL_RULES: &[ResponseRule] = &[
    (StageResult::AlreadyDone, &["already installed"]),
    (StageResult::JobStarted, &["install job enqueued", "started"]),
    (StageResult::Success, &["successfully", "installed"]),
    (StageResult::Failed, &["failed", "error"]),
];

#[derive(Debug, Clone, Copy)]
pub struct SoftwareTimeouts {
    pub download: Duration,
    pub install: Duration,
}

impl Default for SoftwareTimeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(1800),
            install: Duration::from_secs(1200),
        }
    }
}

/// What happened when the restart was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    /// Both the request and the confirmation were answered
    Confirmed,
    /// The transport broke while rebooting, which is the normal case
    ConnectionDropped,
}

/// True when `version` appears in `line` as a whole token, so 11.2.1 never matches 11.2.10
fn has_version_token(line: &str, version: &str) -> bool {
    line.split_whitespace()
        .any(|token| token.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')')) == version)
}

/// Status of `request system software info` for `version`
pub fn classify_download_status(version: &str, status: &str) -> JobStatus {
    let downloaded = status.lines().any(|line| {
        let mut tokens = line.split_whitespace();
        tokens.next() == Some(version)
            && tokens.any(|t| t.eq_ignore_ascii_case("yes") || t.eq_ignore_ascii_case("downloaded"))
    });
    let lower = status.to_lowercase();

    if downloaded {
        JobStatus::Complete
    } else if lower.contains("downloading") {
        JobStatus::InProgress
    } else if lower.contains("failed") {
        JobStatus::Failed
    } else {
        JobStatus::Unknown
    }
}

/// Status of `show jobs all` for an install of `version`
pub fn classify_install_status(version: &str, status: &str) -> JobStatus {
    let installed = status
        .lines()
        .any(|line| line.to_lowercase().contains("installed") && has_version_token(line, version));
    let lower = status.to_lowercase();

    if installed {
        JobStatus::Complete
    } else if lower.contains("running") || lower.contains("pending") {
        JobStatus::InProgress
    } else if lower.contains("failed") {
        JobStatus::Failed
    } else {
        JobStatus::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareStage {
    reporter: Reporter,
    upgrade_map: UpgradeMap,
    timeouts: SoftwareTimeouts,
}

impl SoftwareStage {
    pub fn new(reporter: Reporter, upgrade_map: UpgradeMap, timeouts: SoftwareTimeouts) -> Self {
        Self {
            reporter,
            upgrade_map,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> SoftwareTimeouts {
        self.timeouts
    }

    /// Refresh the list of available images. Failures are only logged.
    pub async fn check_available(&self, session: &mut dyn CommandSession) -> Option<String> {
        self.reporter.status("Checking available software versions...");
        match session.send_command(CHECK_COMMAND, DEFAULT_READ_TIMEOUT).await {
            Ok(output) => Some(output),
            Err(e) => {
                debug!("Software check failed, continuing: {e}");
                None
            }
        }
    }

    /// Download `version`, fetching its train's base image first when it predates `version`
    pub async fn download(&self, session: &mut dyn CommandSession, version: &str) -> Result<()> {
        self.reporter.status(format!("Downloading PAN-OS {version}..."));

        let parsed = Version::parse(version)?;
        let base = base_version_for(&parsed, &self.upgrade_map);
        if Version::parse(&base)? < parsed {
            info!(version, base = %base, "Base image required before target image");
            self.download_version(session, &base, self.timeouts.download / 2)
                .await?;
        }

        self.download_version(session, version, self.timeouts.download)
            .await
    }

    /// Download exactly one image
    pub async fn download_version(
        &self,
        session: &mut dyn CommandSession,
        version: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.reporter.status(format!("Downloading version {version}..."));
        let command = format!("request system software download version {version}");
        let output = session.send_command(&command, TRIGGER_READ_TIMEOUT).await?;

        match classify_response(&output, DOWNLOAD_RULES) {
            StageResult::AlreadyDone => {
                self.reporter
                    .status(format!("Version {version} already downloaded"));
            }
            StageResult::JobStarted => {
                let mut source = CommandStatus::new(session, INFO_COMMAND, DEFAULT_READ_TIMEOUT);
                poll_job(
                    &format!("Downloading {version}"),
                    &mut source,
                    |status: &str| classify_download_status(version, status),
                    PollSettings::new(POLL_INTERVAL, timeout),
                    &self.reporter,
                )
                .await?;
                self.reporter
                    .status(format!("Version {version} download complete"));
            }
            StageResult::Success => {
                self.reporter.status(format!("Version {version} downloaded"));
            }
            StageResult::Failed => {
                return Err(PrepError::CommandRejected { command, output });
            }
            StageResult::Unrecognized => {
                info!(version, "Unrecognised download response, continuing");
            }
        }
        Ok(())
    }

    pub async fn install(&self, session: &mut dyn CommandSession, version: &str) -> Result<()> {
        self.reporter.status(format!("Installing PAN-OS {version}..."));
        let command = format!("request system software install version {version}");
        let output = session.send_command(&command, TRIGGER_READ_TIMEOUT).await?;

        match classify_response(&output, INSTALL_RULES) {
            StageResult::AlreadyDone => {
                self.reporter
                    .status(format!("Version {version} already installed"));
            }
            StageResult::JobStarted => {
                let mut source = CommandStatus::new(session, JOBS_COMMAND, DEFAULT_READ_TIMEOUT);
                // The management plane is busy while installing; status reads may fail
                poll_job(
                    &format!("Installing {version}"),
                    &mut source,
                    |status: &str| classify_install_status(version, status),
                    PollSettings::new(POLL_INTERVAL, self.timeouts.install)
                        .tolerating_fetch_errors(),
                    &self.reporter,
                )
                .await?;
                self.reporter
                    .status(format!("Version {version} installation complete"));
            }
            StageResult::Success => {
                self.reporter.status(format!("Version {version} installed"));
            }
            StageResult::Failed => {
                return Err(PrepError::CommandRejected { command, output });
            }
            StageResult::Unrecognized => {
                info!(version, "Unrecognised install response, continuing");
            }
        }
        Ok(())
    }

    /// Request a restart and confirm it. Losing the connection here is expected.
    pub async fn reboot(&self, session: &mut dyn CommandSession) -> RebootOutcome {
        self.reporter.status("Rebooting firewall...");

        let result = match session.send_command_timing(RESTART_COMMAND).await {
            Ok(_) => session.send_command_timing("y").await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => RebootOutcome::Confirmed,
            Err(e) => {
                debug!("Connection dropped during reboot: {e}");
                RebootOutcome::ConnectionDropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOFTWARE_INFO: &str = "\
Version     Size  Released on          Downloaded  Currently Installed
----------------------------------------------------------------------
11.2.4      512MB 2024/11/02 10:00:00  yes         no
11.2.3      510MB 2024/09/12 10:00:00  no          no
11.1.0      498MB 2023/11/01 10:00:00  no          yes
";

    #[test]
    fn test_download_complete_row() {
        assert_eq!(
            classify_download_status("11.2.4", SOFTWARE_INFO),
            JobStatus::Complete
        );
    }

    #[test]
    fn test_download_not_yet_listed_as_downloaded() {
        assert_eq!(
            classify_download_status("11.2.3", SOFTWARE_INFO),
            JobStatus::Unknown
        );
        assert_eq!(
            classify_download_status("11.2.3", "Downloading 11.2.3 ... 37%"),
            JobStatus::InProgress
        );
        assert_eq!(
            classify_download_status("11.2.3", "Download FAILED: checksum"),
            JobStatus::Failed
        );
    }

    #[test]
    fn test_install_status() {
        assert_eq!(
            classify_install_status("11.2.4", "12  SWInstall  FIN  OK  Installed 11.2.4"),
            JobStatus::Complete
        );
        assert_eq!(
            classify_install_status("11.2.4", "12  SWInstall  ACT  PENDING  0%"),
            JobStatus::InProgress
        );
        assert_eq!(
            classify_install_status("11.2.4", "12  SWInstall  FIN  FAILED"),
            JobStatus::Failed
        );
        // Another version's install does not count
        assert_eq!(
            classify_install_status("11.2.4", "9  SWInstall  FIN  OK  Installed 11.1.0"),
            JobStatus::Unknown
        );
    }

    #[test]
    fn test_download_row_needs_exact_version() {
        let info = "\
11.2.10     530MB 2025/03/02 10:00:00  yes         no
11.2.1      505MB 2024/06/12 10:00:00  no          no
";
        assert_eq!(
            classify_download_status("11.2.1", info),
            JobStatus::Unknown
        );
        assert_eq!(
            classify_download_status("11.2.10", info),
            JobStatus::Complete
        );
    }

    #[test]
    fn test_install_needs_exact_version() {
        assert_eq!(
            classify_install_status("11.2.1", "14  SWInstall  FIN  OK  Installed 11.2.10"),
            JobStatus::Unknown
        );
        assert_eq!(
            classify_install_status("11.2.1", "15  SWInstall  FIN  OK  Installed 11.2.1, reboot required"),
            JobStatus::Complete
        );
    }

    #[test]
    fn test_trigger_rules() {
        assert_eq!(
            classify_response("Download job enqueued with jobid 7", DOWNLOAD_RULES),
            StageResult::JobStarted
        );
        assert_eq!(
            classify_response("Image already downloaded", DOWNLOAD_RULES),
            StageResult::AlreadyDone
        );
        assert_eq!(
            classify_response("Server error: image not found", DOWNLOAD_RULES),
            StageResult::Failed
        );
        assert_eq!(
            classify_response("Software install job enqueued with jobid 8", INSTALL_RULES),
            StageResult::JobStarted
        );
    }
}
