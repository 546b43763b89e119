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

//! Multi-hop PAN-OS upgrade
//!
//! Each hop runs on its own session: check, download, install and reboot on
//! the first, then a fresh session after the device comes back to read and
//! verify the running version.

use crate::cancel::CancellationFlag;
use crate::error::{PrepError, Result};
use crate::progress::{NotificationKind, Reporter};
use crate::reachability::{ReachabilityProbe, ReachabilitySettings, wait_for_reachability};
use crate::remediation::{format_duration, suggest_remediation};
use crate::session::{CommandSession, ScopedSession, SessionFactory, SessionTarget};
use crate::stages::software::SoftwareTimeouts;
use crate::stages::{SoftwareStage, read_software_version};
use crate::upgrade_path::{UpgradeMap, plan_upgrade_path};
use crate::version::Version;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the orchestrator currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeState {
    Disconnected,
    Connected,
    VersionKnown,
    PathPlanned,
    Checking,
    Downloading,
    Installing,
    Rebooting,
    AwaitingReachability,
    Reconnected,
    Verified,
    Done,
    Failed,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::VersionKnown => "version known",
            Self::PathPlanned => "path planned",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Rebooting => "rebooting",
            Self::AwaitingReachability => "awaiting reachability",
            Self::Reconnected => "reconnected",
            Self::Verified => "verified",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Session creation and reachability probing, shared by all phases
#[derive(Clone)]
pub struct Connector {
    pub factory: Arc<dyn SessionFactory>,
    pub probe: Arc<dyn ReachabilityProbe>,
}

impl Connector {
    pub fn new(factory: Arc<dyn SessionFactory>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { factory, probe }
    }

    pub async fn open(&self, target: &SessionTarget) -> Result<ScopedSession> {
        ScopedSession::open(self.factory.as_ref(), target).await
    }

    pub async fn wait_until_reachable(
        &self,
        target: &SessionTarget,
        settings: ReachabilitySettings,
        reporter: &Reporter,
    ) -> bool {
        wait_for_reachability(
            target,
            settings,
            self.probe.as_ref(),
            self.factory.as_ref(),
            reporter,
        )
        .await
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub software: SoftwareTimeouts,
    /// Fixed wait after a reboot before the first probe
    pub settle_delay: Duration,
    pub reachability: ReachabilitySettings,
    pub upgrade_map: UpgradeMap,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        let settle_delay = Duration::from_secs(60);
        Self {
            software: SoftwareTimeouts::default(),
            settle_delay,
            reachability: ReachabilitySettings::new(
                Duration::from_secs(600).saturating_sub(settle_delay),
                Duration::from_secs(30),
            ),
            upgrade_map: UpgradeMap::default(),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeSummary {
    pub start_version: String,
    pub path: Vec<String>,
    /// Version reported after the last hop; the start version when nothing ran
    pub final_version: String,
}

/// Hop-local progress milestones
const CHECK_DONE: f32 = 5.0;
const DOWNLOAD_DONE: f32 = 40.0;
const INSTALL_DONE: f32 = 65.0;
const REBOOT_SENT: f32 = 70.0;
const ONLINE_AGAIN: f32 = 90.0;

#[derive(Debug)]
pub struct UpgradeOrchestrator {
    target: SessionTarget,
    connector: Connector,
    settings: UpgradeSettings,
    software: SoftwareStage,
    reporter: Reporter,
    state: UpgradeState,
}

impl UpgradeOrchestrator {
    pub fn new(
        target: SessionTarget,
        connector: Connector,
        settings: UpgradeSettings,
        reporter: Reporter,
    ) -> Self {
        let software = SoftwareStage::new(
            reporter.clone(),
            settings.upgrade_map.clone(),
            settings.software,
        );
        Self {
            target,
            connector,
            settings,
            software,
            reporter,
            state: UpgradeState::Disconnected,
        }
    }

    pub fn state(&self) -> UpgradeState {
        self.state
    }

    fn transition(&mut self, next: UpgradeState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, host = %self.target.host, "Upgrade state change");
            self.state = next;
        }
    }

    /// Upgrade the device to `target_version`, hop by hop.
    ///
    /// Whatever happens, no session is left open when this returns.
    pub async fn run(
        &mut self,
        target_version: &str,
        cancel: &CancellationFlag,
    ) -> Result<UpgradeSummary> {
        let started = Instant::now();
        let mut slot: Option<ScopedSession> = None;

        let result = self.drive(target_version, cancel, &mut slot).await;

        if let Some(mut session) = slot.take() {
            session.release().await;
        }

        match &result {
            Ok(summary) => {
                self.transition(UpgradeState::Done);
                info!(
                    host = %self.target.host,
                    hops = summary.path.len(),
                    elapsed = %format_duration(started.elapsed()),
                    "Upgrade finished"
                );
            }
            Err(e) => {
                self.transition(UpgradeState::Failed);
                error!(host = %self.target.host, "Upgrade failed: {e}");
            }
        }
        result
    }

    async fn drive(
        &mut self,
        target_version: &str,
        cancel: &CancellationFlag,
        slot: &mut Option<ScopedSession>,
    ) -> Result<UpgradeSummary> {
        self.reporter
            .status(format!("Connecting to {}...", self.target.host));
        *slot = Some(self.connector.open(&self.target).await?);
        self.transition(UpgradeState::Connected);

        let current = read_software_version(live(slot)?).await?;
        Version::parse(&current)?;
        self.reporter
            .status(format!("Current PAN-OS version: {current}"));
        self.transition(UpgradeState::VersionKnown);

        let path = plan_upgrade_path(&current, target_version, &self.settings.upgrade_map)?;
        self.transition(UpgradeState::PathPlanned);

        if path.is_empty() {
            self.reporter.status(format!(
                "Already at version {current}, no upgrade needed"
            ));
            self.reporter.progress(100.0);
            return Ok(UpgradeSummary {
                start_version: current.clone(),
                path,
                final_version: current,
            });
        }

        self.reporter.status(format!(
            "Upgrade path: {current} -> {}",
            path.join(" -> ")
        ));

        let mut running = current.clone();
        for (index, hop) in path.iter().enumerate() {
            if cancel.is_cancelled() {
                self.reporter.status("Upgrade cancelled");
                return Err(PrepError::Cancelled);
            }
            self.reporter.status(format!(
                "Upgrading to {hop} (step {} of {})...",
                index + 1,
                path.len()
            ));
            running = self.upgrade_hop(hop, index, path.len(), slot).await?;
        }

        self.reporter
            .status(format!("Upgrade to {target_version} complete!"));
        self.reporter.progress(100.0);

        Ok(UpgradeSummary {
            start_version: current,
            path,
            final_version: running,
        })
    }

    /// One hop on the live session in `slot`; returns the version running afterwards
    async fn upgrade_hop(
        &mut self,
        hop: &str,
        index: usize,
        hop_count: usize,
        slot: &mut Option<ScopedSession>,
    ) -> Result<String> {
        self.transition(UpgradeState::Checking);
        self.software.check_available(live(slot)?).await;
        self.report_hop(index, hop_count, CHECK_DONE);

        self.transition(UpgradeState::Downloading);
        self.software.download(live(slot)?, hop).await?;
        self.report_hop(index, hop_count, DOWNLOAD_DONE);

        self.transition(UpgradeState::Installing);
        self.software.install(live(slot)?, hop).await?;
        self.report_hop(index, hop_count, INSTALL_DONE);

        self.transition(UpgradeState::Rebooting);
        let outcome = self.software.reboot(live(slot)?).await;
        debug!(?outcome, hop, "Reboot requested");
        if let Some(mut session) = slot.take() {
            session.release().await;
        }
        self.report_hop(index, hop_count, REBOOT_SENT);

        self.transition(UpgradeState::AwaitingReachability);
        self.reporter.status("Waiting for firewall to reboot...");
        tokio::time::sleep(self.settings.settle_delay).await;

        let online = self
            .connector
            .wait_until_reachable(&self.target, self.settings.reachability, &self.reporter)
            .await;
        if !online {
            self.reporter
                .status("Timeout waiting for firewall to come back online");
            return Err(PrepError::ReachabilityTimeout {
                host: self.target.host.clone(),
                hop: hop.to_owned(),
            });
        }
        self.reporter.status("Firewall is back online");
        self.report_hop(index, hop_count, ONLINE_AGAIN);

        *slot = Some(self.connector.open(&self.target).await?);
        self.transition(UpgradeState::Reconnected);

        let running = read_software_version(live(slot)?).await?;
        self.reporter
            .status(format!("Current PAN-OS version: {running}"));
        self.verify_hop(hop, &running);
        self.transition(UpgradeState::Verified);
        self.report_hop(index, hop_count, 100.0);

        Ok(running)
    }

    /// Any version other than the hop's is only worth a warning
    fn verify_hop(&self, hop: &str, running: &str) {
        let matches = match (Version::parse(hop), Version::parse(running)) {
            (Ok(expected), Ok(actual)) => expected == actual,
            _ => false,
        };
        if !matches {
            warn!(expected = hop, actual = running, "Unexpected version after upgrade");
            self.reporter.status(format!(
                "Warning: expected version {hop}, firewall reports {running}"
            ));
        }
    }

    #[expect(clippy::cast_precision_loss)]
    fn report_hop(&self, index: usize, hop_count: usize, hop_percent: f32) {
        let count = hop_count.max(1) as f32;
        let overall = (index as f32 + hop_percent / 100.0) / count * 100.0;
        self.reporter.progress(overall.clamp(0.0, 100.0));
    }
}

fn live(slot: &mut Option<ScopedSession>) -> Result<&mut dyn CommandSession> {
    slot.as_mut().ok_or(PrepError::NotConnected)?.session()
}

/// Run a full upgrade, notify the outcome and return it as a plain success flag
pub async fn upgrade_firewall(
    target: SessionTarget,
    target_version: &str,
    connector: Connector,
    settings: UpgradeSettings,
    reporter: Reporter,
    cancel: &CancellationFlag,
) -> bool {
    let host = target.host.clone();
    let mut orchestrator = UpgradeOrchestrator::new(target, connector, settings, reporter.clone());
    match orchestrator.run(target_version, cancel).await {
        Ok(summary) => {
            reporter.notify(
                NotificationKind::Success,
                "Upgrade Complete",
                &format!(
                    "Firewall {host} upgraded successfully!\n\nPAN-OS Version: {}",
                    summary.final_version
                ),
            );
            true
        }
        Err(e) => {
            let text = e.to_string();
            reporter.notify(
                NotificationKind::Error,
                "Upgrade Failed",
                &format!("{text}\n\nSuggestion: {}", suggest_remediation(&text)),
            );
            false
        }
    }
}
