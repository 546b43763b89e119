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

//! End-to-end provisioning of a factory-default firewall
//!
//! Four phases run in order: initial configuration on the factory address,
//! licensing and content update on the new address, then the PAN-OS upgrade.
//! Each phase owns one session and closes it before the next phase starts.

use crate::cancel::CancellationFlag;
use crate::config::PrepConfig;
use crate::error::{PrepError, Result};
use crate::progress::{
    ChannelSink, NotificationKind, PhaseSink, ProgressEvent, ProgressSink, Reporter,
};
use crate::reachability::ReachabilitySettings;
use crate::remediation::suggest_remediation;
use crate::session::{CommandSession, Credentials, SessionTarget};
use crate::stages::content::ContentTimeouts;
use crate::stages::{ContentStage, InitialConfigStage, LicenseStage, NetworkSettings, RetryPolicy};
use crate::upgrade::{Connector, UpgradeOrchestrator, UpgradeSettings};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    InitialConfig,
    Licensing,
    ContentUpdate,
    Upgrade,
}

impl SetupPhase {
    pub const ALL: [Self; 4] = [
        Self::InitialConfig,
        Self::Licensing,
        Self::ContentUpdate,
        Self::Upgrade,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::InitialConfig => 0,
            Self::Licensing => 1,
            Self::ContentUpdate => 2,
            Self::Upgrade => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::InitialConfig => "Phase 1: Initial Configuration",
            Self::Licensing => "Phase 2: Licensing",
            Self::ContentUpdate => "Phase 3: Content Update",
            Self::Upgrade => "Phase 4: PAN-OS Upgrade",
        }
    }

    pub fn failure_title(self) -> &'static str {
        match self {
            Self::InitialConfig => "Initial Configuration Failed",
            Self::Licensing => "Licensing Failed",
            Self::ContentUpdate => "Content Update Failed",
            Self::Upgrade => "PAN-OS Upgrade Failed",
        }
    }

    fn failure_lead(self) -> &'static str {
        match self {
            Self::InitialConfig => "Failed to configure firewall",
            Self::Licensing => "Failed to fetch licenses",
            Self::ContentUpdate => "Failed to update content",
            Self::Upgrade => "Failed to upgrade PAN-OS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Snapshot of a run, readable by the supervisor at any time
#[derive(Debug, Clone, Serialize)]
pub struct SetupRun {
    pub phase: Option<SetupPhase>,
    /// Overall progress, 0-100
    pub progress: f32,
    pub cancel_requested: bool,
    pub outcome: RunOutcome,
}

impl Default for SetupRun {
    fn default() -> Self {
        Self {
            phase: None,
            progress: 0.0,
            cancel_requested: false,
            outcome: RunOutcome::Running,
        }
    }
}

/// Everything a setup run needs to know
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Factory-default address and credentials
    pub factory_target: SessionTarget,
    pub network: NetworkSettings,
    pub new_password: String,
    pub target_version: String,
    pub commit_timeout: Duration,
    /// Wait for the new management address after the commit
    pub commit_reachability: ReachabilitySettings,
    pub license_fetch_timeout: Duration,
    pub license_retry: RetryPolicy,
    pub content: ContentTimeouts,
    pub upgrade: UpgradeSettings,
}

impl SetupConfig {
    /// The device as reachable after the initial configuration
    pub fn provisioned_target(&self) -> SessionTarget {
        SessionTarget::new(
            self.network.new_ip.clone(),
            Credentials::new(
                self.factory_target.credentials.username.clone(),
                self.new_password.clone(),
            ),
        )
        .with_port(self.factory_target.port)
    }
}

impl From<&PrepConfig> for SetupConfig {
    fn from(config: &PrepConfig) -> Self {
        let timeouts = &config.timeouts;
        Self {
            factory_target: SessionTarget::new(
                config.device.default_host.clone(),
                Credentials::new(
                    config.device.username.clone(),
                    config.device.default_password.clone(),
                ),
            )
            .with_port(config.device.ssh_port),
            network: config.network_settings(),
            new_password: config.new_password.clone(),
            target_version: config.target_version.trim().to_owned(),
            commit_timeout: Duration::from_secs(timeouts.commit_secs),
            commit_reachability: timeouts.commit_reachability(),
            license_fetch_timeout: Duration::from_secs(timeouts.license_fetch_secs),
            license_retry: timeouts.license_retry(),
            content: timeouts.content(),
            upgrade: UpgradeSettings {
                software: timeouts.software(),
                settle_delay: timeouts.reboot_settle(),
                reachability: timeouts.reboot_reachability(),
                upgrade_map: config.upgrade_map(),
            },
        }
    }
}

/// Mirrors overall progress into the run snapshot
struct TrackingSink {
    parent: Arc<dyn ProgressSink>,
    run: Arc<Mutex<SetupRun>>,
}

impl ProgressSink for TrackingSink {
    fn status(&self, message: &str) {
        self.parent.status(message);
    }

    fn progress(&self, percent: f32) {
        self.run.lock().progress = percent;
        self.parent.progress(percent);
    }

    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        self.parent.notify(kind, title, message);
    }
}

pub struct SetupOrchestrator {
    config: SetupConfig,
    connector: Connector,
    sink: Arc<dyn ProgressSink>,
    run: Arc<Mutex<SetupRun>>,
    cancel: CancellationFlag,
}

impl std::fmt::Debug for SetupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupOrchestrator")
            .field("config", &self.config)
            .field("run", &*self.run.lock())
            .finish_non_exhaustive()
    }
}

impl SetupOrchestrator {
    pub fn new(config: SetupConfig, connector: Connector, sink: Arc<dyn ProgressSink>) -> Self {
        let run = Arc::new(Mutex::new(SetupRun::default()));
        let sink: Arc<dyn ProgressSink> = Arc::new(TrackingSink {
            parent: sink,
            run: Arc::clone(&run),
        });
        Self {
            config,
            connector,
            sink,
            run,
            cancel: CancellationFlag::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Shared handle to the live run state
    pub fn run_state(&self) -> Arc<Mutex<SetupRun>> {
        Arc::clone(&self.run)
    }

    pub fn snapshot(&self) -> SetupRun {
        self.run.lock().clone()
    }

    /// Run all phases. Never returns an error; failures are reported through the sink.
    pub async fn run(&mut self) -> bool {
        let reporter = Reporter::new(Arc::clone(&self.sink));
        info!(
            factory_host = %self.config.factory_target.host,
            new_ip = %self.config.network.new_ip,
            target = %self.config.target_version,
            "Starting firewall setup"
        );

        for phase in SetupPhase::ALL {
            if self.stop_if_cancelled(&reporter) {
                return false;
            }
            self.run.lock().phase = Some(phase);

            let phase_reporter = Reporter::new(Arc::new(PhaseSink::new(
                Arc::clone(&self.sink),
                phase.index(),
                SetupPhase::ALL.len(),
            )));
            phase_reporter.status(phase.label());
            phase_reporter.progress(0.0);

            let result = match phase {
                SetupPhase::InitialConfig => self.initial_configuration(&phase_reporter).await,
                SetupPhase::Licensing => self.licensing(&phase_reporter).await,
                SetupPhase::ContentUpdate => self.content_update(&phase_reporter).await,
                SetupPhase::Upgrade => self.upgrade(&phase_reporter).await,
            };

            match result {
                Ok(()) => phase_reporter.progress(100.0),
                Err(PrepError::Cancelled) => {
                    self.run.lock().cancel_requested = true;
                    self.finish(RunOutcome::Cancelled);
                    reporter.status("Setup cancelled");
                    return false;
                }
                Err(e) => {
                    error!(phase = phase.label(), "Phase failed: {e}");
                    let (title, message) = failure_notice(phase, &e);
                    reporter.notify(NotificationKind::Error, title, &message);
                    self.finish(RunOutcome::Failed);
                    return false;
                }
            }
        }

        reporter.status("Setup complete!");
        reporter.progress(100.0);
        reporter.notify(
            NotificationKind::Success,
            "Setup Complete",
            &format!(
                "Firewall setup completed successfully!\n\nManagement IP: {}\nPAN-OS Version: {}",
                self.config.network.new_ip, self.config.target_version
            ),
        );
        self.finish(RunOutcome::Succeeded);
        true
    }

    fn stop_if_cancelled(&self, reporter: &Reporter) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        self.run.lock().cancel_requested = true;
        self.finish(RunOutcome::Cancelled);
        reporter.status("Setup cancelled");
        true
    }

    fn finish(&self, outcome: RunOutcome) {
        self.run.lock().outcome = outcome;
        info!(?outcome, "Setup finished");
    }

    async fn initial_configuration(&self, reporter: &Reporter) -> Result<()> {
        let target = &self.config.factory_target;
        reporter.status(format!("Connecting to firewall at {}...", target.host));
        reporter.progress(10.0);

        let mut session = self.connector.open(target).await?;
        let result = match session.session() {
            Ok(live) => self.configure_device(live, reporter).await,
            Err(e) => Err(e),
        };
        session.release().await;
        result
    }

    async fn configure_device(
        &self,
        session: &mut dyn CommandSession,
        reporter: &Reporter,
    ) -> Result<()> {
        let stage = InitialConfigStage::new(reporter.clone(), self.config.commit_timeout);
        let network = &self.config.network;

        reporter.progress(30.0);
        stage
            .set_management_ip(session, &network.new_ip, &network.subnet_mask, &network.gateway)
            .await?;

        reporter.progress(50.0);
        let primary = network.dns_servers.first().map_or("8.8.8.8", String::as_str);
        let secondary = network.dns_servers.get(1).map(String::as_str);
        stage.set_dns_servers(session, primary, secondary).await?;

        reporter.progress(70.0);
        stage
            .change_admin_password(session, &self.config.new_password)
            .await?;

        reporter.progress(85.0);
        stage.commit(session).await?;

        reporter.status("Initial configuration complete");
        Ok(())
    }

    async fn licensing(&self, reporter: &Reporter) -> Result<()> {
        let target = self.config.provisioned_target();
        reporter.status("Waiting for firewall at new IP...");
        reporter.progress(10.0);

        let online = self
            .connector
            .wait_until_reachable(&target, self.config.commit_reachability, reporter)
            .await;
        if !online {
            return Err(PrepError::HostUnreachable {
                host: target.host.clone(),
                timeout: self.config.commit_reachability.timeout,
            });
        }

        reporter.status("Connecting to firewall...");
        reporter.progress(30.0);
        let mut session = self.connector.open(&target).await?;

        reporter.status("Fetching licenses...");
        reporter.progress(50.0);
        let stage = LicenseStage::new(reporter.clone(), self.config.license_fetch_timeout);
        let result = match session.session() {
            Ok(live) => stage.fetch_with_retry(live, self.config.license_retry).await,
            Err(e) => Err(e),
        };
        session.release().await;
        result?;

        reporter.status("Licensing complete");
        Ok(())
    }

    async fn content_update(&self, reporter: &Reporter) -> Result<()> {
        let target = self.config.provisioned_target();
        reporter.status("Connecting to firewall...");
        reporter.progress(10.0);
        let mut session = self.connector.open(&target).await?;

        let stage = ContentStage::new(reporter.clone(), self.config.content);
        let result = match session.session() {
            Ok(live) => Self::download_and_install(&stage, live, reporter).await,
            Err(e) => Err(e),
        };
        session.release().await;
        result?;

        reporter.status("Content update complete");
        Ok(())
    }

    async fn download_and_install(
        stage: &ContentStage,
        session: &mut dyn CommandSession,
        reporter: &Reporter,
    ) -> Result<()> {
        reporter.progress(30.0);
        stage.download_latest(session).await?;
        reporter.progress(70.0);
        stage.install_latest(session).await?;
        Ok(())
    }

    async fn upgrade(&self, reporter: &Reporter) -> Result<()> {
        let mut orchestrator = UpgradeOrchestrator::new(
            self.config.provisioned_target(),
            self.connector.clone(),
            self.config.upgrade.clone(),
            reporter.clone(),
        );
        let summary = orchestrator
            .run(&self.config.target_version, &self.cancel)
            .await?;
        reporter.status(format!(
            "Upgrade complete. Final version: {}",
            summary.final_version
        ));
        Ok(())
    }
}

/// Title and body for a failed phase
fn failure_notice(phase: SetupPhase, err: &PrepError) -> (&'static str, String) {
    if let PrepError::HostUnreachable { host, .. } = err {
        return (
            "Connection Failed",
            format!(
                "Cannot connect to firewall at {host}\n\nThe firewall may still be committing or restarting services."
            ),
        );
    }
    let text = err.to_string();
    (
        phase.failure_title(),
        format!(
            "{}: {text}\n\nSuggestion: {}",
            phase.failure_lead(),
            suggest_remediation(&text)
        ),
    )
}

/// Run a setup on its own task.
///
/// Progress arrives on the returned receiver and ends with a `Finished` event.
pub fn spawn_setup(
    config: SetupConfig,
    connector: Connector,
    cancel: CancellationFlag,
) -> (JoinHandle<bool>, UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx));

    let handle = tokio::spawn(async move {
        let mut orchestrator =
            SetupOrchestrator::new(config, connector, Arc::clone(&sink) as Arc<dyn ProgressSink>)
                .with_cancellation(cancel);
        let success = orchestrator.run().await;
        sink.finished(success);
        success
    });

    (handle, rx)
}
