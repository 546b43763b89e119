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

//! Scripted firewall used by the integration tests.
//!
//! One `FakeFirewall` models a single device. Every session created by its
//! factory talks to the same shared state, so address and password changes,
//! downloads, installs and reboots carry over between sessions the way they
//! do on a real device.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use panprep_core::progress::ProgressSink;
use panprep_core::reachability::ReachabilityProbe;
use panprep_core::session::{CommandSession, Credentials, SessionFactory, SessionTarget};
use panprep_core::upgrade::Connector;
use panprep_core::{NotificationKind, PrepError, Result};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub const FACTORY_HOST: &str = "192.168.1.1";
pub const NEW_IP: &str = "10.0.0.10";
pub const NEW_PASSWORD: &str = "Secr3tPass";

#[derive(Debug)]
pub struct DeviceState {
    pub host: String,
    pub credentials: Credentials,
    pub version: String,
    pub pending_version: Option<String>,
    pub downloaded: BTreeSet<String>,

    /// Staged configuration, applied on commit
    pub candidate_ip: Option<String>,
    pub candidate_password: Option<String>,
    in_configure: bool,
    password_prompts: u8,

    pub content_downloaded: bool,
    pub content_installed: bool,
    pub licensed: bool,

    /// Probes that still fail after a reboot or commit
    pub down_probes: u32,
    /// Probe failures to apply after each reboot
    pub reboot_down_probes: u32,
    /// Device never answers probes again after a reboot
    pub stays_down_after_reboot: bool,
    pub down: bool,
    /// Software download jobs never finish
    pub downloads_stall: bool,

    /// Replies that take precedence over the simulation, keyed by command
    overrides: HashMap<String, VecDeque<Result<String>>>,

    pub commands: Vec<String>,
    pub connects: u32,
    /// `disconnect` calls, including on sessions that never connected
    pub disconnects: u32,
    pub probes: u32,
    pub live_sessions: u32,
    pub max_live_sessions: u32,
    pub reboots: u32,
}

impl DeviceState {
    fn new(version: &str) -> Self {
        Self {
            host: FACTORY_HOST.to_owned(),
            credentials: Credentials::new("admin", "admin"),
            version: version.to_owned(),
            pending_version: None,
            downloaded: BTreeSet::new(),
            candidate_ip: None,
            candidate_password: None,
            in_configure: false,
            password_prompts: 0,
            content_downloaded: false,
            content_installed: false,
            licensed: false,
            down_probes: 0,
            reboot_down_probes: 2,
            stays_down_after_reboot: false,
            down: false,
            downloads_stall: false,
            overrides: HashMap::new(),
            commands: Vec::new(),
            connects: 0,
            disconnects: 0,
            probes: 0,
            live_sessions: 0,
            max_live_sessions: 0,
            reboots: 0,
        }
    }

    fn has_override(&self, command: &str) -> bool {
        self.overrides.get(command).is_some_and(|replies| !replies.is_empty())
    }

    fn respond(&mut self, command: &str) -> Result<String> {
        self.commands.push(command.to_owned());

        if let Some(reply) = self.overrides.get_mut(command).and_then(VecDeque::pop_front) {
            return reply;
        }

        if self.password_prompts > 0 {
            self.password_prompts -= 1;
            if self.password_prompts == 1 {
                return Ok("Confirm password :".to_owned());
            }
            self.candidate_password = Some(command.to_owned());
            return Ok("[edit]\nadmin@PA-VM#".to_owned());
        }

        let reply = match command {
            "show system info" => format!(
                "hostname: PA-VM\nip-address: {}\nsw-version: {}\n",
                self.host, self.version
            ),
            "show clock" => "Mon Oct 19 10:00:00 UTC 2026".to_owned(),
            "configure" => {
                self.in_configure = true;
                "Entering configuration mode\n[edit]\nadmin@PA-VM#".to_owned()
            }
            "exit" => {
                self.in_configure = false;
                "Exiting configuration mode\nadmin@PA-VM>".to_owned()
            }
            "set mgt-config users admin password" => {
                self.password_prompts = 2;
                "Enter password   :".to_owned()
            }
            "commit" => {
                if let Some(ip) = self.candidate_ip.take() {
                    self.host = ip;
                }
                if let Some(password) = self.candidate_password.take() {
                    self.credentials.password = password;
                }
                "Configuration committed successfully".to_owned()
            }
            "request license fetch" => {
                self.licensed = true;
                "VM Device License installed successfully".to_owned()
            }
            "request license info" => {
                if self.licensed {
                    "License entry:\nFeature: Threat Prevention\nExpired?: no".to_owned()
                } else {
                    "No licenses installed".to_owned()
                }
            }
            "request content upgrade check" => "Version    Downloaded    Installed".to_owned(),
            "request content upgrade download latest" => {
                self.content_downloaded = true;
                "Download job enqueued with jobid 1".to_owned()
            }
            "request content upgrade install version latest" => {
                self.content_installed = true;
                "Content install job enqueued with jobid 2".to_owned()
            }
            "request content upgrade info" => self.content_info(),
            "request system software check" => "Version list refreshed".to_owned(),
            "request system software info" => self.software_info(),
            "show jobs all" => match &self.pending_version {
                Some(version) => format!("5  SWInstall  FIN  OK  Installed {version}"),
                None => "No jobs".to_owned(),
            },
            "request restart system" => {
                "Executing this command will disconnect the current session. Do you want to continue? (y or n)".to_owned()
            }
            _ => return Ok(self.respond_parameterised(command)),
        };
        Ok(reply)
    }

    fn respond_parameterised(&mut self, command: &str) -> String {
        if let Some(version) = command.strip_prefix("request system software download version ") {
            self.downloaded.insert(version.to_owned());
            return "Download job enqueued with jobid 3".to_owned();
        }
        if let Some(version) = command.strip_prefix("request system software install version ") {
            self.pending_version = Some(version.to_owned());
            return "Software install job enqueued with jobid 4".to_owned();
        }
        if let Some(ip) = command.strip_prefix("set deviceconfig system ip-address ") {
            self.candidate_ip = Some(ip.to_owned());
        }
        if command.starts_with("set ") {
            return "[edit]\nadmin@PA-VM#".to_owned();
        }
        format!("Unknown command: {command}")
    }

    fn software_info(&self) -> String {
        if self.downloads_stall {
            return "Downloading image ... 10%".to_owned();
        }
        let mut out = "Version  Size   Released on  Downloaded  Currently Installed\n".to_owned();
        for version in &self.downloaded {
            let current = if *version == self.version { "yes" } else { "no" };
            out.push_str(&format!("{version}  512MB  2025/01/01  yes  {current}\n"));
        }
        out
    }

    fn content_info(&self) -> String {
        let mut out = "Version    Downloaded    Installed\n".to_owned();
        if self.content_downloaded {
            out.push_str("8799-8509  yes           no\n");
        }
        if self.content_installed {
            out.push_str("Install complete\n");
        }
        out
    }

    fn reboot(&mut self) {
        self.reboots += 1;
        if let Some(version) = self.pending_version.take() {
            self.version = version;
        }
        self.down = self.stays_down_after_reboot;
        self.down_probes = self.reboot_down_probes;
    }

    fn accepts(&self, target: &SessionTarget) -> bool {
        !self.down && self.down_probes == 0 && target.host == self.host && target.credentials == self.credentials
    }
}

/// Handle to a simulated device
#[derive(Debug, Clone)]
pub struct FakeFirewall {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeFirewall {
    pub fn new(version: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(version))),
        }
    }

    /// A device already reachable at `NEW_IP` with `NEW_PASSWORD`
    pub fn provisioned(version: &str) -> Self {
        let device = Self::new(version);
        {
            let mut state = device.state.lock();
            state.host = NEW_IP.to_owned();
            state.credentials = Credentials::new("admin", NEW_PASSWORD);
        }
        device
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    /// Queue a reply for `command`, used before the simulated one
    pub fn script(&self, command: &str, reply: Result<String>) {
        self.state
            .lock()
            .overrides
            .entry(command.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn connector(&self) -> Connector {
        Connector::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    pub fn session(&self, target: &SessionTarget) -> FakeSession {
        FakeSession {
            device: Arc::clone(&self.state),
            target: target.clone(),
            connected: false,
        }
    }
}

impl SessionFactory for FakeFirewall {
    fn create(&self, target: &SessionTarget) -> Box<dyn CommandSession> {
        Box::new(self.session(target))
    }
}

#[async_trait]
impl ReachabilityProbe for FakeFirewall {
    async fn tcp_reachable(&self, host: &str, _port: u16, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.probes += 1;
        if state.down || host != state.host {
            return false;
        }
        if state.down_probes > 0 {
            state.down_probes -= 1;
            return false;
        }
        true
    }
}

#[derive(Debug)]
pub struct FakeSession {
    device: Arc<Mutex<DeviceState>>,
    target: SessionTarget,
    connected: bool,
}

impl FakeSession {
    fn exchange(&mut self, command: &str) -> Result<String> {
        if !self.connected {
            return Err(PrepError::NotConnected);
        }
        let mut state = self.device.lock();
        let confirms_restart = command == "y"
            && !state.has_override(command)
            && state.commands.last().is_some_and(|c| c == "request restart system");
        if confirms_restart {
            state.commands.push(command.to_owned());
            state.reboot();
            drop(state);
            self.drop_connection();
            return Err(PrepError::transport("connection reset by peer"));
        }
        state.respond(command)
    }

    fn drop_connection(&mut self) {
        if self.connected {
            self.connected = false;
            self.device.lock().live_sessions -= 1;
        }
    }
}

#[async_trait]
impl CommandSession for FakeSession {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.device.lock();
        if !state.accepts(&self.target) {
            return Err(PrepError::transport(format!(
                "Authentication failed or host {} unreachable",
                self.target.host
            )));
        }
        state.connects += 1;
        state.live_sessions += 1;
        state.max_live_sessions = state.max_live_sessions.max(state.live_sessions);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.device.lock().disconnects += 1;
        self.drop_connection();
    }

    async fn send_command(&mut self, command: &str, _read_timeout: Duration) -> Result<String> {
        self.exchange(command)
    }

    async fn send_command_timing(&mut self, command: &str) -> Result<String> {
        self.exchange(command)
    }

    fn is_alive(&self) -> bool {
        self.connected
    }

    fn host(&self) -> &str {
        &self.target.host
    }
}

/// Everything sent to a sink, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Status(String),
    Progress(f32),
    Notify(NotificationKind, String, String),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn progress_values(&self) -> Vec<f32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<(NotificationKind, String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Notify(kind, title, message) => {
                    Some((*kind, title.clone(), message.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn status(&self, message: &str) {
        self.events.lock().push(Recorded::Status(message.to_owned()));
    }

    fn progress(&self, percent: f32) {
        self.events.lock().push(Recorded::Progress(percent));
    }

    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        self.events
            .lock()
            .push(Recorded::Notify(kind, title.to_owned(), message.to_owned()));
    }
}

pub fn factory_target() -> SessionTarget {
    SessionTarget::new(FACTORY_HOST, Credentials::new("admin", "admin"))
}

pub fn provisioned_target() -> SessionTarget {
    SessionTarget::new(NEW_IP, Credentials::new("admin", NEW_PASSWORD))
}
