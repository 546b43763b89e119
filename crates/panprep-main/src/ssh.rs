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

//! Interactive PAN-OS CLI over russh
//!
//! One SSH connection with a single pty shell channel per session. Output is
//! read until the CLI prompt comes back, or for a fixed delay when the command
//! is expected to answer with a question instead of a prompt.

use async_trait::async_trait;
use panprep_core::session::{CommandSession, SessionFactory, SessionTarget};
use panprep_core::{PrepError, Result};
use regex::Regex;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_READ_TIMEOUT: Duration = Duration::from_secs(60);
const SETUP_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a timing read collects output
const TIMING_WINDOW: Duration = Duration::from_secs(2);
/// Late output from the previous command is discarded for this long before sending
const DRAIN_WINDOW: Duration = Duration::from_millis(100);
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(900);

/// Sent once after login so output is neither paged nor decorated
const SESSION_SETUP: [&str; 2] = ["set cli pager off", "set cli scripting-mode on"];

/// `admin@PA-VM>` or `admin@PA-VM#`, optionally with an HA suffix
static PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+[>#] ?$").expect("valid regex"));

/// Factory-default and freshly rebooted firewalls present new host keys
#[derive(Debug)]
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            fingerprint = %server_public_key.fingerprint(),
            "Accepting firewall host key"
        );
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SshSessionFactory;

impl SessionFactory for SshSessionFactory {
    fn create(&self, target: &SessionTarget) -> Box<dyn CommandSession> {
        Box::new(SshSession::new(target.clone()))
    }
}

pub struct SshSession {
    target: SessionTarget,
    handle: Option<Handle<AcceptAnyHostKey>>,
    channel: Option<Channel<Msg>>,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("target", &self.target)
            .field("connected", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

/// Why a read stopped
enum ReadEnd {
    Prompt(String),
    /// Window elapsed; holds whatever arrived
    Elapsed(String),
    Closed,
}

impl SshSession {
    pub fn new(target: SessionTarget) -> Self {
        Self {
            target,
            handle: None,
            channel: None,
        }
    }

    async fn open_shell(&mut self) -> Result<()> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            ..Default::default()
        });
        let host = self.target.host.clone();
        let addr = (host.as_str(), self.target.port);

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(config, addr, AcceptAnyHostKey),
        )
        .await
        .map_err(|_| PrepError::transport(format!("connection to {host} timed out")))?
        .map_err(PrepError::transport)?;

        let credentials = &self.target.credentials;
        let authenticated = handle
            .authenticate_password(credentials.username.clone(), credentials.password.clone())
            .await
            .map_err(PrepError::transport)?;
        if !authenticated {
            return Err(PrepError::transport(format!(
                "Authentication failed for {}@{host}",
                credentials.username
            )));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(PrepError::transport)?;
        channel
            .request_pty(false, "vt100", 511, 24, 0, 0, &[])
            .await
            .map_err(PrepError::transport)?;
        channel
            .request_shell(false)
            .await
            .map_err(PrepError::transport)?;

        self.handle = Some(handle);
        self.channel = Some(channel);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(PrepError::NotConnected)?;
        let payload = format!("{line}\n");
        if let Err(e) = channel.data(payload.as_bytes()).await {
            self.mark_closed();
            return Err(PrepError::transport(e));
        }
        Ok(())
    }

    /// Throw away anything still buffered so it cannot leak into the next reply
    async fn drain(&mut self) -> Result<()> {
        match self.read(DRAIN_WINDOW, false).await? {
            ReadEnd::Elapsed(stale) if !stale.is_empty() => {
                debug!(bytes = stale.len(), "Discarded late output");
            }
            _ => {}
        }
        Ok(())
    }

    async fn read(&mut self, window: Duration, until_prompt: bool) -> Result<ReadEnd> {
        let channel = self.channel.as_mut().ok_or(PrepError::NotConnected)?;
        let end = read_channel(channel, Instant::now() + window, until_prompt).await;
        if matches!(end, ReadEnd::Closed) {
            self.mark_closed();
        }
        Ok(end)
    }

    /// The firewall went away; drop our side without a goodbye
    fn mark_closed(&mut self) {
        self.channel = None;
        self.handle = None;
        debug!(host = %self.target.host, "Connection closed by firewall");
    }
}

async fn read_channel(channel: &mut Channel<Msg>, deadline: Instant, until_prompt: bool) -> ReadEnd {
    let mut bytes = Vec::new();
    loop {
        let Ok(msg) = tokio::time::timeout_at(deadline, channel.wait()).await else {
            return ReadEnd::Elapsed(decode_output(&bytes));
        };
        match msg {
            Some(ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. }) => {
                bytes.extend_from_slice(&data);
                if until_prompt {
                    let text = decode_output(&bytes);
                    if PROMPT.is_match(&text) {
                        return ReadEnd::Prompt(text);
                    }
                }
            }
            Some(ChannelMsg::Eof | ChannelMsg::Close) | None => return ReadEnd::Closed,
            Some(_) => {}
        }
    }
}

/// Decode everything read so far in one go; a character split across packets stays intact
fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\r', "")
}

/// Drop the echoed command and the trailing prompt line
fn clean_output(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.first().is_some_and(|l| l.trim_end().ends_with(command)) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| PROMPT.is_match(l)) {
        lines.pop();
    }
    lines.join("\n").trim().to_owned()
}

#[async_trait]
impl CommandSession for SshSession {
    async fn connect(&mut self) -> Result<()> {
        self.open_shell().await?;

        match self.read(LOGIN_READ_TIMEOUT, true).await? {
            ReadEnd::Prompt(_) => {}
            ReadEnd::Elapsed(_) => {
                self.disconnect().await;
                return Err(PrepError::transport(format!(
                    "no CLI prompt from {} after login",
                    self.target.host
                )));
            }
            ReadEnd::Closed => {
                return Err(PrepError::transport("connection closed during login"));
            }
        }

        for command in SESSION_SETUP {
            self.send_command(command, SETUP_READ_TIMEOUT).await?;
        }
        debug!(host = %self.target.host, "CLI session ready");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Channel close failed: {e}");
            }
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                warn!(host = %self.target.host, "SSH disconnect failed: {e}");
            }
        }
    }

    async fn send_command(&mut self, command: &str, read_timeout: Duration) -> Result<String> {
        self.drain().await?;
        self.write_line(command).await?;
        match self.read(read_timeout, true).await? {
            ReadEnd::Prompt(raw) => Ok(clean_output(&raw, command)),
            ReadEnd::Elapsed(_) => Err(PrepError::transport(format!(
                "timed out after {}s waiting for {command:?}",
                read_timeout.as_secs()
            ))),
            ReadEnd::Closed => Err(PrepError::transport("connection closed by firewall")),
        }
    }

    async fn send_command_timing(&mut self, command: &str) -> Result<String> {
        self.drain().await?;
        self.write_line(command).await?;
        match self.read(TIMING_WINDOW, false).await? {
            ReadEnd::Prompt(raw) | ReadEnd::Elapsed(raw) => Ok(clean_output(&raw, command)),
            ReadEnd::Closed => Err(PrepError::transport("connection closed by firewall")),
        }
    }

    fn is_alive(&self) -> bool {
        self.channel.is_some() && self.handle.as_ref().is_some_and(|h| !h.is_closed())
    }

    fn host(&self) -> &str {
        &self.target.host
    }
}
