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

//! Command session abstraction and scoped session ownership
//!
//! The orchestration code never talks to SSH directly. It only sees
//! [`CommandSession`], so stages and orchestrators can be driven by a scripted
//! session in tests and by the russh transport in the binary.

use crate::error::{PrepError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Login credentials for the management interface
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and as whom to open a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl SessionTarget {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            credentials,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Interactive CLI session to one firewall
#[async_trait]
pub trait CommandSession: Send {
    /// Open and authenticate the session
    async fn connect(&mut self) -> Result<()>;

    /// Close the session; must be safe to call on an already closed session
    async fn disconnect(&mut self);

    /// Send a command and wait for the prompt to return
    async fn send_command(&mut self, command: &str, read_timeout: Duration) -> Result<String>;

    /// Send a command and collect whatever arrives within a fixed delay.
    /// Used for interactive prompts (passwords, reboot confirmation).
    async fn send_command_timing(&mut self, command: &str) -> Result<String>;

    fn is_alive(&self) -> bool;

    fn host(&self) -> &str;
}

/// Creates unconnected sessions; one per phase, hop or reachability probe
pub trait SessionFactory: Send + Sync {
    fn create(&self, target: &SessionTarget) -> Box<dyn CommandSession>;
}

/// A connected session owned by exactly one phase or hop.
///
/// Call [`ScopedSession::release`] on every exit path. If a scope is left
/// without releasing (panic, dropped future), `Drop` hands the session to the
/// runtime for disconnection so it never outlives its owner.
pub struct ScopedSession {
    inner: Option<Box<dyn CommandSession>>,
    host: String,
}

impl ScopedSession {
    /// Create and connect a session for `target`. A failed connect is torn down before returning.
    pub async fn open(factory: &dyn SessionFactory, target: &SessionTarget) -> Result<Self> {
        let mut session = factory.create(target);
        debug!(host = %target.host, port = target.port, "Opening session");
        if let Err(e) = session.connect().await {
            session.disconnect().await;
            return Err(e);
        }
        Ok(Self {
            inner: Some(session),
            host: target.host.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_alive(&self) -> bool {
        self.inner.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Borrow the live session, failing if it was already released
    pub fn session(&mut self) -> Result<&mut dyn CommandSession> {
        match self.inner.as_mut() {
            Some(session) => Ok(session.as_mut()),
            None => Err(PrepError::NotConnected),
        }
    }

    pub async fn send_command(&mut self, command: &str, read_timeout: Duration) -> Result<String> {
        self.session()?.send_command(command, read_timeout).await
    }

    pub async fn send_command_timing(&mut self, command: &str) -> Result<String> {
        self.session()?.send_command_timing(command).await
    }

    /// Disconnect and give up ownership. Idempotent.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.inner.take() {
            session.disconnect().await;
            debug!(host = %self.host, "Session released");
        }
    }
}

impl fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession")
            .field("host", &self.host)
            .field("live", &self.inner.is_some())
            .finish()
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        warn!(host = %self.host, "Session dropped without release, disconnecting");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                session.disconnect().await;
            });
        }
    }
}
