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

//! Waits for a firewall to accept SSH logins again (after commit or reboot)

use crate::progress::Reporter;
use crate::session::{SessionFactory, SessionTarget};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, info};

const LIVENESS_COMMAND: &str = "show clock";

/// Raw TCP reachability check
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn tcp_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect with a timeout
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn tcp_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port, "Port not open yet: {e}");
                false
            }
            Err(_) => {
                debug!(host, port, "TCP connect timed out");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReachabilitySettings {
    /// Overall budget for all attempts
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Per-attempt TCP connect timeout
    pub connect_timeout: Duration,
}

impl ReachabilitySettings {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ReachabilitySettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(30))
    }
}

/// Poll until the host accepts a login and answers a trivial command.
///
/// Every failure (port closed, auth refused, command error) counts as "not
/// ready yet". Returns `false` once `settings.timeout` has elapsed.
pub async fn wait_for_reachability(
    target: &SessionTarget,
    settings: ReachabilitySettings,
    probe: &dyn ReachabilityProbe,
    factory: &dyn SessionFactory,
    reporter: &Reporter,
) -> bool {
    let start = Instant::now();
    let mut attempt: u32 = 0;

    while start.elapsed() < settings.timeout {
        attempt += 1;
        let elapsed = start.elapsed().as_secs();
        reporter.status(format!(
            "Waiting for SSH on {}... Attempt {attempt} ({elapsed}s elapsed)",
            target.host
        ));

        if probe
            .tcp_reachable(&target.host, target.port, settings.connect_timeout)
            .await
            && login_and_check(target, factory).await
        {
            info!(host = %target.host, attempt, "SSH connection successful");
            return true;
        }

        tokio::time::sleep(settings.poll_interval).await;
    }

    error!(host = %target.host, "Timeout waiting for SSH");
    false
}

async fn login_and_check(target: &SessionTarget, factory: &dyn SessionFactory) -> bool {
    let mut session = factory.create(target);
    let result = match session.connect().await {
        Ok(()) => session.send_command_timing(LIVENESS_COMMAND).await.map(|_| ()),
        Err(e) => Err(e),
    };
    session.disconnect().await;

    if let Err(e) = &result {
        debug!(host = %target.host, "SSH connection attempt failed: {e}");
    }
    result.is_ok()
}
