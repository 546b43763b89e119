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

//! TOML run configuration

use crate::error::{PrepError, Result};
use crate::reachability::ReachabilitySettings;
use crate::session::DEFAULT_SSH_PORT;
use crate::stages::content::ContentTimeouts;
use crate::stages::software::SoftwareTimeouts;
use crate::stages::{NetworkSettings, RetryPolicy};
use crate::upgrade::UpgradeSettings;
use crate::upgrade_path::UpgradeMap;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

macro_rules! bail {
    ($($arg:tt)*) => {
        return Err(PrepError::Config(format!($($arg)*)))
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    pub network: NetworkConfig,
    pub new_password: String,
    pub target_version: String,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Replaces the built-in PAN-OS table when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_map: Option<UpgradeMap>,
}

/// How to reach a factory-default device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_host")]
    pub default_host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub default_password: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub new_ip: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub dns_servers: Vec<String>,
}

/// All budgets in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_content_download_secs")]
    pub content_download_secs: u64,
    #[serde(default = "default_content_install_secs")]
    pub content_install_secs: u64,
    #[serde(default = "default_software_download_secs")]
    pub software_download_secs: u64,
    #[serde(default = "default_software_install_secs")]
    pub software_install_secs: u64,
    #[serde(default = "default_commit_secs")]
    pub commit_secs: u64,
    #[serde(default = "default_license_fetch_secs")]
    pub license_fetch_secs: u64,
    #[serde(default = "default_license_attempts")]
    pub license_attempts: u32,
    #[serde(default = "default_license_retry_delay_secs")]
    pub license_retry_delay_secs: u64,
    /// Wait for the new management address after the initial commit
    #[serde(default = "default_commit_reachability_secs")]
    pub commit_reachability_secs: u64,
    #[serde(default = "default_commit_reachability_poll_secs")]
    pub commit_reachability_poll_secs: u64,
    /// Total post-reboot budget, settle delay included
    #[serde(default = "default_reboot_reachability_secs")]
    pub reboot_reachability_secs: u64,
    #[serde(default = "default_reboot_reachability_poll_secs")]
    pub reboot_reachability_poll_secs: u64,
    #[serde(default = "default_reboot_settle_secs")]
    pub reboot_settle_secs: u64,
}

fn default_host() -> String {
    "192.168.1.1".to_owned()
}

fn default_username() -> String {
    "admin".to_owned()
}

fn default_password() -> String {
    "admin".to_owned()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_content_download_secs() -> u64 {
    600
}

fn default_content_install_secs() -> u64 {
    300
}

fn default_software_download_secs() -> u64 {
    1800
}

fn default_software_install_secs() -> u64 {
    1200
}

fn default_commit_secs() -> u64 {
    300
}

fn default_license_fetch_secs() -> u64 {
    120
}

fn default_license_attempts() -> u32 {
    3
}

fn default_license_retry_delay_secs() -> u64 {
    30
}

fn default_commit_reachability_secs() -> u64 {
    180
}

fn default_commit_reachability_poll_secs() -> u64 {
    15
}

fn default_reboot_reachability_secs() -> u64 {
    600
}

fn default_reboot_reachability_poll_secs() -> u64 {
    30
}

fn default_reboot_settle_secs() -> u64 {
    60
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            default_host: default_host(),
            username: default_username(),
            default_password: default_password(),
            ssh_port: default_ssh_port(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            content_download_secs: default_content_download_secs(),
            content_install_secs: default_content_install_secs(),
            software_download_secs: default_software_download_secs(),
            software_install_secs: default_software_install_secs(),
            commit_secs: default_commit_secs(),
            license_fetch_secs: default_license_fetch_secs(),
            license_attempts: default_license_attempts(),
            license_retry_delay_secs: default_license_retry_delay_secs(),
            commit_reachability_secs: default_commit_reachability_secs(),
            commit_reachability_poll_secs: default_commit_reachability_poll_secs(),
            reboot_reachability_secs: default_reboot_reachability_secs(),
            reboot_reachability_poll_secs: default_reboot_reachability_poll_secs(),
            reboot_settle_secs: default_reboot_settle_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn content(&self) -> ContentTimeouts {
        ContentTimeouts {
            download: Duration::from_secs(self.content_download_secs),
            install: Duration::from_secs(self.content_install_secs),
        }
    }

    pub fn software(&self) -> SoftwareTimeouts {
        SoftwareTimeouts {
            download: Duration::from_secs(self.software_download_secs),
            install: Duration::from_secs(self.software_install_secs),
        }
    }

    pub fn license_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.license_attempts,
            delay: Duration::from_secs(self.license_retry_delay_secs),
        }
    }

    pub fn commit_reachability(&self) -> ReachabilitySettings {
        ReachabilitySettings::new(
            Duration::from_secs(self.commit_reachability_secs),
            Duration::from_secs(self.commit_reachability_poll_secs),
        )
    }

    /// Budget left for probing once the settle delay has passed
    pub fn reboot_reachability(&self) -> ReachabilitySettings {
        ReachabilitySettings::new(
            Duration::from_secs(
                self.reboot_reachability_secs
                    .saturating_sub(self.reboot_settle_secs),
            ),
            Duration::from_secs(self.reboot_reachability_poll_secs),
        )
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_secs(self.reboot_settle_secs)
    }

    /// Reject budgets that would fail every run or spin a polling loop
    pub fn validate(&self) -> Result<()> {
        if self.license_attempts == 0 {
            bail!("timeouts.license_attempts must be at least 1");
        }
        if self.commit_reachability_poll_secs == 0 {
            bail!("timeouts.commit_reachability_poll_secs must be at least 1");
        }
        if self.reboot_reachability_poll_secs == 0 {
            bail!("timeouts.reboot_reachability_poll_secs must be at least 1");
        }
        if self.reboot_settle_secs >= self.reboot_reachability_secs {
            bail!(
                "timeouts.reboot_settle_secs ({}) must be less than timeouts.reboot_reachability_secs ({})",
                self.reboot_settle_secs,
                self.reboot_reachability_secs
            );
        }
        Ok(())
    }
}

impl PrepConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| PrepError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PrepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.default_host.trim().is_empty() {
            bail!("device.default_host must be set");
        }
        if self.device.username.trim().is_empty() {
            bail!("device.username must be set");
        }

        parse_ipv4("network.new_ip", &self.network.new_ip)?;
        parse_ipv4("network.gateway", &self.network.gateway)?;
        let mask = parse_ipv4("network.subnet_mask", &self.network.subnet_mask)?;
        if !is_contiguous_mask(mask) {
            bail!("network.subnet_mask {mask} is not a valid subnet mask");
        }

        if self.network.dns_servers.is_empty() || self.network.dns_servers.len() > 2 {
            bail!(
                "network.dns_servers must list one or two servers, got {}",
                self.network.dns_servers.len()
            );
        }
        for dns in &self.network.dns_servers {
            parse_ipv4("network.dns_servers", dns)?;
        }

        validate_password(&self.new_password)?;

        Version::parse(&self.target_version)
            .map_err(|e| PrepError::Config(format!("target_version: {e}")))?;

        if let Some(map) = &self.upgrade_map {
            map.validate()?;
        }

        self.timeouts.validate()
    }

    /// Effective upgrade map: the configured one or the PAN-OS default
    pub fn upgrade_map(&self) -> UpgradeMap {
        self.upgrade_map.clone().unwrap_or_default()
    }

    pub fn network_settings(&self) -> NetworkSettings {
        NetworkSettings {
            new_ip: self.network.new_ip.trim().to_owned(),
            subnet_mask: self.network.subnet_mask.trim().to_owned(),
            gateway: self.network.gateway.trim().to_owned(),
            dns_servers: self
                .network
                .dns_servers
                .iter()
                .map(|s| s.trim().to_owned())
                .collect(),
        }
    }
}

/// Timeouts and upgrade map only, for runs against an already provisioned device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_map: Option<UpgradeMap>,
}

impl TuningConfig {
    /// Reads the `[timeouts]` and `[upgrade_map]` tables, ignoring everything else
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PrepError::Config(format!("{}: {e}", path.display())))?;
        if let Some(map) = &config.upgrade_map {
            map.validate()?;
        }
        config.timeouts.validate()?;
        Ok(config)
    }

    pub fn upgrade_map(&self) -> UpgradeMap {
        self.upgrade_map.clone().unwrap_or_default()
    }

    pub fn upgrade_settings(&self) -> UpgradeSettings {
        UpgradeSettings {
            software: self.timeouts.software(),
            settle_delay: self.timeouts.reboot_settle(),
            reachability: self.timeouts.reboot_reachability(),
            upgrade_map: self.upgrade_map(),
        }
    }
}

fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| PrepError::Config(format!("{field}: {value:?} is not a valid IPv4 address")))
}

/// All ones followed by all zeros
fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}

/// PAN-OS admin password policy
pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < 8 {
        bail!("Password must be at least 8 characters");
    }
    if len > 31 {
        bail!("Password must be 31 characters or less");
    }
    if !password.chars().any(char::is_uppercase) {
        bail!("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(char::is_lowercase) {
        bail!("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        bail!("Password must contain at least one number");
    }
    Ok(())
}
