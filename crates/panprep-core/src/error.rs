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

//! Error types for the provisioning core

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("invalid version format: {0:?}")]
    InvalidVersionFormat(String),

    #[error("invalid upgrade map: {0}")]
    InvalidUpgradeMap(String),

    #[error("upgrade map does not advance past {working} (entry {key} -> {next_base})")]
    UpgradeMapNotAdvancing {
        key: String,
        working: String,
        next_base: String,
    },

    #[error("{job} failed: {status}")]
    JobFailed { job: String, status: String },

    #[error("{job} timed out after {}s", timeout.as_secs())]
    JobTimeout { job: String, timeout: Duration },

    #[error("not connected to firewall")]
    NotConnected,

    #[error("firewall at {host} did not come back online after upgrading to {hop}")]
    ReachabilityTimeout { host: String, hop: String },

    #[error("{host} unreachable: timed out waiting for SSH after {}s", timeout.as_secs())]
    HostUnreachable { host: String, timeout: Duration },

    #[error("command transport error: {0}")]
    CommandTransport(String),

    #[error("command {command:?} rejected by firewall: {output}")]
    CommandRejected { command: String, output: String },

    #[error("license fetch failed after {attempts} attempts: {last_error}")]
    LicenseFetchExhausted { attempts: u32, last_error: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl PrepError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::CommandTransport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
