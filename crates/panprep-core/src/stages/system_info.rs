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

use crate::error::{PrepError, Result};
use crate::session::{CommandSession, DEFAULT_READ_TIMEOUT};
use std::collections::BTreeMap;

pub const SYSTEM_INFO_COMMAND: &str = "show system info";

/// `key: value` lines of `show system info`, keys lower-cased
pub fn parse_system_info(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Currently running PAN-OS version (`sw-version`)
pub async fn read_software_version(session: &mut dyn CommandSession) -> Result<String> {
    let output = session
        .send_command(SYSTEM_INFO_COMMAND, DEFAULT_READ_TIMEOUT)
        .await?;
    parse_system_info(&output)
        .remove("sw-version")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PrepError::CommandRejected {
            command: SYSTEM_INFO_COMMAND.to_owned(),
            output: "no sw-version in system info".to_owned(),
        })
}
