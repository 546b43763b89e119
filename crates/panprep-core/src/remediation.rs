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

//! Operator hints for failed phases

use std::time::Duration;

/// Keyword groups checked in order against the lower-cased error text
const HINTS: &[(&[&str], &str)] = &[
    (
        &["authentication", "password"],
        "Check the username and password. The default is admin/admin.",
    ),
    (
        &["timeout", "timed out"],
        "The firewall may be unreachable. Check network connectivity and IP address.",
    ),
    (
        &["connection refused"],
        "SSH may not be enabled or the firewall is not ready. Wait and try again.",
    ),
    (
        &["host key"],
        "SSH host key verification failed. This may be a new or reset firewall.",
    ),
    (
        &["no route", "network is unreachable"],
        "Cannot reach the firewall. Check that you're on the correct network.",
    ),
    (
        &["license"],
        "License operation failed. Ensure the firewall has internet access.",
    ),
    (
        &["commit"],
        "Configuration commit failed. Check for conflicting settings.",
    ),
];

const DEFAULT_HINT: &str = "Check the logs for more details and try again.";

pub fn suggest_remediation(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    HINTS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(DEFAULT_HINT, |(_, hint)| *hint)
}

/// "42 seconds", "3m 5s" or "1h 20m"
#[expect(clippy::integer_division)]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs} seconds")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
