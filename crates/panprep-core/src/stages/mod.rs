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

//! Device-side operations, one module per provisioning stage
//!
//! Every stage classifies command output the same way: ordered substring
//! rules over the lower-cased text. Output matching no rule is passed through
//! unchanged; vendor wording drifts between releases and an unknown reply is
//! not treated as a failure.

pub mod content;
pub mod initial_config;
pub mod license;
pub mod software;
pub mod system_info;

pub use content::ContentStage;
pub use initial_config::{InitialConfigStage, NetworkSettings};
pub use license::{LicenseStage, RetryPolicy};
pub use software::{RebootOutcome, SoftwareStage};
pub use system_info::{parse_system_info, read_software_version};

use tracing::debug;

/// Outcome of a single trigger command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    AlreadyDone,
    Success,
    JobStarted,
    Failed,
    Unrecognized,
}

/// One classification rule: any of `markers` found -> `result`
pub type ResponseRule = (StageResult, &'static [&'static str]);

/// First matching rule wins; no match is `Unrecognized`
pub fn classify_response(output: &str, rules: &[ResponseRule]) -> StageResult {
    let lower = output.to_lowercase();
    let result = rules
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map_or(StageResult::Unrecognized, |(result, _)| *result);
    debug!(?result, "Classified command output");
    result
}
