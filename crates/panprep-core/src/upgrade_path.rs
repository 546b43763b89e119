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

//! Upgrade path planning across mandatory PAN-OS base releases

use crate::error::{PrepError, Result};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Vendor upgrade map: source train ("major.minor") -> next mandatory base release.
///
/// A missing key means the train has no forced intermediate release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeMap(BTreeMap<String, String>);

impl UpgradeMap {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    /// Published PAN-OS upgrade path. 12.1 is the odd one out: its base is 12.1.2.
    pub fn panos_default() -> Self {
        let entries = [
            ("9.0", "9.1.0"),
            ("9.1", "10.0.0"),
            ("10.0", "10.1.0"),
            ("10.1", "10.2.0"),
            ("10.2", "11.0.0"),
            ("11.0", "11.1.0"),
            ("11.1", "11.2.0"),
            ("11.2", "12.1.2"),
        ];
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }

    pub fn next_base(&self, major_minor: &str) -> Option<&str> {
        self.0.get(major_minor).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every key must be a train and every value a parsable version
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            let is_train = key
                .split_once('.')
                .is_some_and(|(major, minor)| is_number(major) && is_number(minor));
            if !is_train {
                return Err(PrepError::InvalidUpgradeMap(format!(
                    "key {key:?} is not a major.minor train"
                )));
            }
            Version::parse(value).map_err(|_| {
                PrepError::InvalidUpgradeMap(format!("value {value:?} for {key} is not a version"))
            })?;
        }
        Ok(())
    }
}

impl Default for UpgradeMap {
    fn default() -> Self {
        Self::panos_default()
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Determine the ordered list of versions to install to get from `current` to `target`.
///
/// The starting version is excluded, the target is always the last element.
/// Returns an empty path when the device is already at or past the target.
pub fn plan_upgrade_path(current: &str, target: &str, map: &UpgradeMap) -> Result<Vec<String>> {
    let current = Version::parse(current)?;
    let target = Version::parse(target)?;

    if current >= target {
        return Ok(Vec::new());
    }

    let mut path = Vec::new();
    let mut working = current;

    while working < target {
        let key = working.major_minor();
        let Some(next_base) = map.next_base(&key) else {
            // No forced intermediate for this train
            path.push(target.original().to_owned());
            break;
        };
        let next = Version::parse(next_base)?;

        if next.same_train(&target) {
            path.push(target.original().to_owned());
            break;
        }

        if next > target {
            path.push(target.original().to_owned());
            break;
        }

        if next <= working {
            return Err(PrepError::UpgradeMapNotAdvancing {
                key,
                working: working.to_string(),
                next_base: next_base.to_owned(),
            });
        }

        debug!(from = %working, via = %next, "Mandatory base release on upgrade path");
        path.push(next_base.to_owned());
        working = next;
    }

    Ok(path)
}

/// Base release of the train `version` belongs to.
///
/// Prefers a mapped base in the same train (12.1 -> 12.1.2) over the nominal X.Y.0.
pub fn base_version_for(version: &Version, map: &UpgradeMap) -> String {
    map.0
        .values()
        .filter_map(|value| Version::parse(value).ok())
        .find(|base| base.same_train(version))
        .map_or_else(|| version.base_version(), |base| base.original().to_owned())
}
