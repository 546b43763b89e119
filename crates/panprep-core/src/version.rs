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

//! PAN-OS version parsing and comparison module

use crate::error::{PrepError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A PAN-OS software version such as `10.2.4` or `11.2.10-h2`.
///
/// Equality and ordering only look at the numeric triple; the hotfix suffix
/// is kept in [`Version::original`] for commands that need the exact text.
#[derive(Debug, Clone)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
    hotfix: Option<u32>,
    original: String,
}

impl Version {
    /// Parse version strings like "10.2.4" or "10.2.4-h1"
    pub fn parse(s: &str) -> Result<Self> {
        let original = s.trim();
        let invalid = || PrepError::InvalidVersionFormat(s.to_owned());

        let (numeric, hotfix) = match original.rsplit_once("-h") {
            Some((head, digits))
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) =>
            {
                (head, Some(digits.parse::<u32>().map_err(|_| invalid())?))
            }
            _ => (original, None),
        };

        let mut parts = numeric.split('.');
        let mut component = || -> Result<u32> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };

        let major = component()?;
        let minor = component()?;
        let patch = component()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
            hotfix,
            original: original.to_owned(),
        })
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    pub fn hotfix(&self) -> Option<u32> {
        self.hotfix
    }

    /// The trimmed input text, hotfix suffix included
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Train identifier, e.g. "10.2"
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Nominal base release of the train (X.Y.0)
    pub fn base_version(&self) -> String {
        format!("{}.{}.0", self.major, self.minor)
    }

    pub fn same_train(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
