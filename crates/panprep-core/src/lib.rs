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

//! PanPrep core - provisioning of PAN-OS firewalls over an interactive CLI
//!
//! Takes a factory-default device through initial configuration, licensing,
//! content update and a multi-hop PAN-OS upgrade. The crate never opens a
//! socket for commands itself: everything goes through [`CommandSession`],
//! and the SSH transport lives in the binary.

pub mod cancel;
pub mod config;
pub mod error;
pub mod poller;
pub mod progress;
pub mod reachability;
pub mod remediation;
pub mod session;
pub mod setup;
pub mod stages;
pub mod upgrade;
pub mod upgrade_path;
pub mod version;

pub use cancel::CancellationFlag;
pub use config::{PrepConfig, TuningConfig};
pub use error::{PrepError, Result};
pub use progress::{ChannelSink, NotificationKind, ProgressEvent, ProgressSink, Reporter};
pub use reachability::{ReachabilityProbe, TcpProbe};
pub use session::{CommandSession, Credentials, ScopedSession, SessionFactory, SessionTarget};
pub use setup::{SetupConfig, SetupOrchestrator, SetupRun, spawn_setup};
pub use upgrade::{Connector, UpgradeOrchestrator, UpgradeSettings, upgrade_firewall};
pub use upgrade_path::{UpgradeMap, base_version_for, plan_upgrade_path};
pub use version::Version;
