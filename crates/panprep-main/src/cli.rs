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

//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "panprep")]
#[command(author, version, about = "Provision and upgrade PAN-OS firewalls over SSH")]
#[command(
    long_about = "Takes a factory-default PAN-OS firewall to a configured, licensed and upgraded state.\n\
    \nThe full run has four phases: initial configuration, licensing, content update and\n\
    a multi-hop PAN-OS upgrade. Each phase must succeed before the next one starts.\n\
    \nExamples:\n  \
    panprep setup --config firewall.toml\n  \
    panprep upgrade --host 10.0.0.10 --password 'Secr3tPass' --target 11.2.4\n  \
    panprep plan --current 9.1.0 --target 11.2.4"
)]
pub struct Cli {
    /// Print progress events as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run all four setup phases against a factory-default firewall
    #[command(
        long_about = "Connect to the firewall on its factory address, configure management networking\n\
        and the admin password, then fetch licenses, update content and upgrade PAN-OS.\n\
        \nThe config file holds the [device], [network] and optional [timeouts] and\n\
        [upgrade_map] tables plus new_password and target_version.\n\
        \nExamples:\n  \
        panprep setup --config firewall.toml\n  \
        panprep setup --config firewall.toml --json > events.jsonl"
    )]
    Setup(SetupArgs),

    /// Upgrade an already configured firewall
    #[command(
        long_about = "Upgrade PAN-OS hop by hop on a firewall that is already reachable.\n\
        \nEach hop downloads, installs and reboots, then waits for the firewall to return.\n\
        Timeouts and the upgrade map can be taken from a config file.\n\
        \nExamples:\n  \
        panprep upgrade --host 10.0.0.10 --password 'Secr3tPass' --target 11.2.4\n  \
        panprep upgrade --host fw1 --password 'Secr3tPass' --target 12.1.4 --config tuning.toml"
    )]
    Upgrade(UpgradeArgs),

    /// Print the upgrade path between two versions without touching a device
    Plan(PlanArgs),
}

#[derive(Debug, Parser)]
pub struct SetupArgs {
    /// Run configuration file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Debug, Parser)]
pub struct UpgradeArgs {
    /// Management address of the firewall
    #[arg(long)]
    pub host: String,

    #[arg(long, default_value = "admin")]
    pub username: String,

    #[arg(long)]
    pub password: String,

    #[arg(long, default_value_t = 22)]
    pub port: u16,

    /// Target PAN-OS version, e.g. 11.2.4
    #[arg(long)]
    pub target: String,

    /// Optional file with [timeouts] and [upgrade_map] tables
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct PlanArgs {
    /// Version currently running
    #[arg(long)]
    pub current: String,

    #[arg(long)]
    pub target: String,

    /// Optional file with an [upgrade_map] table
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
