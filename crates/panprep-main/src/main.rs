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

mod cli;
mod ssh;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, PlanArgs, SetupArgs, UpgradeArgs};
use panprep_core::{
    CancellationFlag, ChannelSink, Connector, Credentials, NotificationKind, PrepConfig,
    ProgressEvent, Reporter, SessionTarget, SetupConfig, TcpProbe, TuningConfig, UpgradeMap,
    UpgradeSettings, plan_upgrade_path, spawn_setup, upgrade_firewall,
};
use ssh::SshSessionFactory;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "panprep=debug,panprep_core=debug"
    } else {
        "panprep=info,panprep_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Setup(args) => setup(&args, cli.json).await,
        Commands::Upgrade(args) => upgrade(args, cli.json).await,
        Commands::Plan(args) => plan(&args, cli.json),
    }
}

fn ssh_connector() -> Connector {
    Connector::new(Arc::new(SshSessionFactory), Arc::new(TcpProbe))
}

/// Cancel `flag` on Ctrl-C; the run stops at the next phase or hop boundary
fn cancel_on_interrupt(flag: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            flag.cancel();
        }
    });
}

async fn setup(args: &SetupArgs, json: bool) -> anyhow::Result<bool> {
    info!(path = %args.config.display(), "Loading configuration");
    let config = PrepConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let cancel = CancellationFlag::new();
    cancel_on_interrupt(cancel.clone());

    let (handle, events) = spawn_setup(SetupConfig::from(&config), ssh_connector(), cancel);
    print_events(events, json).await?;
    handle.await.context("Setup task panicked")
}

async fn upgrade(args: UpgradeArgs, json: bool) -> anyhow::Result<bool> {
    let settings = match &args.config {
        Some(path) => TuningConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .upgrade_settings(),
        None => UpgradeSettings::default(),
    };
    let target = SessionTarget::new(args.host, Credentials::new(args.username, args.password))
        .with_port(args.port);

    let cancel = CancellationFlag::new();
    cancel_on_interrupt(cancel.clone());

    let (tx, events) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx));
    let reporter = Reporter::new(Arc::clone(&sink) as _);
    let target_version = args.target;

    let handle = tokio::spawn(async move {
        let success = upgrade_firewall(
            target,
            &target_version,
            ssh_connector(),
            settings,
            reporter,
            &cancel,
        )
        .await;
        sink.finished(success);
        success
    });

    print_events(events, json).await?;
    handle.await.context("Upgrade task panicked")
}

fn plan(args: &PlanArgs, json: bool) -> anyhow::Result<bool> {
    let map = match &args.config {
        Some(path) => TuningConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .upgrade_map(),
        None => UpgradeMap::panos_default(),
    };
    let path = plan_upgrade_path(&args.current, &args.target, &map)
        .context("Failed to plan upgrade path")?;

    if json {
        let out = serde_json::json!({
            "current": args.current,
            "target": args.target,
            "path": path,
        });
        println!("{out}");
    } else if path.is_empty() {
        println!("{} is already at or past {}", args.current, args.target);
    } else {
        println!("{} -> {}", args.current, path.join(" -> "));
    }
    Ok(true)
}

/// Drain the progress channel until the worker hangs up
async fn print_events(mut events: UnboundedReceiver<ProgressEvent>, json: bool) -> anyhow::Result<()> {
    let mut last_percent: Option<f32> = None;
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            // Statuses already reach the log
            ProgressEvent::Status { .. } | ProgressEvent::Finished { .. } => {}
            ProgressEvent::Progress { percent, .. } => {
                let rounded = percent.round();
                if last_percent.is_none_or(|last| (rounded - last).abs() >= 1.0) {
                    println!("[{rounded:>3}%]");
                    last_percent = Some(rounded);
                }
            }
            ProgressEvent::Notification {
                kind,
                title,
                message,
                ..
            } => {
                let marker = match kind {
                    NotificationKind::Success => "OK",
                    NotificationKind::Error => "FAILED",
                };
                println!("\n[{marker}] {title}\n{message}\n");
            }
        }
    }
    Ok(())
}
