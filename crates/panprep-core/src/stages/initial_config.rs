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

//! First-boot configuration: management address, DNS and admin password

use crate::error::{PrepError, Result};
use crate::progress::Reporter;
use crate::session::CommandSession;
use std::time::Duration;
use tracing::{debug, warn};

const FALLBACK_DNS: &str = "8.8.8.8";
const REJECTION_MARKERS: &[&str] = &["error", "invalid"];

/// Management network settings applied during initial configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub new_ip: String,
    pub subnet_mask: String,
    pub gateway: String,
    /// One or two servers; the first is primary
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InitialConfigStage {
    reporter: Reporter,
    commit_timeout: Duration,
}

impl InitialConfigStage {
    pub fn new(reporter: Reporter, commit_timeout: Duration) -> Self {
        Self {
            reporter,
            commit_timeout,
        }
    }

    pub async fn set_management_ip(
        &self,
        session: &mut dyn CommandSession,
        ip: &str,
        mask: &str,
        gateway: &str,
    ) -> Result<()> {
        self.reporter
            .status(format!("Setting management IP to {ip}..."));
        let commands = [
            format!("set deviceconfig system ip-address {ip}"),
            format!("set deviceconfig system netmask {mask}"),
            format!("set deviceconfig system default-gateway {gateway}"),
        ];
        self.apply(session, &commands).await?;
        self.reporter.status("Management IP configured");
        Ok(())
    }

    pub async fn set_dns_servers(
        &self,
        session: &mut dyn CommandSession,
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<()> {
        self.reporter.status("Setting DNS servers...");
        let mut commands = vec![format!(
            "set deviceconfig system dns-setting servers primary {primary}"
        )];
        if let Some(secondary) = secondary {
            commands.push(format!(
                "set deviceconfig system dns-setting servers secondary {secondary}"
            ));
        }
        self.apply(session, &commands).await?;
        self.reporter.status("DNS servers configured");
        Ok(())
    }

    /// Answer the interactive password prompt twice
    pub async fn change_admin_password(
        &self,
        session: &mut dyn CommandSession,
        new_password: &str,
    ) -> Result<()> {
        self.reporter.status("Changing admin password...");
        session.send_command_timing("configure").await?;

        let result = answer_password_prompts(session, new_password).await;

        exit_configure_mode(session).await;
        result?;
        self.reporter.status("Admin password changed");
        Ok(())
    }

    pub async fn commit(&self, session: &mut dyn CommandSession) -> Result<String> {
        self.reporter.status("Committing configuration...");
        let output = session.send_command("commit", self.commit_timeout).await?;
        let lower = output.to_lowercase();

        if lower.contains("failed") {
            return Err(PrepError::CommandRejected {
                command: "commit".to_owned(),
                output,
            });
        }
        if lower.contains("success") {
            self.reporter.status("Configuration committed successfully");
        } else {
            self.reporter.status("Configuration commit completed");
        }
        Ok(output)
    }

    /// Management IP, DNS, password, then a single commit
    pub async fn perform_initial_setup(
        &self,
        session: &mut dyn CommandSession,
        network: &NetworkSettings,
        new_password: &str,
    ) -> Result<()> {
        self.reporter.status("Starting initial configuration...");

        self.set_management_ip(session, &network.new_ip, &network.subnet_mask, &network.gateway)
            .await?;

        let primary = network
            .dns_servers
            .first()
            .map_or(FALLBACK_DNS, String::as_str);
        let secondary = network.dns_servers.get(1).map(String::as_str);
        self.set_dns_servers(session, primary, secondary).await?;

        self.change_admin_password(session, new_password).await?;
        self.commit(session).await?;

        self.reporter.status("Initial configuration complete");
        Ok(())
    }

    /// Run `commands` inside configure mode, leaving it on every path
    async fn apply(&self, session: &mut dyn CommandSession, commands: &[String]) -> Result<()> {
        session.send_command_timing("configure").await?;

        let mut result = Ok(());
        for command in commands {
            debug!(command = %command, "Executing");
            match session.send_command_timing(command).await {
                Ok(output) if is_rejected(&output) => {
                    result = Err(PrepError::CommandRejected {
                        command: command.clone(),
                        output,
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        exit_configure_mode(session).await;
        result
    }
}

async fn answer_password_prompts(session: &mut dyn CommandSession, new_password: &str) -> Result<()> {
    let command = "set mgt-config users admin password";
    session.send_command_timing(command).await?;
    session.send_command_timing(new_password).await?;
    let output = session.send_command_timing(new_password).await?;
    if output.to_lowercase().contains("error") {
        return Err(PrepError::CommandRejected {
            command: command.to_owned(),
            output,
        });
    }
    Ok(())
}

fn is_rejected(output: &str) -> bool {
    let lower = output.to_lowercase();
    REJECTION_MARKERS.iter().any(|m| lower.contains(m))
}

async fn exit_configure_mode(session: &mut dyn CommandSession) {
    if let Err(e) = session.send_command_timing("exit").await {
        warn!("Failed to leave configure mode: {e}");
    }
}
