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

mod common;

use common::{FakeFirewall, FakeSession, NEW_IP, NEW_PASSWORD, factory_target, provisioned_target};
use panprep_core::session::CommandSession;
use panprep_core::stages::content::ContentTimeouts;
use panprep_core::stages::software::SoftwareTimeouts;
use panprep_core::stages::{
    ContentStage, InitialConfigStage, LicenseStage, NetworkSettings, RebootOutcome, RetryPolicy,
    SoftwareStage, read_software_version,
};
use panprep_core::{PrepError, Reporter, UpgradeMap};
use std::time::Duration;
use tokio::time::Instant;

async fn connected(device: &FakeFirewall, provisioned: bool) -> FakeSession {
    let target = if provisioned {
        provisioned_target()
    } else {
        factory_target()
    };
    let mut session = device.session(&target);
    session.connect().await.unwrap();
    session
}

fn network() -> NetworkSettings {
    NetworkSettings {
        new_ip: NEW_IP.to_owned(),
        subnet_mask: "255.255.255.0".to_owned(),
        gateway: "10.0.0.1".to_owned(),
        dns_servers: vec!["1.1.1.1".to_owned()],
    }
}

// ---------------------------------------------------------------------------
// Initial configuration
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_initial_setup_command_sequence() {
    let device = FakeFirewall::new("10.1.0");
    let mut session = connected(&device, false).await;
    let stage = InitialConfigStage::new(Reporter::tracing_only(), Duration::from_secs(300));

    stage
        .perform_initial_setup(&mut session, &network(), NEW_PASSWORD)
        .await
        .unwrap();

    assert_eq!(
        device.commands(),
        vec![
            "configure",
            "set deviceconfig system ip-address 10.0.0.10",
            "set deviceconfig system netmask 255.255.255.0",
            "set deviceconfig system default-gateway 10.0.0.1",
            "exit",
            "configure",
            "set deviceconfig system dns-setting servers primary 1.1.1.1",
            "exit",
            "configure",
            "set mgt-config users admin password",
            NEW_PASSWORD,
            NEW_PASSWORD,
            "exit",
            "commit",
        ]
    );

    let state = device.state();
    assert_eq!(state.host, NEW_IP);
    assert_eq!(state.credentials.password, NEW_PASSWORD);
}

#[tokio::test(start_paused = true)]
async fn test_missing_dns_falls_back_to_public_resolver() {
    let device = FakeFirewall::new("10.1.0");
    let mut session = connected(&device, false).await;
    let stage = InitialConfigStage::new(Reporter::tracing_only(), Duration::from_secs(300));
    let mut settings = network();
    settings.dns_servers.clear();

    stage
        .perform_initial_setup(&mut session, &settings, NEW_PASSWORD)
        .await
        .unwrap();

    assert_eq!(
        device.commands_starting_with("set deviceconfig system dns-setting"),
        vec!["set deviceconfig system dns-setting servers primary 8.8.8.8"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_step_still_leaves_configure_mode() {
    let device = FakeFirewall::new("10.1.0");
    device.script(
        "set deviceconfig system netmask 255.255.255.0",
        Ok("Invalid syntax.".to_owned()),
    );
    let mut session = connected(&device, false).await;
    let stage = InitialConfigStage::new(Reporter::tracing_only(), Duration::from_secs(300));

    let err = stage
        .set_management_ip(&mut session, NEW_IP, "255.255.255.0", "10.0.0.1")
        .await
        .unwrap_err();

    assert!(matches!(err, PrepError::CommandRejected { ref command, .. } if command.contains("netmask")));
    let commands = device.commands();
    assert_eq!(commands.last().map(String::as_str), Some("exit"));
    // The gateway step was skipped
    assert!(!commands.iter().any(|c| c.contains("default-gateway")));
}

#[tokio::test(start_paused = true)]
async fn test_failed_commit() {
    let device = FakeFirewall::new("10.1.0");
    device.script("commit", Ok("Commit failed: validation error".to_owned()));
    let mut session = connected(&device, false).await;
    let stage = InitialConfigStage::new(Reporter::tracing_only(), Duration::from_secs(300));

    let err = stage.commit(&mut session).await.unwrap_err();
    assert!(err.to_string().contains("commit"));
}

// ---------------------------------------------------------------------------
// Licensing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_license_retry_recovers() {
    let device = FakeFirewall::provisioned("10.1.0");
    device.script("request license fetch", Err(PrepError::transport("read timed out")));
    device.script("request license fetch", Ok("Failed to fetch licenses".to_owned()));
    let mut session = connected(&device, true).await;
    let stage = LicenseStage::new(Reporter::tracing_only(), Duration::from_secs(120));
    let start = Instant::now();

    stage
        .fetch_with_retry(&mut session, RetryPolicy::default())
        .await
        .unwrap();

    assert_eq!(device.count("request license fetch"), 3);
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert!(device.state().licensed);
}

#[tokio::test(start_paused = true)]
async fn test_license_retry_exhausted() {
    let device = FakeFirewall::provisioned("10.1.0");
    for _ in 0..3 {
        device.script(
            "request license fetch",
            Ok("Error: Unable to connect to licensing server".to_owned()),
        );
    }
    let mut session = connected(&device, true).await;
    let stage = LicenseStage::new(Reporter::tracing_only(), Duration::from_secs(120));

    let err = stage
        .fetch_with_retry(&mut session, RetryPolicy::default())
        .await
        .unwrap_err();

    match err {
        PrepError::LicenseFetchExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("internet connectivity"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.count("request license info"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_license_verification_is_advisory() {
    let device = FakeFirewall::provisioned("10.1.0");
    device.script("request license info", Ok("No licenses installed".to_owned()));
    let mut session = connected(&device, true).await;
    let stage = LicenseStage::new(Reporter::tracing_only(), Duration::from_secs(120));

    stage
        .fetch_with_retry(&mut session, RetryPolicy::default())
        .await
        .unwrap();
    assert_eq!(device.count("request license fetch"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognised_license_reply_passes_through() {
    let device = FakeFirewall::provisioned("10.1.0");
    device.script("request license fetch", Ok("Nothing to fetch".to_owned()));
    let mut session = connected(&device, true).await;
    let stage = LicenseStage::new(Reporter::tracing_only(), Duration::from_secs(120));

    let output = stage.fetch(&mut session).await.unwrap();
    assert_eq!(output, "Nothing to fetch");
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_content_update_polls_jobs() {
    let device = FakeFirewall::provisioned("10.1.0");
    let mut session = connected(&device, true).await;
    let stage = ContentStage::new(Reporter::tracing_only(), ContentTimeouts::default());
    let start = Instant::now();

    stage.update(&mut session).await.unwrap();

    assert_eq!(
        device.commands(),
        vec![
            "request content upgrade download latest",
            "request content upgrade info",
            "request content upgrade install version latest",
            "request content upgrade info",
        ]
    );
    // One 10 s interval before each poll
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(device.state().content_installed);
}

#[tokio::test(start_paused = true)]
async fn test_content_already_downloaded() {
    let device = FakeFirewall::provisioned("10.1.0");
    device.script(
        "request content upgrade download latest",
        Ok("Content already downloaded".to_owned()),
    );
    let mut session = connected(&device, true).await;
    let stage = ContentStage::new(Reporter::tracing_only(), ContentTimeouts::default());

    stage.download_latest(&mut session).await.unwrap();
    assert_eq!(device.count("request content upgrade info"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_content_download_job_failure() {
    let device = FakeFirewall::provisioned("10.1.0");
    device.script(
        "request content upgrade info",
        Ok("Download of 8799-8509 failed: server unreachable".to_owned()),
    );
    let mut session = connected(&device, true).await;
    let stage = ContentStage::new(Reporter::tracing_only(), ContentTimeouts::default());

    let err = stage.download_latest(&mut session).await.unwrap_err();
    assert!(matches!(err, PrepError::JobFailed { .. }));
    assert_eq!(device.count("request content upgrade info"), 1);
}

// ---------------------------------------------------------------------------
// Software
// ---------------------------------------------------------------------------

fn software_stage() -> SoftwareStage {
    SoftwareStage::new(
        Reporter::tracing_only(),
        UpgradeMap::panos_default(),
        SoftwareTimeouts::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_base_release_download_is_skipped_for_base_version() {
    let device = FakeFirewall::provisioned("10.2.4");
    let mut session = connected(&device, true).await;

    software_stage().download(&mut session, "11.0.0").await.unwrap();

    assert_eq!(
        device.commands_starting_with("request system software download"),
        vec!["request system software download version 11.0.0"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_base_download_only_when_base_predates_target() {
    let device = FakeFirewall::provisioned("11.2.4");
    let mut session = connected(&device, true).await;

    // 12.1.1 sits below the 12.1 base image 12.1.2, so nothing newer is staged
    software_stage().download(&mut session, "12.1.1").await.unwrap();
    assert_eq!(
        device.commands_starting_with("request system software download"),
        vec!["request system software download version 12.1.1"]
    );

    software_stage().download(&mut session, "12.1.4").await.unwrap();
    assert_eq!(
        device.commands_starting_with("request system software download"),
        vec![
            "request system software download version 12.1.1",
            "request system software download version 12.1.2",
            "request system software download version 12.1.4",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_download_rejected() {
    let device = FakeFirewall::provisioned("10.2.4");
    device.script(
        "request system software download version 11.0.0",
        Ok("Server error: image not found".to_owned()),
    );
    let mut session = connected(&device, true).await;

    let err = software_stage()
        .download_version(&mut session, "11.0.0", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, PrepError::CommandRejected { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_install_polling_tolerates_transport_errors() {
    let device = FakeFirewall::provisioned("10.2.4");
    device.script("show jobs all", Err(PrepError::transport("channel closed")));
    device.script("show jobs all", Ok("5  SWInstall  ACT  PENDING  0%".to_owned()));
    let mut session = connected(&device, true).await;

    software_stage().install(&mut session, "11.0.0").await.unwrap();
    assert_eq!(device.count("show jobs all"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_install_times_out() {
    let device = FakeFirewall::provisioned("10.2.4");
    for _ in 0..50 {
        device.script("show jobs all", Ok("5  SWInstall  ACT  RUNNING  40%".to_owned()));
    }
    let mut session = connected(&device, true).await;

    let err = software_stage()
        .install(&mut session, "11.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, PrepError::JobTimeout { timeout, .. } if timeout == Duration::from_secs(1200)));
    assert_eq!(device.count("show jobs all"), 40);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_connection_drop_is_expected() {
    let device = FakeFirewall::provisioned("10.2.4");
    let mut session = connected(&device, true).await;

    let outcome = software_stage().reboot(&mut session).await;

    assert_eq!(outcome, RebootOutcome::ConnectionDropped);
    assert!(!session.is_alive());
    assert_eq!(device.state().reboots, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reboot_confirmed() {
    let device = FakeFirewall::provisioned("10.2.4");
    device.script("y", Ok("System restart scheduled".to_owned()));
    let mut session = connected(&device, true).await;

    let outcome = software_stage().reboot(&mut session).await;
    assert_eq!(outcome, RebootOutcome::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_read_software_version() {
    let device = FakeFirewall::provisioned("10.2.4-h2");
    let mut session = connected(&device, true).await;

    let version = read_software_version(&mut session).await.unwrap();
    assert_eq!(version, "10.2.4-h2");
}
