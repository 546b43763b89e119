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

//! Progress reporting from the provisioning worker to its supervisor

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Receives status text, a 0-100 progress value and terminal notifications.
///
/// Called from the worker task; implementations must be thread safe.
pub trait ProgressSink: Send + Sync {
    fn status(&self, message: &str);

    fn progress(&self, percent: f32);

    fn notify(&self, kind: NotificationKind, title: &str, message: &str);
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn status(&self, message: &str) {
        debug!("{message}");
    }

    fn progress(&self, percent: f32) {
        debug!(percent, "Progress");
    }

    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        match kind {
            NotificationKind::Success => info!(title, "{message}"),
            NotificationKind::Error => error!(title, "{message}"),
        }
    }
}

/// Message sent to the supervisor over the progress channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        at: DateTime<Utc>,
        message: String,
    },
    Progress {
        at: DateTime<Utc>,
        percent: f32,
    },
    Notification {
        at: DateTime<Utc>,
        kind: NotificationKind,
        title: String,
        message: String,
    },
    Finished {
        at: DateTime<Utc>,
        success: bool,
    },
}

/// Forwards everything to an mpsc channel. A closed receiver is ignored:
/// the run keeps going even if nobody is listening any more.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn finished(&self, success: bool) {
        let _ = self.tx.send(ProgressEvent::Finished {
            at: Utc::now(),
            success,
        });
    }
}

impl ProgressSink for ChannelSink {
    fn status(&self, message: &str) {
        let _ = self.tx.send(ProgressEvent::Status {
            at: Utc::now(),
            message: message.to_owned(),
        });
    }

    fn progress(&self, percent: f32) {
        let _ = self.tx.send(ProgressEvent::Progress {
            at: Utc::now(),
            percent: percent.clamp(0.0, 100.0),
        });
    }

    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        let _ = self.tx.send(ProgressEvent::Notification {
            at: Utc::now(),
            kind,
            title: title.to_owned(),
            message: message.to_owned(),
        });
    }
}

/// Logs a status line and forwards it to the sink.
///
/// Stages and orchestrators hold one of these instead of a raw sink so every
/// user-visible message also lands in the log.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ProgressSink>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    pub fn tracing_only() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn status(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{message}");
        self.sink.status(message);
    }

    pub fn progress(&self, percent: f32) {
        self.sink.progress(percent);
    }

    pub fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        self.sink.notify(kind, title, message);
    }

    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.sink)
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

/// Maps phase-local progress (0-100) onto a slice of the overall bar
pub struct PhaseSink {
    parent: Arc<dyn ProgressSink>,
    phase_index: usize,
    phase_count: usize,
}

impl PhaseSink {
    pub fn new(parent: Arc<dyn ProgressSink>, phase_index: usize, phase_count: usize) -> Self {
        Self {
            parent,
            phase_index,
            phase_count: phase_count.max(1),
        }
    }

    /// overall = phase * weight + local * weight / 100
    #[expect(clippy::cast_precision_loss)]
    pub fn overall(phase_index: usize, phase_count: usize, local_percent: f32) -> f32 {
        let weight = 100.0 / phase_count.max(1) as f32;
        let local = local_percent.clamp(0.0, 100.0);
        (phase_index as f32 * weight + local * weight / 100.0).clamp(0.0, 100.0)
    }
}

impl ProgressSink for PhaseSink {
    fn status(&self, message: &str) {
        self.parent.status(message);
    }

    fn progress(&self, percent: f32) {
        self.parent
            .progress(Self::overall(self.phase_index, self.phase_count, percent));
    }

    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        self.parent.notify(kind, title, message);
    }
}
