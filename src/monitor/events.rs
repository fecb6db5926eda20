//! Events published by the monitor task

use chrono::{DateTime, Local};
use serde::Serialize;

use super::services::{ServiceAction, ServiceDescriptor, ServiceOutcome};
use crate::core::error::CycleErrorKind;
use crate::core::profile::{PerformanceProfile, PolicyResult};

/// Lifecycle state of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MonitorState::Stopped => "stopped",
            MonitorState::Running => "running",
            MonitorState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Broadcast to every subscriber. Subscribers that fall behind lose the
/// oldest events; the snapshot channel always carries the latest state.
#[derive(Debug, Clone, Serialize)]
pub enum MonitorEvent {
    StateChanged(MonitorState),
    ProcessMatched {
        name: String,
        pid: u32,
    },
    PolicyApplied {
        pid: u32,
        name: String,
        profile: PerformanceProfile,
        result: PolicyResult,
    },
    DialogClosed {
        name: String,
        title: String,
    },
    ServiceActionResult {
        descriptor: ServiceDescriptor,
        action: ServiceAction,
        outcome: ServiceOutcome,
    },
    CycleError {
        kind: CycleErrorKind,
        detail: String,
    },
}

/// Most recent error, kept in the snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: CycleErrorKind,
    pub detail: String,
    pub at: DateTime<Local>,
}

impl ErrorRecord {
    pub fn now(kind: CycleErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            at: Local::now(),
        }
    }
}
