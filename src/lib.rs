//! ACE Governor
//!
//! A background policy engine for anti-cheat helper processes on Windows.
//! Processes are matched by executable name against a rule set and held at
//! the rule's performance profile: priority class, CPU affinity and power
//! throttling. Popups from watched processes are dismissed and their working
//! sets trimmed on a fixed interval. The anti-cheat services can be
//! inspected, stopped, disabled or deleted on request.
//!
//! ## Layout
//!
//! - [`core`]: profiles, rules, configuration and per-process applied state
//! - [`platform`]: the OS seams as traits, plus the Win32 wiring
//! - [`monitor`]: the polling loop, its components and the command handle
//! - [`security`]: elevation and `SeDebugPrivilege`
//!
//! ## Safety
//!
//! - Rules can never target protected system processes
//! - Every OS call is best-effort; a refusal is recorded, never fatal
//! - Process handles live for exactly one cycle

pub mod core;
pub mod monitor;
pub mod platform;
pub mod security;

#[cfg(windows)]
pub mod windows;

#[cfg(windows)]
pub mod tray;

// Re-exports
pub use crate::core::config::GovernorConfig;
pub use crate::core::error::{ConfigurationError, CycleErrorKind, MonitorError, ServiceActionFailure};
pub use crate::core::profile::{PerformanceProfile, PolicyResult, PriorityClass};
pub use crate::core::rules::{ProcessRule, RuleSet};
pub use crate::monitor::{
    spawn_monitor, CycleReport, MonitorEvent, MonitorHandle, MonitorLoop, MonitorSnapshot,
    MonitorState, ServiceAction, ServiceController, ServiceDescriptor, ServiceReport,
    ServiceState,
};
pub use crate::platform::{Platform, PlatformError, PlatformResult};
pub use crate::security::PrivilegeManager;

#[cfg(windows)]
pub use crate::platform::create_platform;
