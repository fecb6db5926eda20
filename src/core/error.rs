//! Error taxonomy shared by the monitor, the service controller and the
//! configuration loader

use serde::Serialize;
use std::fmt;

use crate::platform::PlatformError;

/// A rule that could not be accepted. The rule is skipped; the rest of the
/// rule set stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub rule: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid rule '{}': {}", self.rule, self.reason)
    }
}

impl std::error::Error for ConfigurationError {}

/// Failure to read the configuration file as a whole.
#[derive(Debug)]
pub enum ConfigLoadError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadError::Io(e) => write!(f, "Config I/O error: {}", e),
            ConfigLoadError::Parse(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Io(e) => Some(e),
            ConfigLoadError::Parse(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigLoadError {
    fn from(e: std::io::Error) -> Self {
        ConfigLoadError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigLoadError {
    fn from(e: toml::de::Error) -> Self {
        ConfigLoadError::Parse(e.to_string())
    }
}

/// Why an explicit service action failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServiceActionFailure {
    AccessDenied(String),
    Timeout(String),
    NotFound(String),
    Os(String),
}

impl From<PlatformError> for ServiceActionFailure {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::PermissionDenied(msg) => ServiceActionFailure::AccessDenied(msg),
            PlatformError::NotFound(msg) => ServiceActionFailure::NotFound(msg),
            PlatformError::Timeout(msg) => ServiceActionFailure::Timeout(msg),
            other => ServiceActionFailure::Os(other.to_string()),
        }
    }
}

impl fmt::Display for ServiceActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceActionFailure::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            ServiceActionFailure::Timeout(msg) => write!(f, "Timed out: {}", msg),
            ServiceActionFailure::NotFound(msg) => write!(f, "Service not found: {}", msg),
            ServiceActionFailure::Os(msg) => write!(f, "Service error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceActionFailure {}

/// Classification carried by `CycleError` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleErrorKind {
    /// Permission race or process exit mid-operation; retried next cycle
    TransientOs,
    /// Some policy attributes were rejected
    PartialPolicyFailure,
    /// A user-triggered service action failed
    ServiceActionFailure,
    /// A rule was rejected
    Configuration,
    /// Internal invariant broken; monitoring was stopped
    Fatal,
}

impl fmt::Display for CycleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleErrorKind::TransientOs => "transient OS error",
            CycleErrorKind::PartialPolicyFailure => "partial policy failure",
            CycleErrorKind::ServiceActionFailure => "service action failure",
            CycleErrorKind::Configuration => "configuration error",
            CycleErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Failure to talk to the monitor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The monitor task has shut down
    Closed,
    /// The command was refused
    Rejected(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Closed => write!(f, "Monitor task is not running"),
            MonitorError::Rejected(msg) => write!(f, "Command rejected: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<ConfigurationError> for MonitorError {
    fn from(e: ConfigurationError) -> Self {
        MonitorError::Rejected(e.to_string())
    }
}
