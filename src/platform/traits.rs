//! OS seams used by the monitor loop
//!
//! Every operation that touches the operating system goes through one of
//! the traits defined here. The Windows implementations live in
//! `src/windows/`; tests use the in-memory platform in `platform::mock`.
//!
//! ```text
//! +-----------------+   +----------------+   +--------------+   +----------------+
//! | ProcessSource   |   | ProcessControl |   | WindowSource |   | ServiceBackend |
//! +-----------------+   +----------------+   +--------------+   +----------------+
//!         |                     |                   |                   |
//!         +---------------------+---------+---------+-------------------+
//!                                         |
//!                                  +------v------+
//!                                  | MonitorLoop |
//!                                  +-------------+
//! ```

use std::collections::HashSet;
use std::fmt;

use crate::core::profile::{IoPriority, PriorityClass};

// ============================================================================
// Error Types
// ============================================================================

/// Error returned by every OS backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Access denied (protected process, missing privilege, not elevated)
    PermissionDenied(String),
    /// Process, window or service does not exist
    NotFound(String),
    /// The process went away between enumeration and the call
    ProcessExited(u32),
    /// Operation not supported on this platform
    NotSupported(String),
    /// Operation did not complete in time
    Timeout(String),
    /// System call failed with an OS error code
    SystemError { code: i32, message: String },
    /// Internal error
    Internal(String),
}

impl PlatformError {
    /// Map a raw Win32 error code onto the taxonomy.
    pub fn from_os_code(code: i32, context: &str) -> Self {
        match code {
            5 => PlatformError::PermissionDenied(context.to_string()),
            // ERROR_INVALID_PARAMETER: the PID no longer names a live process
            87 => PlatformError::NotFound(context.to_string()),
            // ERROR_SERVICE_DOES_NOT_EXIST
            1060 => PlatformError::NotFound(context.to_string()),
            // ERROR_SERVICE_REQUEST_TIMEOUT
            1053 => PlatformError::Timeout(context.to_string()),
            _ => PlatformError::SystemError {
                code,
                message: context.to_string(),
            },
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            PlatformError::NotFound(msg) => write!(f, "Not found: {}", msg),
            PlatformError::ProcessExited(pid) => write!(f, "Process {} exited", pid),
            PlatformError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            PlatformError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            PlatformError::SystemError { code, message } => {
                write!(f, "System error ({}): {}", code, message)
            }
            PlatformError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

// ============================================================================
// Process Types
// ============================================================================

type Closer = Box<dyn FnOnce(isize) + Send>;

/// An owned OS process handle.
///
/// The handle is released when the value is dropped, so a snapshot that
/// goes out of scope closes every handle it opened, on every exit path.
pub struct ProcessHandle {
    pid: u32,
    raw: isize,
    closer: Option<Closer>,
}

impl ProcessHandle {
    /// Wrap a raw handle together with the function that releases it.
    pub fn from_raw(pid: u32, raw: isize, closer: impl FnOnce(isize) + Send + 'static) -> Self {
        Self {
            pid,
            raw,
            closer: Some(Box::new(closer)),
        }
    }

    /// A handle that owns nothing. Backends that do not need a real handle
    /// (and tests) identify the process by PID only.
    pub fn detached(pid: u32) -> Self {
        Self {
            pid,
            raw: 0,
            closer: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn raw(&self) -> isize {
        self.raw
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(close) = self.closer.take() {
            close(self.raw);
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("raw", &format_args!("{:#x}", self.raw))
            .field("owned", &self.closer.is_some())
            .finish()
    }
}

/// One live process, valid for a single polling cycle.
#[derive(Debug)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Executable name without path, e.g. `SGuard64.exe`
    pub name: String,
    /// Opaque creation timestamp; together with the PID it identifies a
    /// process instance across cycles.
    pub start_time: u64,
    pub handle: ProcessHandle,
}

/// A wanted process that was enumerated but could not be opened or
/// queried this cycle. It is still alive as far as the snapshot knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProcess {
    pub pid: u32,
    pub name: String,
    pub error: PlatformError,
}

/// Result of one enumeration.
#[derive(Debug, Default)]
pub struct ProcessSnapshot {
    pub records: Vec<ProcessRecord>,
    pub skipped: Vec<SkippedProcess>,
}

impl ProcessSnapshot {
    /// Every wanted PID the enumeration saw, opened or not.
    pub fn live_pids(&self) -> HashSet<u32> {
        self.records
            .iter()
            .map(|r| r.pid)
            .chain(self.skipped.iter().map(|s| s.pid))
            .collect()
    }
}

/// Enumerates live processes.
pub trait ProcessSource: Send {
    /// Best-effort snapshot of the processes whose executable name passes
    /// `wanted`. A process that cannot be opened or queried lands in
    /// `skipped`; the call itself never fails.
    fn snapshot(&mut self, wanted: &dyn Fn(&str) -> bool) -> ProcessSnapshot;
}

/// Per-process scheduling and memory controls.
pub trait ProcessControl: Send + Sync {
    fn set_priority(&self, handle: &ProcessHandle, class: PriorityClass) -> PlatformResult<()>;

    fn set_affinity(&self, handle: &ProcessHandle, mask: u64) -> PlatformResult<()>;

    /// `enabled = true` requests execution-speed throttling (EcoQoS).
    fn set_power_throttling(&self, handle: &ProcessHandle, enabled: bool) -> PlatformResult<()>;

    fn set_io_priority(&self, handle: &ProcessHandle, priority: IoPriority) -> PlatformResult<()>;

    fn trim_working_set(&self, handle: &ProcessHandle) -> PlatformResult<()>;
}

// ============================================================================
// Window Types
// ============================================================================

/// A top-level window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Raw window handle value
    pub id: isize,
    /// Owning process
    pub pid: u32,
    pub title: String,
    pub class_name: String,
    pub visible: bool,
}

/// Top-level window enumeration and dismissal.
pub trait WindowSource: Send {
    fn top_level_windows(&self) -> PlatformResult<Vec<WindowInfo>>;

    /// Ask the window to close. Does not wait for it to go away.
    fn close(&self, window: &WindowInfo) -> PlatformResult<()>;
}

// ============================================================================
// Service Types
// ============================================================================

/// Raw run state as reported by the service control manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRunState {
    Running,
    Stopped,
    StartPending,
    StopPending,
    Paused,
    Other,
}

/// Configured start type of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ServiceStartKind {
    Boot,
    System,
    Auto,
    Manual,
    Disabled,
    Unknown,
}

/// Result of a single service query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceQuery {
    pub run_state: ServiceRunState,
    pub start_kind: ServiceStartKind,
}

/// Service control manager operations. Each call is a single synchronous
/// request; waiting for state changes is the controller's job.
pub trait ServiceBackend: Send + Sync {
    fn query(&self, name: &str) -> PlatformResult<ServiceQuery>;

    fn start(&self, name: &str) -> PlatformResult<()>;

    fn stop(&self, name: &str) -> PlatformResult<()>;

    fn disable(&self, name: &str) -> PlatformResult<()>;

    fn delete(&self, name: &str) -> PlatformResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_handle_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        {
            let _handle = ProcessHandle::from_raw(42, 0x1234, move |raw| {
                assert_eq!(raw, 0x1234);
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_handle_has_no_raw_value() {
        let handle = ProcessHandle::detached(7);
        assert_eq!(handle.pid(), 7);
        assert_eq!(handle.raw(), 0);
    }

    #[test]
    fn test_os_code_mapping() {
        assert!(matches!(
            PlatformError::from_os_code(5, "x"),
            PlatformError::PermissionDenied(_)
        ));
        assert!(matches!(
            PlatformError::from_os_code(1060, "x"),
            PlatformError::NotFound(_)
        ));
        assert!(matches!(
            PlatformError::from_os_code(31, "x"),
            PlatformError::SystemError { code: 31, .. }
        ));
    }

    #[test]
    fn test_live_pids_include_skipped() {
        let snapshot = ProcessSnapshot {
            records: vec![ProcessRecord {
                pid: 1,
                name: "a.exe".into(),
                start_time: 0,
                handle: ProcessHandle::detached(1),
            }],
            skipped: vec![SkippedProcess {
                pid: 2,
                name: "b.exe".into(),
                error: PlatformError::PermissionDenied("b.exe".into()),
            }],
        };
        let live = snapshot.live_pids();
        assert!(live.contains(&1));
        assert!(live.contains(&2));
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::SystemError {
            code: 1450,
            message: "SetPriorityClass".into(),
        };
        assert_eq!(err.to_string(), "System error (1450): SetPriorityClass");
    }
}
