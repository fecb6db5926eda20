//! Platform abstraction
//!
//! The monitor only talks to the OS through the traits in [`traits`]. On
//! Windows [`create_platform`] wires up the real backends from
//! `crate::windows`.

pub mod traits;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

pub use traits::{
    PlatformError, PlatformResult, ProcessControl, ProcessHandle, ProcessRecord, ProcessSnapshot,
    ProcessSource, ServiceBackend, ServiceQuery, ServiceRunState, ServiceStartKind, SkippedProcess,
    WindowInfo, WindowSource,
};

/// The set of OS backends the monitor runs against.
pub struct Platform {
    pub processes: Box<dyn ProcessSource>,
    pub control: Arc<dyn ProcessControl>,
    pub windows: Box<dyn WindowSource>,
    pub services: Arc<dyn ServiceBackend>,
}

impl Platform {
    pub fn new(
        processes: Box<dyn ProcessSource>,
        control: Arc<dyn ProcessControl>,
        windows: Box<dyn WindowSource>,
        services: Arc<dyn ServiceBackend>,
    ) -> Self {
        Self {
            processes,
            control,
            windows,
            services,
        }
    }
}

/// Real Windows backends.
#[cfg(target_os = "windows")]
pub fn create_platform() -> Platform {
    use crate::windows::{
        process::SnapshotSource, policy::Win32ProcessControl, service::ScmBackend,
        window::Win32WindowSource,
    };

    Platform::new(
        Box::new(SnapshotSource::new()),
        Arc::new(Win32ProcessControl),
        Box::new(Win32WindowSource),
        Arc::new(ScmBackend),
    )
}
