//! Applies a performance profile to one process handle.

use std::sync::Arc;
use tracing::debug;

use crate::core::profile::{PerformanceProfile, PolicyResult};
use crate::platform::{PlatformResult, ProcessControl, ProcessHandle};

pub struct PolicyApplier {
    control: Arc<dyn ProcessControl>,
    cores: usize,
}

impl PolicyApplier {
    pub fn new(control: Arc<dyn ProcessControl>, cores: usize) -> Self {
        Self { control, cores }
    }

    /// Attempt priority, affinity, throttling and I/O priority
    /// independently. A rejected attribute never prevents the others from
    /// being tried.
    pub fn apply(&self, handle: &ProcessHandle, profile: PerformanceProfile) -> PolicyResult {
        let tuple = profile.policy(self.cores);

        PolicyResult {
            applied_priority: attempt(handle, "priority", || {
                self.control.set_priority(handle, tuple.priority)
            }),
            applied_affinity: attempt(handle, "affinity", || {
                self.control.set_affinity(handle, tuple.affinity)
            }),
            applied_throttle: attempt(handle, "throttling", || {
                self.control.set_power_throttling(handle, tuple.throttling)
            }),
            applied_io_priority: attempt(handle, "io_priority", || {
                self.control.set_io_priority(handle, tuple.io_priority)
            }),
        }
    }
}

fn attempt(handle: &ProcessHandle, attribute: &str, op: impl FnOnce() -> PlatformResult<()>) -> bool {
    match op() {
        Ok(()) => true,
        Err(e) => {
            debug!(pid = handle.pid(), attribute, error = %e, "Policy attribute rejected");
            false
        }
    }
}
