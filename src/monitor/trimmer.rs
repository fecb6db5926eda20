//! Periodic working-set trimming
//!
//! Trimming is throttled per process: at most one trim per interval,
//! counted from the last attempt whether or not it succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::state::AppliedEntry;
use crate::platform::{ProcessControl, ProcessHandle};

pub struct MemoryTrimmer {
    control: Arc<dyn ProcessControl>,
    interval: Duration,
}

impl MemoryTrimmer {
    pub fn new(control: Arc<dyn ProcessControl>, interval: Duration) -> Self {
        Self { control, interval }
    }

    pub fn is_due(&self, last_trim: Option<Instant>, now: Instant) -> bool {
        match last_trim {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Release the process's resident pages. Failure is logged and
    /// reported, never raised.
    pub fn trim(&self, handle: &ProcessHandle) -> bool {
        match self.control.trim_working_set(handle) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid = handle.pid(), error = %e, "Working set trim failed");
                false
            }
        }
    }

    /// Trim if due and record the attempt on the entry. Returns the outcome
    /// when a trim was attempted.
    pub fn trim_if_due(
        &self,
        entry: &mut AppliedEntry,
        handle: &ProcessHandle,
        now: Instant,
    ) -> Option<bool> {
        if !self.is_due(entry.last_trim, now) {
            return None;
        }
        let ok = self.trim(handle);
        entry.last_trim = Some(now);
        entry.last_trim_ok = Some(ok);
        Some(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::AppliedState;
    use crate::platform::mock::MockPlatform;

    fn setup() -> (MockPlatform, MemoryTrimmer, AppliedState) {
        let mock = MockPlatform::new();
        let trimmer = MemoryTrimmer::new(Arc::new(mock.clone()), Duration::from_secs(300));
        let mut state = AppliedState::new();
        state.observe(9, "SGuard64.exe", 1);
        (mock, trimmer, state)
    }

    #[test]
    fn test_trim_throttled_within_interval() {
        let (mock, trimmer, mut state) = setup();
        let handle = ProcessHandle::detached(9);
        let t0 = Instant::now();

        assert_eq!(trimmer.trim_if_due(state.get_mut(9).unwrap(), &handle, t0), Some(true));
        assert_eq!(
            trimmer.trim_if_due(state.get_mut(9).unwrap(), &handle, t0 + Duration::from_secs(299)),
            None
        );
        assert_eq!(
            trimmer.trim_if_due(state.get_mut(9).unwrap(), &handle, t0 + Duration::from_secs(300)),
            Some(true)
        );
        assert_eq!(mock.trim_calls(9), 2);
    }

    #[test]
    fn test_failed_trim_is_recorded_and_throttled() {
        let (mock, trimmer, mut state) = setup();
        mock.fail_trim(9);
        let handle = ProcessHandle::detached(9);
        let t0 = Instant::now();

        assert_eq!(trimmer.trim_if_due(state.get_mut(9).unwrap(), &handle, t0), Some(false));
        let entry = state.get(9).unwrap();
        assert_eq!(entry.last_trim_ok, Some(false));
        assert_eq!(entry.last_trim, Some(t0));
        assert!(!trimmer.is_due(entry.last_trim, t0 + Duration::from_secs(10)));
    }
}
