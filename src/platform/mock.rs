//! In-memory platform for tests. Every OS call is recorded so tests can
//! assert on exactly which calls a cycle issued.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::*;
use super::Platform;
use crate::core::profile::{IoPriority, PriorityClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Priority(u32, PriorityClass),
    Affinity(u32, u64),
    Throttle(u32, bool),
    Io(u32, IoPriority),
    Trim(u32),
}

#[derive(Debug, Clone)]
struct MockProcess {
    pid: u32,
    name: String,
    start_time: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MockWorld {
    processes: Mutex<Vec<MockProcess>>,
    unopenable: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<Call>>,
    fail_priority: Mutex<HashSet<u32>>,
    fail_affinity: Mutex<HashSet<u32>>,
    fail_throttle: Mutex<HashSet<u32>>,
    fail_io: Mutex<HashSet<u32>>,
    fail_trim: Mutex<HashSet<u32>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    windows: Mutex<Vec<WindowInfo>>,
    closed_windows: Mutex<Vec<isize>>,
    close_fails: Mutex<HashSet<isize>>,
    services: Mutex<HashMap<String, ServiceQuery>>,
    denied_services: Mutex<HashSet<String>>,
    stuck_services: Mutex<HashSet<String>>,
    hung_services: Mutex<HashMap<String, Duration>>,
}

/// Cloneable handle to one shared mock world; implements every backend.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockPlatform(pub Arc<MockWorld>);

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(&self) -> Platform {
        Platform::new(
            Box::new(self.clone()),
            Arc::new(self.clone()),
            Box::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    pub fn spawn(&self, pid: u32, name: &str, start_time: u64) {
        let mut procs = self.0.processes.lock().unwrap();
        procs.retain(|p| p.pid != pid);
        procs.push(MockProcess {
            pid,
            name: name.into(),
            start_time,
        });
    }

    pub fn kill(&self, pid: u32) {
        self.0.processes.lock().unwrap().retain(|p| p.pid != pid);
    }

    pub fn set_unopenable(&self, pid: u32) {
        self.0.unopenable.lock().unwrap().insert(pid);
    }

    pub fn set_openable(&self, pid: u32) {
        self.0.unopenable.lock().unwrap().remove(&pid);
    }

    pub fn fail_priority(&self, pid: u32) {
        self.0.fail_priority.lock().unwrap().insert(pid);
    }

    pub fn fail_affinity(&self, pid: u32) {
        self.0.fail_affinity.lock().unwrap().insert(pid);
    }

    pub fn fail_throttle(&self, pid: u32) {
        self.0.fail_throttle.lock().unwrap().insert(pid);
    }

    pub fn fail_io(&self, pid: u32) {
        self.0.fail_io.lock().unwrap().insert(pid);
    }

    pub fn fail_trim(&self, pid: u32) {
        self.0.fail_trim.lock().unwrap().insert(pid);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.0.calls.lock().unwrap().clear();
    }

    pub fn trim_calls(&self, pid: u32) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::Trim(pid))
            .count()
    }

    pub fn opened_handles(&self) -> usize {
        self.0.opened.load(Ordering::SeqCst)
    }

    pub fn released_handles(&self) -> usize {
        self.0.released.load(Ordering::SeqCst)
    }

    pub fn add_window(&self, id: isize, pid: u32, title: &str, class_name: &str) {
        self.0.windows.lock().unwrap().push(WindowInfo {
            id,
            pid,
            title: title.into(),
            class_name: class_name.into(),
            visible: true,
        });
    }

    pub fn fail_close(&self, id: isize) {
        self.0.close_fails.lock().unwrap().insert(id);
    }

    pub fn closed_windows(&self) -> Vec<isize> {
        self.0.closed_windows.lock().unwrap().clone()
    }

    pub fn add_service(&self, name: &str, run_state: ServiceRunState, start_kind: ServiceStartKind) {
        self.0.services.lock().unwrap().insert(
            name.into(),
            ServiceQuery {
                run_state,
                start_kind,
            },
        );
    }

    pub fn deny_service(&self, name: &str) {
        self.0.denied_services.lock().unwrap().insert(name.into());
    }

    pub fn stick_service(&self, name: &str) {
        self.0.stuck_services.lock().unwrap().insert(name.into());
    }

    /// Every mutating call on `name` blocks for `delay` before answering.
    pub fn hang_service(&self, name: &str, delay: Duration) {
        self.0.hung_services.lock().unwrap().insert(name.into(), delay);
    }

    pub fn service(&self, name: &str) -> Option<ServiceQuery> {
        self.0.services.lock().unwrap().get(name).copied()
    }

    fn record(&self, call: Call) {
        self.0.calls.lock().unwrap().push(call);
    }

    fn outcome(&self, set: &Mutex<HashSet<u32>>, pid: u32, what: &str) -> PlatformResult<()> {
        if set.lock().unwrap().contains(&pid) {
            Err(PlatformError::PermissionDenied(format!("{} on {}", what, pid)))
        } else {
            Ok(())
        }
    }

    fn service_guard(&self, name: &str) -> PlatformResult<()> {
        let hang = self.0.hung_services.lock().unwrap().get(name).copied();
        if let Some(delay) = hang {
            std::thread::sleep(delay);
        }
        if self.0.denied_services.lock().unwrap().contains(name) {
            return Err(PlatformError::PermissionDenied(name.into()));
        }
        if !self.0.services.lock().unwrap().contains_key(name) {
            return Err(PlatformError::NotFound(name.into()));
        }
        Ok(())
    }

    fn transition(&self, name: &str, state: ServiceRunState) {
        if self.0.stuck_services.lock().unwrap().contains(name) {
            return;
        }
        if let Some(svc) = self.0.services.lock().unwrap().get_mut(name) {
            svc.run_state = state;
        }
    }
}

impl ProcessSource for MockPlatform {
    fn snapshot(&mut self, wanted: &dyn Fn(&str) -> bool) -> ProcessSnapshot {
        let procs = self.0.processes.lock().unwrap().clone();
        let unopenable = self.0.unopenable.lock().unwrap().clone();
        let mut snapshot = ProcessSnapshot::default();
        for p in procs.into_iter().filter(|p| wanted(&p.name)) {
            if unopenable.contains(&p.pid) {
                snapshot.skipped.push(SkippedProcess {
                    pid: p.pid,
                    error: PlatformError::PermissionDenied(format!("open {}", p.pid)),
                    name: p.name,
                });
                continue;
            }
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            let released = self.0.released.clone();
            snapshot.records.push(ProcessRecord {
                pid: p.pid,
                name: p.name,
                start_time: p.start_time,
                handle: ProcessHandle::from_raw(p.pid, p.pid as isize, move |_| {
                    released.fetch_add(1, Ordering::SeqCst);
                }),
            });
        }
        snapshot
    }
}

impl ProcessControl for MockPlatform {
    fn set_priority(&self, handle: &ProcessHandle, class: PriorityClass) -> PlatformResult<()> {
        self.record(Call::Priority(handle.pid(), class));
        self.outcome(&self.0.fail_priority, handle.pid(), "priority")
    }

    fn set_affinity(&self, handle: &ProcessHandle, mask: u64) -> PlatformResult<()> {
        self.record(Call::Affinity(handle.pid(), mask));
        self.outcome(&self.0.fail_affinity, handle.pid(), "affinity")
    }

    fn set_power_throttling(&self, handle: &ProcessHandle, enabled: bool) -> PlatformResult<()> {
        self.record(Call::Throttle(handle.pid(), enabled));
        self.outcome(&self.0.fail_throttle, handle.pid(), "throttle")
    }

    fn set_io_priority(&self, handle: &ProcessHandle, priority: IoPriority) -> PlatformResult<()> {
        self.record(Call::Io(handle.pid(), priority));
        self.outcome(&self.0.fail_io, handle.pid(), "io priority")
    }

    fn trim_working_set(&self, handle: &ProcessHandle) -> PlatformResult<()> {
        self.record(Call::Trim(handle.pid()));
        self.outcome(&self.0.fail_trim, handle.pid(), "trim")
    }
}

impl WindowSource for MockPlatform {
    fn top_level_windows(&self) -> PlatformResult<Vec<WindowInfo>> {
        Ok(self.0.windows.lock().unwrap().clone())
    }

    fn close(&self, window: &WindowInfo) -> PlatformResult<()> {
        if self.0.close_fails.lock().unwrap().contains(&window.id) {
            return Err(PlatformError::NotFound(format!("window {:#x}", window.id)));
        }
        self.0.closed_windows.lock().unwrap().push(window.id);
        self.0.windows.lock().unwrap().retain(|w| w.id != window.id);
        Ok(())
    }
}

impl ServiceBackend for MockPlatform {
    fn query(&self, name: &str) -> PlatformResult<ServiceQuery> {
        self.service(name)
            .ok_or_else(|| PlatformError::NotFound(name.into()))
    }

    fn start(&self, name: &str) -> PlatformResult<()> {
        self.service_guard(name)?;
        self.transition(name, ServiceRunState::Running);
        Ok(())
    }

    fn stop(&self, name: &str) -> PlatformResult<()> {
        self.service_guard(name)?;
        self.transition(name, ServiceRunState::Stopped);
        Ok(())
    }

    fn disable(&self, name: &str) -> PlatformResult<()> {
        self.service_guard(name)?;
        if let Some(svc) = self.0.services.lock().unwrap().get_mut(name) {
            svc.start_kind = ServiceStartKind::Disabled;
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> PlatformResult<()> {
        self.service_guard(name)?;
        self.0.services.lock().unwrap().remove(name);
        Ok(())
    }
}
