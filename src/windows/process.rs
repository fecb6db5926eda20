//! Windows process enumeration

use std::ffi::c_void;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, FILETIME, HANDLE};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetProcessTimes, OpenProcess, SetPriorityClass,
    BELOW_NORMAL_PRIORITY_CLASS, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION,
    PROCESS_SET_QUOTA,
};

use super::platform_error;
use crate::platform::{
    PlatformResult, ProcessHandle, ProcessRecord, ProcessSnapshot, ProcessSource, SkippedProcess,
};

/// Enumerates processes through sysinfo and opens a handle for every
/// wanted one.
pub struct SnapshotSource {
    system: System,
}

impl SnapshotSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SnapshotSource {
    fn snapshot(&mut self, wanted: &dyn Fn(&str) -> bool) -> ProcessSnapshot {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let mut snapshot = ProcessSnapshot::default();
        for (pid, process) in self.system.processes() {
            let name = process.name().to_string_lossy().to_string();
            if !wanted(&name) {
                continue;
            }
            let pid = pid.as_u32();
            match open_process(pid) {
                Ok((handle, start_time)) => snapshot.records.push(ProcessRecord {
                    pid,
                    name,
                    start_time,
                    handle,
                }),
                Err(error) => snapshot.skipped.push(SkippedProcess { pid, name, error }),
            }
        }
        snapshot
    }
}

/// Open `pid` with the rights the policy, trim and identity calls need.
/// Returns the owned handle and the process creation time.
pub fn open_process(pid: u32) -> PlatformResult<(ProcessHandle, u64)> {
    let raw = unsafe {
        OpenProcess(
            PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SET_INFORMATION | PROCESS_SET_QUOTA,
            false,
            pid,
        )
    }
    .map_err(|e| platform_error(e, &format!("OpenProcess({})", pid)))?;

    let handle = ProcessHandle::from_raw(pid, raw.0 as isize, close_raw);
    let start_time = creation_time(&handle)?;
    Ok((handle, start_time))
}

pub(crate) fn as_handle(handle: &ProcessHandle) -> HANDLE {
    HANDLE(handle.raw() as *mut c_void)
}

fn close_raw(raw: isize) {
    unsafe {
        let _ = CloseHandle(HANDLE(raw as *mut c_void));
    }
}

/// Creation time in 100ns ticks since 1601. Stable for the life of the
/// process, so together with the PID it identifies one instance.
fn creation_time(handle: &ProcessHandle) -> PlatformResult<u64> {
    let mut created = FILETIME::default();
    let mut exited = FILETIME::default();
    let mut kernel = FILETIME::default();
    let mut user = FILETIME::default();
    unsafe {
        GetProcessTimes(
            as_handle(handle),
            &mut created,
            &mut exited,
            &mut kernel,
            &mut user,
        )
    }
    .map_err(|e| platform_error(e, &format!("GetProcessTimes({})", handle.pid())))?;
    Ok(((created.dwHighDateTime as u64) << 32) | created.dwLowDateTime as u64)
}

/// Drop this process to below-normal priority so the governor never
/// competes with the game it is protecting.
pub fn lower_own_priority() {
    if let Err(e) = unsafe { SetPriorityClass(GetCurrentProcess(), BELOW_NORMAL_PRIORITY_CLASS) } {
        warn!(error = %e, "Could not lower own priority");
    }
}
