//! Working-set trimming with real Win32 APIs

use std::mem::size_of;
use tracing::debug;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Memory::{SetProcessWorkingSetSizeEx, SETPROCESSWORKINGSETSIZEEX_FLAGS};
use windows::Win32::System::ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};

use super::platform_error;
use super::process::as_handle;
use crate::platform::{PlatformResult, ProcessHandle};

/// Ask the OS to page out the whole working set. Returns the bytes
/// released, or 0 when the counters could not be read.
pub fn trim_working_set(handle: &ProcessHandle) -> PlatformResult<u64> {
    let raw = as_handle(handle);
    let before = working_set_bytes(raw);

    unsafe {
        SetProcessWorkingSetSizeEx(raw, usize::MAX, usize::MAX, SETPROCESSWORKINGSETSIZEEX_FLAGS(0))
    }
    .map_err(|e| platform_error(e, &format!("SetProcessWorkingSetSizeEx({})", handle.pid())))?;

    let freed = match (before, working_set_bytes(raw)) {
        (Some(b), Some(a)) => b.saturating_sub(a) as u64,
        _ => 0,
    };
    debug!(pid = handle.pid(), freed_kb = freed / 1024, "Working set released");
    Ok(freed)
}

fn working_set_bytes(handle: HANDLE) -> Option<usize> {
    let mut counters = PROCESS_MEMORY_COUNTERS {
        cb: size_of::<PROCESS_MEMORY_COUNTERS>() as u32,
        ..Default::default()
    };
    unsafe { GetProcessMemoryInfo(handle, &mut counters, size_of::<PROCESS_MEMORY_COUNTERS>() as u32) }
        .ok()
        .map(|_| counters.WorkingSetSize)
}
