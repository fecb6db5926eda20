//! Priority, affinity, power throttling and I/O priority through Win32

use std::ffi::c_void;
use std::mem::size_of;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Threading::{
    ProcessPowerThrottling, SetPriorityClass, SetProcessAffinityMask, SetProcessInformation,
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS,
    IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, PROCESS_CREATION_FLAGS,
    PROCESS_POWER_THROTTLING_CURRENT_VERSION, PROCESS_POWER_THROTTLING_EXECUTION_SPEED,
    PROCESS_POWER_THROTTLING_STATE, REALTIME_PRIORITY_CLASS,
};

use super::platform_error;
use super::process::as_handle;
use crate::core::profile::{IoPriority, PriorityClass};
use crate::platform::{PlatformError, PlatformResult, ProcessControl, ProcessHandle};

/// `PROCESSINFOCLASS::ProcessIoPriority`
const PROCESS_IO_PRIORITY: u32 = 33;
const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
const STATUS_INVALID_HANDLE: i32 = 0xC000_0008_u32 as i32;

#[link(name = "ntdll")]
extern "system" {
    fn NtSetInformationProcess(
        process: HANDLE,
        class: u32,
        information: *const c_void,
        length: u32,
    ) -> i32;
}

pub struct Win32ProcessControl;

fn nt_status_error(status: i32, context: &str) -> PlatformError {
    match status {
        STATUS_ACCESS_DENIED => PlatformError::PermissionDenied(context.to_string()),
        STATUS_INVALID_HANDLE => PlatformError::NotFound(context.to_string()),
        _ => PlatformError::SystemError {
            code: status,
            message: context.to_string(),
        },
    }
}

fn priority_flag(class: PriorityClass) -> PROCESS_CREATION_FLAGS {
    match class {
        PriorityClass::Idle => IDLE_PRIORITY_CLASS,
        PriorityClass::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
        PriorityClass::Normal => NORMAL_PRIORITY_CLASS,
        PriorityClass::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
        PriorityClass::High => HIGH_PRIORITY_CLASS,
        PriorityClass::Realtime => REALTIME_PRIORITY_CLASS,
    }
}

impl ProcessControl for Win32ProcessControl {
    fn set_priority(&self, handle: &ProcessHandle, class: PriorityClass) -> PlatformResult<()> {
        unsafe { SetPriorityClass(as_handle(handle), priority_flag(class)) }
            .map_err(|e| platform_error(e, &format!("SetPriorityClass({})", handle.pid())))
    }

    fn set_affinity(&self, handle: &ProcessHandle, mask: u64) -> PlatformResult<()> {
        unsafe { SetProcessAffinityMask(as_handle(handle), mask as usize) }
            .map_err(|e| platform_error(e, &format!("SetProcessAffinityMask({})", handle.pid())))
    }

    /// EcoQoS. Controlling the execution-speed bit with the state bit
    /// cleared explicitly opts the process out of throttling.
    fn set_power_throttling(&self, handle: &ProcessHandle, enabled: bool) -> PlatformResult<()> {
        let state = PROCESS_POWER_THROTTLING_STATE {
            Version: PROCESS_POWER_THROTTLING_CURRENT_VERSION,
            ControlMask: PROCESS_POWER_THROTTLING_EXECUTION_SPEED,
            StateMask: if enabled {
                PROCESS_POWER_THROTTLING_EXECUTION_SPEED
            } else {
                0
            },
        };
        unsafe {
            SetProcessInformation(
                as_handle(handle),
                ProcessPowerThrottling,
                &state as *const _ as *const c_void,
                size_of::<PROCESS_POWER_THROTTLING_STATE>() as u32,
            )
        }
        .map_err(|e| platform_error(e, &format!("SetProcessInformation({})", handle.pid())))
    }

    /// ntdll only; Win32 has no wrapper for the I/O priority hint.
    fn set_io_priority(&self, handle: &ProcessHandle, priority: IoPriority) -> PlatformResult<()> {
        let hint = priority as u32;
        let status = unsafe {
            NtSetInformationProcess(
                as_handle(handle),
                PROCESS_IO_PRIORITY,
                &hint as *const u32 as *const c_void,
                size_of::<u32>() as u32,
            )
        };
        if status < 0 {
            return Err(nt_status_error(
                status,
                &format!("NtSetInformationProcess(IoPriority, {})", handle.pid()),
            ));
        }
        Ok(())
    }

    fn trim_working_set(&self, handle: &ProcessHandle) -> PlatformResult<()> {
        super::memory::trim_working_set(handle).map(|_| ())
    }
}
