//! Privilege management
//!
//! Anti-cheat processes run elevated. Opening them with the rights the
//! monitor needs requires an elevated token and `SeDebugPrivilege`.

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrivilegeLevel {
    /// Standard user: protected processes will refuse most calls
    Standard,
    /// Elevated admin without debug privilege
    Admin,
    /// Elevated with `SeDebugPrivilege` enabled
    Debug,
}

pub struct PrivilegeManager {
    level: PrivilegeLevel,
}

impl PrivilegeManager {
    /// Detect elevation and try to enable `SeDebugPrivilege`. Missing
    /// privileges only limit what the monitor can do.
    pub fn acquire() -> Self {
        let level = Self::detect_level();
        match level {
            PrivilegeLevel::Standard => {
                warn!("Not running elevated, anti-cheat processes will reject policy changes")
            }
            PrivilegeLevel::Admin => warn!("SeDebugPrivilege unavailable, some processes may be skipped"),
            PrivilegeLevel::Debug => info!("Running elevated with SeDebugPrivilege"),
        }
        Self { level }
    }

    fn detect_level() -> PrivilegeLevel {
        #[cfg(windows)]
        {
            if !is_elevated() {
                return PrivilegeLevel::Standard;
            }
            if enable_debug_privilege() {
                return PrivilegeLevel::Debug;
            }
            PrivilegeLevel::Admin
        }
        #[cfg(not(windows))]
        {
            PrivilegeLevel::Standard
        }
    }

    pub fn level(&self) -> PrivilegeLevel {
        self.level
    }

    pub fn is_elevated(&self) -> bool {
        self.level != PrivilegeLevel::Standard
    }

    /// Service control needs an elevated token.
    pub fn can_control_services(&self) -> bool {
        self.is_elevated()
    }
}

#[cfg(windows)]
fn is_elevated() -> bool {
    use std::mem::size_of;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION::default();
        let mut size = 0u32;
        let result = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );
        let _ = CloseHandle(token);
        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(windows)]
fn enable_debug_privilege() -> bool {
    use windows::core::{w, PCWSTR};
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID};
    use windows::Win32::Security::{
        AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        if OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .is_err()
        {
            return false;
        }

        let mut luid = LUID::default();
        let mut ok = LookupPrivilegeValueW(PCWSTR::null(), w!("SeDebugPrivilege"), &mut luid).is_ok();
        if ok {
            let privileges = TOKEN_PRIVILEGES {
                PrivilegeCount: 1,
                Privileges: [LUID_AND_ATTRIBUTES {
                    Luid: luid,
                    Attributes: SE_PRIVILEGE_ENABLED,
                }],
            };
            // Succeeds even when the privilege is not held; the last error
            // tells the difference.
            ok = AdjustTokenPrivileges(token, false, Some(&privileges as *const _), 0, None, None).is_ok()
                && GetLastError() != ERROR_NOT_ALL_ASSIGNED;
        }
        let _ = CloseHandle(token);
        ok
    }
}

impl Default for PrivilegeManager {
    fn default() -> Self {
        Self::acquire()
    }
}
