//! Win32 backends for the platform traits

pub mod memory;
pub mod policy;
pub mod process;
pub mod service;
pub mod window;

use crate::platform::PlatformError;

/// Map a `windows` crate error to a platform error, keeping the Win32 code.
pub(crate) fn platform_error(err: windows::core::Error, context: &str) -> PlatformError {
    // HRESULT_FROM_WIN32 keeps the Win32 code in the low word.
    let code = (err.code().0 as u32 & 0xFFFF) as i32;
    PlatformError::from_os_code(code, &format!("{}: {}", context, err.message()))
}
