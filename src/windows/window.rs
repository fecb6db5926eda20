//! Top-level window enumeration and closing

use std::ffi::c_void;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
    PostMessageW, WM_CLOSE,
};

use super::platform_error;
use crate::platform::{PlatformResult, WindowInfo, WindowSource};

pub struct Win32WindowSource;

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

    let mut pid = 0u32;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));

    let mut title = [0u16; 256];
    let title_len = GetWindowTextW(hwnd, &mut title).max(0) as usize;
    let mut class = [0u16; 256];
    let class_len = GetClassNameW(hwnd, &mut class).max(0) as usize;

    windows.push(WindowInfo {
        id: hwnd.0 as isize,
        pid,
        title: String::from_utf16_lossy(&title[..title_len]),
        class_name: String::from_utf16_lossy(&class[..class_len]),
        visible: IsWindowVisible(hwnd).as_bool(),
    });
    BOOL(1)
}

impl WindowSource for Win32WindowSource {
    fn top_level_windows(&self) -> PlatformResult<Vec<WindowInfo>> {
        let mut windows: Vec<WindowInfo> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
            )
        }
        .map_err(|e| platform_error(e, "EnumWindows"))?;
        Ok(windows)
    }

    /// Posts WM_CLOSE, the same as the user clicking the close button.
    fn close(&self, window: &WindowInfo) -> PlatformResult<()> {
        let hwnd = HWND(window.id as *mut c_void);
        unsafe { PostMessageW(hwnd, WM_CLOSE, WPARAM(0), LPARAM(0)) }
            .map_err(|e| platform_error(e, &format!("PostMessageW({:#x})", window.id)))
    }
}
