//! ACE Governor - System Tray Application
//!
//! Separate binary for the tray so no console window is shown.

#![cfg_attr(windows, windows_subsystem = "windows")]

#[cfg(not(windows))]
fn main() {
    eprintln!("ace-governor-tray only runs on Windows");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use ace_governor::core::config::paths;
    use ace_governor::GovernorConfig;
    use tracing_subscriber::EnvFilter;

    // Detach from any console we were started from.
    {
        use windows::Win32::System::Console::FreeConsole;
        let _ = unsafe { FreeConsole() };
    }

    let config_path = GovernorConfig::default_path();
    let config = GovernorConfig::load_or_default(&config_path);

    let log_dir = paths::log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let log_path = log_dir.join("ace-governor.log");
    if let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .try_init();
    }

    let Some(_instance) = single_instance::acquire() else {
        tracing::info!("Another tray instance is already running");
        return;
    };

    let tray_app = ace_governor::tray::TrayApp::new(config, config_path);
    if let Err(e) = tray_app.run() {
        tracing::error!("Tray error: {}", e);
        let error_path = log_dir.join("ace-governor-error.txt");
        let _ = std::fs::write(&error_path, format!("Tray error: {}", e));
    }
}

#[cfg(windows)]
mod single_instance {
    use windows::core::w;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexW;

    /// Named mutex held for the life of the process.
    pub struct InstanceGuard(HANDLE);

    impl Drop for InstanceGuard {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    pub fn acquire() -> Option<InstanceGuard> {
        unsafe {
            let handle = CreateMutexW(None, true, w!("Local\\AceGovernorTray")).ok()?;
            if GetLastError() == ERROR_ALREADY_EXISTS {
                let _ = CloseHandle(handle);
                return None;
            }
            Some(InstanceGuard(handle))
        }
    }
}
