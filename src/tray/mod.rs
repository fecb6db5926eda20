//! System tray shell
//!
//! The tray owns no policy state. Menu clicks become commands on the
//! [`MonitorHandle`]; the labels and check marks are redrawn from the
//! published snapshot once a second.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use tray_icon::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu},
    Icon, TrayIconBuilder,
};
use winit::event_loop::{ControlFlow, EventLoop};

use crate::core::config::{paths, GovernorConfig};
use crate::core::profile::PerformanceProfile;
use crate::monitor::{
    spawn_monitor, MonitorEvent, MonitorHandle, MonitorSnapshot, MonitorState, ServiceAction,
    ServiceDescriptor,
};
use crate::security::PrivilegeManager;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

/// Check items of one rule's profile submenu.
struct ProfileMenu {
    rule: String,
    items: Vec<(PerformanceProfile, CheckMenuItem)>,
}

pub struct TrayApp {
    config: GovernorConfig,
    config_path: PathBuf,
}

impl TrayApp {
    pub fn new(config: GovernorConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let privileges = PrivilegeManager::acquire();
        crate::windows::process::lower_own_priority();
        info!(config = %self.config_path.display(), "Starting tray");

        if tokio::runtime::Handle::try_current().is_ok() {
            return Err("the tray must be started outside an async runtime".into());
        }
        let runtime = Runtime::new()?;
        let (handle, _join) = {
            let _guard = runtime.enter();
            spawn_monitor(&self.config, crate::platform::create_platform())
        };
        spawn_failure_notifier(&runtime, &handle);

        let event_loop = EventLoop::new()?;
        let menu = Menu::new();

        let status_item = MenuItem::new("Starting...", false, None);
        let version_item = MenuItem::new(format!("ACE Governor v{}", VERSION), false, None);
        let monitoring_item = CheckMenuItem::new("Monitoring", true, self.config.enabled, None);
        let dialogs_item = CheckMenuItem::new(
            "Close anti-cheat popups",
            true,
            self.config.suppress_dialogs,
            None,
        );

        let profiles_menu = Submenu::new("Profiles", true);
        let mut profile_menus = Vec::new();
        for rule in &handle.snapshot().rules {
            let sub = Submenu::new(&rule.match_name, true);
            let mut items = Vec::new();
            for profile in PerformanceProfile::ALL {
                let item = CheckMenuItem::new(profile.label(), true, profile == rule.profile, None);
                sub.append(&item)?;
                items.push((profile, item));
            }
            profiles_menu.append(&sub)?;
            profile_menus.push(ProfileMenu {
                rule: rule.match_name.clone(),
                items,
            });
        }

        let services_menu = Submenu::new("Services", privileges.can_control_services());
        let service_status: Vec<(String, MenuItem)> = ServiceDescriptor::known()
            .into_iter()
            .map(|d| {
                let item = MenuItem::new(format!("{}: ...", d.service_name), false, None);
                (d.service_name, item)
            })
            .collect();
        for (_, item) in &service_status {
            services_menu.append(item)?;
        }
        let stop_all = MenuItem::new("Stop all", true, None);
        let disable_all = MenuItem::new("Disable all", true, None);
        let delete_all = MenuItem::new("Delete all", true, None);
        services_menu.append(&PredefinedMenuItem::separator())?;
        services_menu.append(&stop_all)?;
        services_menu.append(&disable_all)?;
        services_menu.append(&delete_all)?;

        let refresh_item = MenuItem::new("Refresh now", true, None);
        let logs_item = MenuItem::new("Open log folder", true, None);
        let quit_item = MenuItem::new("Quit", true, None);

        menu.append(&status_item)?;
        menu.append(&version_item)?;
        menu.append(&PredefinedMenuItem::separator())?;
        menu.append(&monitoring_item)?;
        menu.append(&dialogs_item)?;
        menu.append(&profiles_menu)?;
        menu.append(&services_menu)?;
        menu.append(&PredefinedMenuItem::separator())?;
        menu.append(&refresh_item)?;
        menu.append(&logs_item)?;
        menu.append(&PredefinedMenuItem::separator())?;
        menu.append(&quit_item)?;

        let initial_state = handle.snapshot().state;
        let icon = Icon::from_rgba(create_icon(initial_state), 32, 32)?;
        let tray_icon = TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_tooltip(format!("ACE Governor v{}", VERSION))
            .with_icon(icon)
            .build()?;

        let monitoring_id = monitoring_item.id().clone();
        let dialogs_id = dialogs_item.id().clone();
        let stop_all_id = stop_all.id().clone();
        let disable_all_id = disable_all.id().clone();
        let delete_all_id = delete_all.id().clone();
        let refresh_id = refresh_item.id().clone();
        let logs_id = logs_item.id().clone();
        let quit_id = quit_item.id().clone();
        let profile_ids: Vec<(MenuId, String, PerformanceProfile)> = profile_menus
            .iter()
            .flat_map(|m| {
                m.items
                    .iter()
                    .map(|(profile, item)| (item.id().clone(), m.rule.clone(), *profile))
            })
            .collect();

        let mut last_redraw = Instant::now() - REDRAW_INTERVAL;
        let mut last_state = initial_state;

        #[allow(deprecated)]
        event_loop.run(move |_event, event_loop| {
            event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + REDRAW_INTERVAL));

            if last_redraw.elapsed() >= REDRAW_INTERVAL {
                let snapshot = handle.snapshot();
                let _ = status_item.set_text(status_line(&snapshot));
                let _ = tray_icon.set_tooltip(Some(tooltip(&snapshot)));
                monitoring_item.set_checked(snapshot.state == MonitorState::Running);
                dialogs_item.set_checked(snapshot.dialog_suppression);

                for menu in &profile_menus {
                    let current = snapshot
                        .rules
                        .iter()
                        .find(|r| r.match_name == menu.rule)
                        .map(|r| r.profile);
                    for (profile, item) in &menu.items {
                        item.set_checked(Some(*profile) == current);
                    }
                }

                for (name, item) in &service_status {
                    if let Some(report) = snapshot
                        .services
                        .iter()
                        .find(|r| &r.descriptor.service_name == name)
                    {
                        let text = if report.exists {
                            format!("{}: {}", name, report.state)
                        } else {
                            format!("{}: not installed", name)
                        };
                        item.set_text(text);
                    }
                }

                if snapshot.state != last_state {
                    if let Ok(icon) = Icon::from_rgba(create_icon(snapshot.state), 32, 32) {
                        let _ = tray_icon.set_icon(Some(icon));
                    }
                    last_state = snapshot.state;
                }
                last_redraw = Instant::now();
            }

            if let Ok(event) = MenuEvent::receiver().try_recv() {
                let handle = handle.clone();
                if event.id == quit_id {
                    runtime.block_on(async {
                        let _ = handle.stop().await;
                        handle.shutdown().await;
                    });
                    event_loop.exit();
                } else if event.id == monitoring_id {
                    let enable = handle.snapshot().state != MonitorState::Running;
                    runtime.spawn(async move {
                        if let Err(e) = handle.set_enabled(enable).await {
                            warn!(error = %e, "Toggle monitoring failed");
                        }
                    });
                } else if event.id == dialogs_id {
                    let enable = !handle.snapshot().dialog_suppression;
                    runtime.spawn(async move {
                        let _ = handle.set_dialog_suppression(enable).await;
                    });
                } else if event.id == refresh_id {
                    runtime.spawn(async move {
                        let _ = handle.refresh().await;
                    });
                } else if event.id == logs_id {
                    open_folder(&paths::log_dir());
                } else if event.id == stop_all_id {
                    run_service_action(&runtime, handle, ServiceAction::Stop);
                } else if event.id == disable_all_id {
                    run_service_action(&runtime, handle, ServiceAction::Disable);
                } else if event.id == delete_all_id {
                    run_service_action(&runtime, handle, ServiceAction::Delete);
                } else if let Some((_, rule, profile)) =
                    profile_ids.iter().find(|(id, _, _)| *id == event.id)
                {
                    let (rule, profile) = (rule.clone(), *profile);
                    runtime.spawn(async move {
                        if let Err(e) = handle.set_profile(&rule, profile).await {
                            warn!(rule = %rule, error = %e, "Profile change rejected");
                        }
                    });
                }
                // Force a redraw so check marks follow the click.
                last_redraw = Instant::now() - REDRAW_INTERVAL;
            }
        })?;

        Ok(())
    }
}

fn run_service_action(runtime: &Runtime, handle: MonitorHandle, action: ServiceAction) {
    runtime.spawn(async move {
        for descriptor in ServiceDescriptor::known() {
            if let Err(e) = handle.trigger_service_action(descriptor, action).await {
                error!(error = %e, "Service action not delivered");
                break;
            }
        }
    });
}

/// Pop a message box for failures the user triggered.
fn spawn_failure_notifier(runtime: &Runtime, handle: &MonitorHandle) {
    let mut events = handle.subscribe();
    runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::ServiceActionResult {
                    descriptor,
                    action,
                    outcome: Err(failure),
                }) => {
                    let msg = format!("Could not {} {}:\n\n{}", action, descriptor.service_name, failure);
                    std::thread::spawn(move || show_message_box("ACE Governor", &msg));
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn status_line(snapshot: &MonitorSnapshot) -> String {
    let governed = snapshot.applied.iter().filter(|e| e.profile.is_some()).count();
    match snapshot.state {
        MonitorState::Running => format!(
            "Running: {} of {} processes governed",
            governed,
            snapshot.applied.len()
        ),
        MonitorState::Paused => "Paused".to_string(),
        MonitorState::Stopped => "Stopped".to_string(),
    }
}

fn tooltip(snapshot: &MonitorSnapshot) -> String {
    let mut text = format!("ACE Governor v{} - {}", VERSION, snapshot.state);
    if snapshot.dialogs_closed > 0 {
        text.push_str(&format!(" | {} popups closed", snapshot.dialogs_closed));
    }
    if let Some(err) = &snapshot.last_error {
        text.push_str(&format!("\nLast issue: {}", err.kind));
    }
    text
}

fn open_folder(path: &std::path::Path) {
    if let Err(e) = std::fs::create_dir_all(path) {
        warn!(path = %path.display(), error = %e, "Could not create folder");
        return;
    }
    let _ = std::process::Command::new("explorer").arg(path).spawn();
}

fn show_message_box(title: &str, message: &str) {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONWARNING, MB_OK};

    fn to_wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }

    let title = to_wide(title);
    let message = to_wide(message);
    unsafe {
        MessageBoxW(
            HWND(std::ptr::null_mut()),
            PCWSTR(message.as_ptr()),
            PCWSTR(title.as_ptr()),
            MB_OK | MB_ICONWARNING,
        );
    }
}

/// Shield icon tinted by monitor state.
fn create_icon(state: MonitorState) -> Vec<u8> {
    let (r, g, b) = match state {
        MonitorState::Running => (0x00u8, 0xA0u8, 0x60u8),
        MonitorState::Paused => (0xE0u8, 0x90u8, 0x00u8),
        MonitorState::Stopped => (0x80u8, 0x80u8, 0x80u8),
    };

    let mut data = Vec::with_capacity(32 * 32 * 4);
    for y in 0..32i32 {
        for x in 0..32i32 {
            // Straight sides down to y=16, then tapering to a point.
            let half_width = if y < 16 { 12 } else { (12 * (31 - y)) / 15 };
            let dx = (x - 16).abs();
            let inside = y >= 2 && dx <= half_width;
            let edge = inside && (dx >= half_width - 1 || y <= 3);

            if edge {
                data.extend_from_slice(&[r / 2, g / 2, b / 2, 0xFF]);
            } else if inside {
                data.extend_from_slice(&[r, g, b, 0xFF]);
            } else {
                data.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }
    data
}
