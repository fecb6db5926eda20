//! Closes anti-cheat popup windows
//!
//! Only visible top-level windows owned by a watched process, and matching
//! one of the configured signatures, are ever closed.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::core::config::DialogSignature;
use crate::platform::{WindowInfo, WindowSource};

/// A window that was asked to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedDialog {
    pub owner: String,
    pub pid: u32,
    pub title: String,
}

pub struct DialogSuppressor {
    source: Box<dyn WindowSource>,
    signatures: Vec<DialogSignature>,
    enabled: bool,
}

impl DialogSuppressor {
    pub fn new(source: Box<dyn WindowSource>, signatures: Vec<DialogSignature>, enabled: bool) -> Self {
        Self {
            source,
            signatures,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Close matching dialogs owned by `owners` (PID to process name).
    /// Windows that vanish before the close lands are ignored.
    pub fn scan(&mut self, owners: &HashMap<u32, String>) -> Vec<ClosedDialog> {
        if !self.enabled || owners.is_empty() || self.signatures.is_empty() {
            return Vec::new();
        }

        let windows = match self.source.top_level_windows() {
            Ok(w) => w,
            Err(e) => {
                debug!(error = %e, "Window enumeration failed");
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for window in windows.iter().filter(|w| w.visible) {
            let Some(owner) = owners.get(&window.pid) else {
                continue;
            };
            if !self.matches(window) {
                continue;
            }
            match self.source.close(window) {
                Ok(()) => {
                    info!(owner = %owner, pid = window.pid, title = %window.title, "Closed dialog");
                    closed.push(ClosedDialog {
                        owner: owner.clone(),
                        pid: window.pid,
                        title: window.title.clone(),
                    });
                }
                Err(e) => debug!(title = %window.title, error = %e, "Dialog already gone"),
            }
        }
        closed
    }

    fn matches(&self, window: &WindowInfo) -> bool {
        self.signatures.iter().any(|sig| signature_matches(sig, window))
    }
}

fn signature_matches(sig: &DialogSignature, window: &WindowInfo) -> bool {
    if sig.title_contains.is_none() && sig.class_name.is_none() {
        return false;
    }
    let title_ok = sig
        .title_contains
        .as_ref()
        .map_or(true, |needle| window.title.contains(needle.as_str()));
    let class_ok = sig
        .class_name
        .as_ref()
        .map_or(true, |class| window.class_name.eq_ignore_ascii_case(class));
    title_ok && class_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    fn ace_signature() -> Vec<DialogSignature> {
        vec![DialogSignature {
            title_contains: Some("ACE".into()),
            class_name: None,
        }]
    }

    fn owners() -> HashMap<u32, String> {
        [(100, "ACE-Tray.exe".to_string())].into_iter().collect()
    }

    #[test]
    fn test_closes_matching_dialog_once() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "ACE Security Notice", "#32770");
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), ace_signature(), true);

        let closed = dialogs.scan(&owners());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].owner, "ACE-Tray.exe");
        assert_eq!(mock.closed_windows(), vec![1]);

        assert!(dialogs.scan(&owners()).is_empty());
    }

    #[test]
    fn test_ignores_non_matching_and_foreign_windows() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "Settings", "#32770");
        mock.add_window(2, 200, "ACE Security Notice", "#32770");
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), ace_signature(), true);

        assert!(dialogs.scan(&owners()).is_empty());
        assert!(mock.closed_windows().is_empty());
    }

    #[test]
    fn test_title_match_is_case_sensitive() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "Interface", "#32770");
        mock.add_window(2, 100, "Workspace", "#32770");
        mock.add_window(3, 100, "ace security notice", "#32770");
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), ace_signature(), true);

        assert!(dialogs.scan(&owners()).is_empty());
        assert!(mock.closed_windows().is_empty());
    }

    #[test]
    fn test_default_signatures_require_dialog_class() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "ACE Overlay", "ACEOverlayWnd");
        mock.add_window(2, 100, "ACE Security Notice", "#32770");
        mock.add_window(3, 100, "AntiCheatExpert", "AnyClass");
        let signatures = crate::core::config::GovernorConfig::default().dialogs;
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), signatures, true);

        let closed = dialogs.scan(&owners());
        assert_eq!(closed.len(), 2);
        let mut ids = mock.closed_windows();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "ACE Security Notice", "#32770");
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), ace_signature(), false);

        assert!(dialogs.scan(&owners()).is_empty());
        dialogs.set_enabled(true);
        assert_eq!(dialogs.scan(&owners()).len(), 1);
    }

    #[test]
    fn test_vanished_window_is_swallowed() {
        let mock = MockPlatform::new();
        mock.add_window(1, 100, "ACE Security Notice", "#32770");
        mock.fail_close(1);
        let mut dialogs = DialogSuppressor::new(Box::new(mock.clone()), ace_signature(), true);

        assert!(dialogs.scan(&owners()).is_empty());
    }

    #[test]
    fn test_class_signature() {
        let window = WindowInfo {
            id: 1,
            pid: 1,
            title: "Anything".into(),
            class_name: "ACEDialog".into(),
            visible: true,
        };
        let by_class = DialogSignature {
            title_contains: None,
            class_name: Some("acedialog".into()),
        };
        let empty = DialogSignature {
            title_contains: None,
            class_name: None,
        };
        assert!(signature_matches(&by_class, &window));
        assert!(!signature_matches(&empty, &window));
    }
}
