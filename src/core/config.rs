//! Configuration for the governor
//!
//! Loaded once at startup from a TOML file. The monitor never writes it
//! back; runtime changes arrive as commands.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use super::error::{ConfigLoadError, ConfigurationError};
use super::rules::RuleSet;

/// One `[[rules]]` entry as written in the file. The profile stays a
/// string here so a typo rejects only that rule, not the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub match_name: String,
    pub profile: String,
    #[serde(default)]
    pub suppress_dialogs: bool,
    #[serde(default)]
    pub trim_on_idle: bool,
}

/// Title/class signature of a dialog to dismiss. Both parts are optional;
/// a window matches when every part that is set matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogSignature {
    /// Case-sensitive substring of the window title
    #[serde(default)]
    pub title_contains: Option<String>,
    /// Exact window class name
    #[serde(default)]
    pub class_name: Option<String>,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `ace_governor=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Main governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Start monitoring immediately
    pub enabled: bool,

    /// Seconds between polling cycles
    pub poll_interval_secs: u64,

    /// Dismiss matching dialogs of rules that ask for it
    pub suppress_dialogs: bool,

    /// Minimum seconds between two working-set trims of one process
    pub trim_interval_secs: u64,

    /// How long a service action may wait for the target state
    pub service_timeout_secs: u64,

    pub logging: LoggingConfig,

    pub rules: Vec<RuleEntry>,

    pub dialogs: Vec<DialogSignature>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 2,
            suppress_dialogs: true,
            trim_interval_secs: 300,
            service_timeout_secs: 10,
            logging: LoggingConfig::default(),
            rules: vec![
                RuleEntry {
                    match_name: "SGuard64.exe".into(),
                    profile: "efficiency".into(),
                    suppress_dialogs: false,
                    trim_on_idle: true,
                },
                RuleEntry {
                    match_name: "SGuardSvc64.exe".into(),
                    profile: "efficiency".into(),
                    suppress_dialogs: false,
                    trim_on_idle: true,
                },
                RuleEntry {
                    match_name: "ACE-Tray.exe".into(),
                    profile: "efficiency".into(),
                    suppress_dialogs: true,
                    trim_on_idle: false,
                },
            ],
            dialogs: vec![
                // Bare "ACE" is too short to trust outside a standard dialog box.
                DialogSignature {
                    title_contains: Some("ACE".into()),
                    class_name: Some("#32770".into()),
                },
                DialogSignature {
                    title_contains: Some("AntiCheatExpert".into()),
                    class_name: None,
                },
            ],
        }
    }
}

impl GovernorConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Polling interval, clamped to 1..=60 seconds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.clamp(1, 60))
    }

    pub fn trim_interval(&self) -> Duration {
        Duration::from_secs(self.trim_interval_secs.max(1))
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs.max(1))
    }

    /// Validated rule set plus the entries that were rejected.
    pub fn rule_set(&self) -> (RuleSet, Vec<ConfigurationError>) {
        RuleSet::from_entries(&self.rules)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        paths::config_dir().join("ace-governor.toml")
    }
}

/// Directory helpers
pub mod paths {
    use std::path::PathBuf;

    /// Get the configuration directory path
    /// - Windows: %APPDATA%\AceGovernor\
    /// - elsewhere: the platform config dir
    pub fn config_dir() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            if let Some(appdata) = std::env::var_os("APPDATA") {
                return PathBuf::from(appdata).join("AceGovernor");
            }
        }
        dirs::config_dir()
            .map(|dir| dir.join("ace-governor"))
            .unwrap_or_else(fallback_dir)
    }

    /// Get the log directory path
    pub fn log_dir() -> PathBuf {
        config_dir().join("logs")
    }

    fn fallback_dir() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
