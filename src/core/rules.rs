//! Rule set: process name → desired policy
//!
//! Matching is exact and case-insensitive on the executable name. Rules are
//! validated when they are loaded so that a bad entry turns into a
//! configuration error up front instead of a silent miss every cycle.

use serde::Serialize;
use std::collections::HashMap;

use super::config::RuleEntry;
use super::error::ConfigurationError;
use super::profile::PerformanceProfile;

/// System processes a rule may never target (lowercase).
const PROTECTED_PROCESSES: &[&str] = &[
    "system",
    "csrss.exe",
    "smss.exe",
    "lsass.exe",
    "services.exe",
    "wininit.exe",
    "winlogon.exe",
    "dwm.exe",
    "explorer.exe",
    "svchost.exe",
];

/// Desired policy for one executable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRule {
    pub match_name: String,
    pub profile: PerformanceProfile,
    pub suppress_dialogs: bool,
    pub trim_on_idle: bool,
}

/// Check a rule name in isolation.
fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigurationError::new(name, "empty process name"));
    }
    if trimmed.len() != name.len() {
        return Err(ConfigurationError::new(name, "leading or trailing whitespace"));
    }
    if name.contains(['\\', '/', ':']) {
        return Err(ConfigurationError::new(
            name,
            "path separators are not allowed, match on the executable name only",
        ));
    }
    if name.contains(['*', '?']) {
        return Err(ConfigurationError::new(name, "wildcards are not supported"));
    }
    if name.contains(['\0', '|', '<', '>', '"']) {
        return Err(ConfigurationError::new(name, "invalid character in process name"));
    }
    let lower = name.to_lowercase();
    if PROTECTED_PROCESSES.contains(&lower.as_str()) {
        return Err(ConfigurationError::new(name, "protected system process"));
    }
    Ok(())
}

/// Turn a raw configuration entry into a rule.
pub fn validate_entry(entry: &RuleEntry) -> Result<ProcessRule, ConfigurationError> {
    validate_name(&entry.match_name)?;
    let profile = entry
        .profile
        .parse::<PerformanceProfile>()
        .map_err(|reason| ConfigurationError::new(&entry.match_name, reason))?;

    Ok(ProcessRule {
        match_name: entry.match_name.clone(),
        profile,
        suppress_dialogs: entry.suppress_dialogs,
        trim_on_idle: entry.trim_on_idle,
    })
}

/// Validated, immutable-by-default set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ProcessRule>,
    /// lowercase name → index into `rules`
    index: HashMap<String, usize>,
}

impl RuleSet {
    /// Build from configuration entries.
    pub fn from_entries(entries: &[RuleEntry]) -> (Self, Vec<ConfigurationError>) {
        let mut set = RuleSet::default();
        let mut errors = Vec::new();
        for entry in entries {
            match validate_entry(entry).and_then(|rule| set.insert(rule)) {
                Ok(()) => {}
                Err(e) => errors.push(e),
            }
        }
        (set, errors)
    }

    fn insert(&mut self, rule: ProcessRule) -> Result<(), ConfigurationError> {
        let key = rule.match_name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(ConfigurationError::new(
                &rule.match_name,
                "duplicate rule, first definition wins",
            ));
        }
        self.index.insert(key, self.rules.len());
        self.rules.push(rule);
        Ok(())
    }

    /// Rule for an executable name, if any.
    pub fn match_name(&self, name: &str) -> Option<&ProcessRule> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|&i| self.rules.get(i))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// Change the profile of an existing rule.
    pub fn set_profile(
        &mut self,
        rule_name: &str,
        profile: PerformanceProfile,
    ) -> Result<(), ConfigurationError> {
        let idx = *self
            .index
            .get(&rule_name.to_lowercase())
            .ok_or_else(|| ConfigurationError::new(rule_name, "no such rule"))?;
        self.rules[idx].profile = profile;
        Ok(())
    }

    pub fn rules(&self) -> &[ProcessRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, profile: &str) -> RuleEntry {
        RuleEntry {
            match_name: name.into(),
            profile: profile.into(),
            suppress_dialogs: false,
            trim_on_idle: false,
        }
    }

    #[test]
    fn test_match_is_case_insensitive_and_exact() {
        let (rules, errors) = RuleSet::from_entries(&[entry("SGuard64.exe", "efficiency")]);
        assert!(errors.is_empty());
        assert!(rules.match_name("sguard64.EXE").is_some());
        assert!(rules.match_name("SGuard64").is_none());
        assert!(rules.match_name("SGuard64.exe.bak").is_none());
        assert!(rules.match_name("notepad.exe").is_none());
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let (rules, errors) = RuleSet::from_entries(&[
            entry("SGuard64.exe", "efficiency"),
            entry("C:\\Games\\x.exe", "normal"),
            entry("*.exe", "normal"),
            entry("", "normal"),
            entry("ACE-Tray.exe", "turbo"),
            entry("lsass.exe", "efficiency"),
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| e.reason.contains("unknown profile")));
        assert!(errors.iter().any(|e| e.reason.contains("protected")));
    }

    #[test]
    fn test_duplicate_rule_first_wins() {
        let (rules, errors) = RuleSet::from_entries(&[
            entry("SGuard64.exe", "efficiency"),
            entry("sguard64.exe", "high"),
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            rules.match_name("SGuard64.exe").map(|r| r.profile),
            Some(PerformanceProfile::Efficiency)
        );
    }

    #[test]
    fn test_set_profile() {
        let (mut rules, _) = RuleSet::from_entries(&[entry("SGuard64.exe", "efficiency")]);
        rules.set_profile("SGUARD64.exe", PerformanceProfile::Normal).unwrap();
        assert_eq!(
            rules.match_name("SGuard64.exe").map(|r| r.profile),
            Some(PerformanceProfile::Normal)
        );
        assert!(rules.set_profile("missing.exe", PerformanceProfile::High).is_err());
    }
}
