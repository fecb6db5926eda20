//! Per-process applied state
//!
//! Owned by the monitor loop and keyed by PID. An entry describes exactly
//! one process instance: the PID plus its start time. Entries for PIDs that
//! are gone from a snapshot are purged at the end of every cycle.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::profile::{PerformanceProfile, PolicyResult};

/// What `observe` found for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// PID not tracked before
    New,
    /// PID tracked, but by a different process instance; the old entry
    /// was discarded
    Recreated,
    /// Same process instance as last cycle
    Known,
}

/// State tracked for one process instance.
#[derive(Debug, Clone)]
pub struct AppliedEntry {
    pub pid: u32,
    pub name: String,
    pub start_time: u64,
    /// Last profile applied with every attribute accepted
    pub profile: Option<PerformanceProfile>,
    /// Last attempted profile and its outcome. A failure is reported only
    /// when this pair changes.
    pub last_attempt: Option<(PerformanceProfile, PolicyResult)>,
    pub last_trim: Option<Instant>,
    pub last_trim_ok: Option<bool>,
    pub first_seen: DateTime<Local>,
    pub applied_at: Option<DateTime<Local>>,
}

impl AppliedEntry {
    fn new(pid: u32, name: &str, start_time: u64) -> Self {
        Self {
            pid,
            name: name.to_string(),
            start_time,
            profile: None,
            last_attempt: None,
            last_trim: None,
            last_trim_ok: None,
            first_seen: Local::now(),
            applied_at: None,
        }
    }

    /// Whether this entry describes the given process instance.
    pub fn is_same_process(&self, name: &str, start_time: u64) -> bool {
        self.start_time == start_time && self.name.eq_ignore_ascii_case(name)
    }
}

/// Read-only copy of an entry handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedEntryView {
    pub pid: u32,
    pub name: String,
    pub profile: Option<PerformanceProfile>,
    pub last_result: Option<PolicyResult>,
    pub last_trim_secs_ago: Option<u64>,
    pub last_trim_ok: Option<bool>,
    pub first_seen: DateTime<Local>,
    pub applied_at: Option<DateTime<Local>>,
}

/// PID-keyed table of applied state.
#[derive(Debug, Default)]
pub struct AppliedState {
    entries: HashMap<u32, AppliedEntry>,
}

impl AppliedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process seen in the current snapshot. A PID whose start
    /// time or name changed is treated as a new process and its stale
    /// entry is replaced before anything else looks at it.
    pub fn observe(&mut self, pid: u32, name: &str, start_time: u64) -> Observation {
        match self.entries.get(&pid) {
            Some(entry) if entry.is_same_process(name, start_time) => Observation::Known,
            Some(_) => {
                self.entries
                    .insert(pid, AppliedEntry::new(pid, name, start_time));
                Observation::Recreated
            }
            None => {
                self.entries
                    .insert(pid, AppliedEntry::new(pid, name, start_time));
                Observation::New
            }
        }
    }

    pub fn get(&self, pid: u32) -> Option<&AppliedEntry> {
        self.entries.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut AppliedEntry> {
        self.entries.get_mut(&pid)
    }

    /// Drop every entry whose PID is not in `live`. Returns the purged
    /// entries.
    pub fn purge(&mut self, live: &HashSet<u32>) -> Vec<AppliedEntry> {
        let stale: Vec<u32> = self
            .entries
            .keys()
            .filter(|pid| !live.contains(pid))
            .copied()
            .collect();
        stale
            .into_iter()
            .filter_map(|pid| self.entries.remove(&pid))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consistency check run after every cycle.
    pub fn check_invariants(&self, live: &HashSet<u32>) -> Result<(), String> {
        for (pid, entry) in &self.entries {
            if *pid != entry.pid {
                return Err(format!(
                    "entry keyed by PID {} describes PID {}",
                    pid, entry.pid
                ));
            }
            if !live.contains(pid) {
                return Err(format!("entry for PID {} outlived its process", pid));
            }
        }
        Ok(())
    }

    /// Copy of every entry, sorted by PID.
    pub fn views(&self) -> Vec<AppliedEntryView> {
        let now = Instant::now();
        let mut views: Vec<AppliedEntryView> = self
            .entries
            .values()
            .map(|e| AppliedEntryView {
                pid: e.pid,
                name: e.name.clone(),
                profile: e.profile,
                last_result: e.last_attempt.map(|(_, result)| result),
                last_trim_secs_ago: e
                    .last_trim
                    .map(|t| now.saturating_duration_since(t).as_secs()),
                last_trim_ok: e.last_trim_ok,
                first_seen: e.first_seen,
                applied_at: e.applied_at,
            })
            .collect();
        views.sort_by_key(|v| v.pid);
        views
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, key: u32, entry: AppliedEntry) {
        self.entries.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_new_then_known() {
        let mut state = AppliedState::new();
        assert_eq!(state.observe(4321, "SGuard64.exe", 100), Observation::New);
        assert_eq!(state.observe(4321, "sguard64.exe", 100), Observation::Known);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_observe_pid_reuse_replaces_entry() {
        let mut state = AppliedState::new();
        state.observe(4321, "SGuard64.exe", 100);
        state.get_mut(4321).unwrap().profile = Some(PerformanceProfile::Efficiency);

        assert_eq!(state.observe(4321, "SGuard64.exe", 200), Observation::Recreated);
        let entry = state.get(4321).unwrap();
        assert_eq!(entry.start_time, 200);
        assert_eq!(entry.profile, None);
    }

    #[test]
    fn test_purge_removes_absent_pids() {
        let mut state = AppliedState::new();
        state.observe(1, "a.exe", 1);
        state.observe(2, "b.exe", 1);
        state.observe(3, "c.exe", 1);

        let live: HashSet<u32> = [2].into_iter().collect();
        let purged = state.purge(&live);
        assert_eq!(purged.len(), 2);
        assert_eq!(state.len(), 1);
        assert!(state.get(2).is_some());
        assert!(state.check_invariants(&live).is_ok());
    }

    #[test]
    fn test_invariant_detects_mismatched_key() {
        let mut state = AppliedState::new();
        state.insert_raw(10, AppliedEntry::new(11, "x.exe", 0));
        let live: HashSet<u32> = [10].into_iter().collect();
        assert!(state.check_invariants(&live).is_err());
    }

    #[test]
    fn test_views_sorted_by_pid() {
        let mut state = AppliedState::new();
        state.observe(30, "c.exe", 1);
        state.observe(10, "a.exe", 1);
        let pids: Vec<u32> = state.views().iter().map(|v| v.pid).collect();
        assert_eq!(pids, vec![10, 30]);
    }
}
