//! The monitor loop
//!
//! Owns the rule set and the applied state. One call to [`MonitorLoop::run_cycle`]
//! is one full pass: snapshot, match, apply, suppress, trim, purge. The loop
//! itself has no timer; the runtime task drives it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::applier::PolicyApplier;
use super::dialog::DialogSuppressor;
use super::events::{ErrorRecord, MonitorEvent, MonitorState};
use super::services::ServiceReport;
use super::trimmer::MemoryTrimmer;
use crate::core::config::GovernorConfig;
use crate::core::error::{ConfigurationError, CycleErrorKind};
use crate::core::profile::{logical_cores, PerformanceProfile};
use crate::core::rules::{ProcessRule, RuleSet};
use crate::core::state::{AppliedEntryView, AppliedState, Observation};
use crate::platform::{Platform, ProcessSource};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub matched: usize,
    pub applied: usize,
    /// Matches already at their rule's profile
    pub unchanged: usize,
    pub partial_failures: usize,
    pub dialogs_closed: usize,
    pub trimmed: usize,
    pub purged: usize,
    /// Enumerated but not openable this cycle
    pub skipped: usize,
    #[serde(skip)]
    pub duration: Duration,
}

/// Copy of the loop's state for readers on other tasks.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub state: MonitorState,
    pub applied: Vec<AppliedEntryView>,
    pub rules: Vec<ProcessRule>,
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub dialogs_closed: u64,
    pub dialog_suppression: bool,
    pub last_error: Option<ErrorRecord>,
    pub services: Vec<ServiceReport>,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            state: MonitorState::Stopped,
            applied: Vec::new(),
            rules: Vec::new(),
            cycles: 0,
            skipped_cycles: 0,
            dialogs_closed: 0,
            dialog_suppression: false,
            last_error: None,
            services: Vec::new(),
        }
    }
}

pub struct MonitorLoop {
    state: MonitorState,
    rules: RuleSet,
    applied: AppliedState,
    source: Box<dyn ProcessSource>,
    applier: PolicyApplier,
    trimmer: MemoryTrimmer,
    dialogs: DialogSuppressor,
    events: broadcast::Sender<MonitorEvent>,
    pending_config_errors: Vec<ConfigurationError>,
    cycles: u64,
    skipped_cycles: u64,
    dialogs_closed: u64,
    last_error: Option<ErrorRecord>,
}

impl MonitorLoop {
    /// Build a stopped loop from configuration. Rejected rules are kept
    /// aside and reported when the loop first starts.
    pub fn new(
        config: &GovernorConfig,
        platform: Platform,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self::with_cores(config, platform, events, logical_cores())
    }

    pub fn with_cores(
        config: &GovernorConfig,
        platform: Platform,
        events: broadcast::Sender<MonitorEvent>,
        cores: usize,
    ) -> Self {
        let (rules, pending_config_errors) = config.rule_set();
        let Platform {
            processes,
            control,
            windows,
            services: _,
        } = platform;

        Self {
            state: MonitorState::Stopped,
            rules,
            applied: AppliedState::new(),
            source: processes,
            applier: PolicyApplier::new(Arc::clone(&control), cores),
            trimmer: MemoryTrimmer::new(control, config.trim_interval()),
            dialogs: DialogSuppressor::new(windows, config.dialogs.clone(), config.suppress_dialogs),
            events,
            pending_config_errors,
            cycles: 0,
            skipped_cycles: 0,
            dialogs_closed: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn applied(&self) -> &AppliedState {
        &self.applied
    }

    pub fn start(&mut self) -> MonitorState {
        if self.state == MonitorState::Stopped {
            for err in std::mem::take(&mut self.pending_config_errors) {
                warn!(rule = %err.rule, reason = %err.reason, "Rule skipped");
                self.report_error(CycleErrorKind::Configuration, err.to_string());
            }
            info!(rules = self.rules.len(), "Monitoring started");
            self.transition(MonitorState::Running);
        }
        self.state
    }

    pub fn pause(&mut self) -> MonitorState {
        if self.state == MonitorState::Running {
            info!("Monitoring paused");
            self.transition(MonitorState::Paused);
        }
        self.state
    }

    pub fn resume(&mut self) -> MonitorState {
        if self.state == MonitorState::Paused {
            info!("Monitoring resumed");
            self.transition(MonitorState::Running);
        }
        self.state
    }

    /// Stop and forget every tracked process. Handles live only inside a
    /// cycle, so none are held once this returns.
    pub fn stop(&mut self) -> MonitorState {
        if self.state != MonitorState::Stopped {
            self.applied.clear();
            info!("Monitoring stopped");
            self.transition(MonitorState::Stopped);
        }
        self.state
    }

    pub fn set_enabled(&mut self, enabled: bool) -> MonitorState {
        match (enabled, self.state) {
            (true, MonitorState::Stopped) => self.start(),
            (true, MonitorState::Paused) => self.resume(),
            (false, MonitorState::Running) => self.pause(),
            _ => self.state,
        }
    }

    /// Change a rule's profile. Matching processes are re-applied on the
    /// next cycle because their recorded profile no longer agrees.
    pub fn set_profile(
        &mut self,
        rule: &str,
        profile: PerformanceProfile,
    ) -> Result<(), ConfigurationError> {
        self.rules.set_profile(rule, profile)?;
        info!(rule, %profile, "Rule profile changed");
        Ok(())
    }

    pub fn set_dialog_suppression(&mut self, enabled: bool) {
        if self.dialogs.is_enabled() != enabled {
            info!(enabled, "Dialog suppression toggled");
        }
        self.dialogs.set_enabled(enabled);
    }

    pub fn record_skipped_cycle(&mut self) {
        self.skipped_cycles += 1;
    }

    pub fn snapshot(&self, services: &[ServiceReport]) -> MonitorSnapshot {
        MonitorSnapshot {
            state: self.state,
            applied: self.applied.views(),
            rules: self.rules.rules().to_vec(),
            cycles: self.cycles,
            skipped_cycles: self.skipped_cycles,
            dialogs_closed: self.dialogs_closed,
            dialog_suppression: self.dialogs.is_enabled(),
            last_error: self.last_error.clone(),
            services: services.to_vec(),
        }
    }

    /// Run one full cycle. Per-process failures are absorbed; only a broken
    /// internal invariant ends monitoring, in which case the loop is
    /// already `Stopped` when the error comes back.
    pub fn run_cycle(&mut self, now: Instant) -> Result<CycleReport, String> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let rules = &self.rules;
        let snapshot = self.source.snapshot(&|name| rules.contains(name));
        // Skipped processes still count as alive so their state survives a
        // failed open.
        let live: HashSet<u32> = snapshot.live_pids();
        let mut dialog_owners: HashMap<u32, String> = HashMap::new();

        for skipped in &snapshot.skipped {
            debug!(pid = skipped.pid, name = %skipped.name, error = %skipped.error, "Skipping process this cycle");
        }
        report.skipped = snapshot.skipped.len();

        for record in &snapshot.records {
            let Some(rule) = self.rules.match_name(&record.name) else {
                continue;
            };
            report.matched += 1;
            if rule.suppress_dialogs {
                dialog_owners.insert(record.pid, record.name.clone());
            }

            let observation = self
                .applied
                .observe(record.pid, &record.name, record.start_time);
            if observation != Observation::Known {
                if observation == Observation::Recreated {
                    debug!(pid = record.pid, name = %record.name, "PID reused by a new process");
                }
                info!(pid = record.pid, name = %record.name, "Process matched");
                send(
                    &self.events,
                    MonitorEvent::ProcessMatched {
                        name: record.name.clone(),
                        pid: record.pid,
                    },
                );
            }

            let Some(entry) = self.applied.get_mut(record.pid) else {
                continue;
            };

            if entry.profile == Some(rule.profile) {
                report.unchanged += 1;
            } else {
                let result = self.applier.apply(&record.handle, rule.profile);
                let changed = entry.last_attempt != Some((rule.profile, result));
                entry.last_attempt = Some((rule.profile, result));

                if result.is_complete() {
                    report.applied += 1;
                    entry.profile = Some(rule.profile);
                    entry.applied_at = Some(chrono::Local::now());
                    info!(pid = record.pid, name = %record.name, profile = %rule.profile, "Profile applied");
                } else {
                    report.partial_failures += 1;
                    let total = result.is_total_failure();
                    if changed {
                        let detail = format!(
                            "{} (PID {}): {} rejected priority={} affinity={} throttling={} io={}",
                            record.name,
                            record.pid,
                            rule.profile,
                            !result.applied_priority,
                            !result.applied_affinity,
                            !result.applied_throttle,
                            !result.applied_io_priority
                        );
                        warn!(pid = record.pid, name = %record.name, profile = %rule.profile, total, "Policy not fully applied");
                        self.last_error =
                            Some(ErrorRecord::now(CycleErrorKind::PartialPolicyFailure, detail.clone()));
                        send(
                            &self.events,
                            MonitorEvent::CycleError {
                                kind: CycleErrorKind::PartialPolicyFailure,
                                detail,
                            },
                        );
                    }
                }

                if changed {
                    send(
                        &self.events,
                        MonitorEvent::PolicyApplied {
                            pid: record.pid,
                            name: record.name.clone(),
                            profile: rule.profile,
                            result,
                        },
                    );
                }
            }

            if rule.trim_on_idle {
                if let Some(ok) = self.trimmer.trim_if_due(entry, &record.handle, now) {
                    if ok {
                        report.trimmed += 1;
                        debug!(pid = record.pid, name = %record.name, "Working set trimmed");
                    }
                }
            }
        }

        if self.dialogs.is_enabled() {
            for closed in self.dialogs.scan(&dialog_owners) {
                report.dialogs_closed += 1;
                send(
                    &self.events,
                    MonitorEvent::DialogClosed {
                        name: closed.owner,
                        title: closed.title,
                    },
                );
            }
            self.dialogs_closed += report.dialogs_closed as u64;
        }

        // Release every handle before touching state that outlives the cycle.
        drop(snapshot);

        for gone in self.applied.purge(&live) {
            debug!(pid = gone.pid, name = %gone.name, "Process exited, state purged");
            report.purged += 1;
        }

        if let Err(detail) = self.applied.check_invariants(&live) {
            error!(%detail, "Applied state corrupted, stopping monitor");
            self.report_error(CycleErrorKind::Fatal, detail.clone());
            self.stop();
            return Err(detail);
        }

        self.cycles += 1;
        report.duration = started.elapsed();
        debug!(
            matched = report.matched,
            applied = report.applied,
            purged = report.purged,
            elapsed_ms = report.duration.as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }

    fn transition(&mut self, state: MonitorState) {
        self.state = state;
        send(&self.events, MonitorEvent::StateChanged(state));
    }

    fn report_error(&mut self, kind: CycleErrorKind, detail: String) {
        self.last_error = Some(ErrorRecord::now(kind, detail.clone()));
        send(&self.events, MonitorEvent::CycleError { kind, detail });
    }

    #[cfg(test)]
    pub(crate) fn applied_mut(&mut self) -> &mut AppliedState {
        &mut self.applied
    }
}

/// Events are advisory; having no subscribers is not an error.
fn send(events: &broadcast::Sender<MonitorEvent>, event: MonitorEvent) {
    let _ = events.send(event);
}
