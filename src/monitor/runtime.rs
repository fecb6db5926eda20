//! The monitor task and its command handle
//!
//! The loop runs on one tokio task; each cycle itself runs on the blocking
//! pool because every platform call is synchronous. Other tasks talk to it only through
//! [`MonitorHandle`]: commands go over an mpsc channel, events come back on
//! a broadcast channel, and the latest [`MonitorSnapshot`] is published on a
//! watch channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::engine::{MonitorLoop, MonitorSnapshot};
use super::events::{MonitorEvent, MonitorState};
use super::services::{
    ServiceAction, ServiceController, ServiceDescriptor, ServiceOutcome, ServiceReport,
};
use crate::core::config::GovernorConfig;
use crate::core::error::{ConfigurationError, CycleErrorKind, MonitorError};
use crate::core::profile::PerformanceProfile;
use crate::platform::Platform;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

enum Command {
    Start(oneshot::Sender<MonitorState>),
    Pause(oneshot::Sender<MonitorState>),
    Resume(oneshot::Sender<MonitorState>),
    Stop(oneshot::Sender<MonitorState>),
    SetEnabled(bool, oneshot::Sender<MonitorState>),
    SetProfile {
        rule: String,
        profile: PerformanceProfile,
        reply: oneshot::Sender<Result<(), ConfigurationError>>,
    },
    SetDialogSuppression(bool, oneshot::Sender<()>),
    TriggerServiceAction {
        descriptor: ServiceDescriptor,
        action: ServiceAction,
        reply: oneshot::Sender<ServiceOutcome>,
    },
    Refresh(oneshot::Sender<()>),
    /// Posted back by the blocking service worker
    ServiceReports(Vec<ServiceReport>),
    Shutdown,
}

/// Cloneable handle to a running monitor task.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<MonitorEvent>,
    snapshot: watch::Receiver<MonitorSnapshot>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Latest published state. Never blocks on the monitor task.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot.clone()
    }

    pub async fn start(&self) -> Result<MonitorState, MonitorError> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<MonitorState, MonitorError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<MonitorState, MonitorError> {
        self.request(Command::Resume).await
    }

    /// Resolves once the loop holds no process handles and its applied
    /// state is cleared.
    pub async fn stop(&self) -> Result<MonitorState, MonitorError> {
        self.request(Command::Stop).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<MonitorState, MonitorError> {
        self.request(|reply| Command::SetEnabled(enabled, reply)).await
    }

    pub async fn set_profile(
        &self,
        rule: &str,
        profile: PerformanceProfile,
    ) -> Result<(), MonitorError> {
        let rule = rule.to_string();
        self.request(|reply| Command::SetProfile {
            rule,
            profile,
            reply,
        })
        .await?
        .map_err(MonitorError::from)
    }

    pub async fn set_dialog_suppression(&self, enabled: bool) -> Result<(), MonitorError> {
        self.request(|reply| Command::SetDialogSuppression(enabled, reply))
            .await
    }

    pub async fn trigger_service_action(
        &self,
        descriptor: ServiceDescriptor,
        action: ServiceAction,
    ) -> Result<ServiceOutcome, MonitorError> {
        self.request(|reply| Command::TriggerServiceAction {
            descriptor,
            action,
            reply,
        })
        .await
    }

    pub async fn refresh(&self) -> Result<(), MonitorError> {
        self.request(Command::Refresh).await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MonitorError::Closed)?;
        rx.await.map_err(|_| MonitorError::Closed)
    }
}

/// Spawn the monitor task on the current tokio runtime. Monitoring starts
/// right away when the configuration has it enabled.
pub fn spawn_monitor(config: &GovernorConfig, platform: Platform) -> (MonitorHandle, JoinHandle<()>) {
    let (events_tx, _) = broadcast::channel(EVENT_QUEUE);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);

    let services = Arc::new(ServiceController::new(
        Arc::clone(&platform.services),
        config.service_timeout(),
    ));
    let monitor = MonitorLoop::new(config, platform, events_tx.clone());
    let (snapshot_tx, snapshot_rx) = watch::channel(monitor.snapshot(&[]));

    let task = MonitorTask {
        monitor: Arc::new(Mutex::new(monitor)),
        services,
        service_reports: Vec::new(),
        interval: config.poll_interval(),
        events: events_tx.clone(),
        snapshot: snapshot_tx,
        worker_tx: cmd_tx.downgrade(),
    };

    let handle = MonitorHandle {
        commands: cmd_tx,
        events: events_tx,
        snapshot: snapshot_rx,
    };
    let enabled = config.enabled;
    let join = tokio::spawn(task.run(cmd_rx, enabled));
    (handle, join)
}

struct MonitorTask {
    /// Shared only with the in-flight cycle, which the task always awaits
    monitor: Arc<Mutex<MonitorLoop>>,
    services: Arc<ServiceController>,
    service_reports: Vec<ServiceReport>,
    interval: Duration,
    events: broadcast::Sender<MonitorEvent>,
    snapshot: watch::Sender<MonitorSnapshot>,
    /// Weak so the task's own sender never keeps the channel open
    worker_tx: mpsc::WeakSender<Command>,
}

impl MonitorTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, enabled: bool) {
        if enabled {
            self.monitor().start();
        }
        self.refresh_service_reports();
        self.publish();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let running = self.monitor().state() == MonitorState::Running;
                    if running && self.cycle().await {
                        self.monitor().record_skipped_cycle();
                        warn!(interval_ms = self.interval.as_millis() as u64, "Cycle overran its interval, skipping next tick");
                        ticker.reset();
                    }
                    self.publish();
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd).await {
                        break;
                    }
                    self.publish();
                }
            }
        }

        self.monitor().stop();
        self.publish();
        info!("Monitor task exited");
    }

    fn monitor(&self) -> MutexGuard<'_, MonitorLoop> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the cycle ran longer than the interval.
    async fn cycle(&self) -> bool {
        let monitor = Arc::clone(&self.monitor);
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let mut monitor = monitor.lock().unwrap_or_else(PoisonError::into_inner);
            monitor.run_cycle(std::time::Instant::now()).map(|_| ())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(detail)) => warn!(%detail, "Monitoring halted"),
            Err(e) => error!(error = %e, "Cycle task failed"),
        }
        started.elapsed() > self.interval
    }

    /// Returns false when the task should exit.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start(reply) => {
                let _ = reply.send(self.monitor().start());
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.monitor().pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.monitor().resume());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.monitor().stop());
            }
            Command::SetEnabled(enabled, reply) => {
                let _ = reply.send(self.monitor().set_enabled(enabled));
            }
            Command::SetProfile {
                rule,
                profile,
                reply,
            } => {
                let _ = reply.send(self.monitor().set_profile(&rule, profile));
            }
            Command::SetDialogSuppression(enabled, reply) => {
                self.monitor().set_dialog_suppression(enabled);
                let _ = reply.send(());
            }
            Command::TriggerServiceAction {
                descriptor,
                action,
                reply,
            } => self.service_action(descriptor, action, reply),
            Command::Refresh(reply) => {
                let running = self.monitor().state() == MonitorState::Running;
                if running {
                    self.cycle().await;
                }
                self.refresh_service_reports();
                let _ = reply.send(());
            }
            Command::ServiceReports(reports) => {
                self.service_reports = reports;
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Service calls may wait for the SCM, so they run on the blocking
    /// pool and never stall the cycle timer.
    fn service_action(
        &self,
        descriptor: ServiceDescriptor,
        action: ServiceAction,
        reply: oneshot::Sender<ServiceOutcome>,
    ) {
        let services = Arc::clone(&self.services);
        let events = self.events.clone();
        let worker_tx = self.worker_tx.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = services.perform(&descriptor, action);
            if let Err(failure) = &outcome {
                let _ = events.send(MonitorEvent::CycleError {
                    kind: CycleErrorKind::ServiceActionFailure,
                    detail: format!("{} {}: {}", action, descriptor.service_name, failure),
                });
            }
            let _ = events.send(MonitorEvent::ServiceActionResult {
                descriptor,
                action,
                outcome: outcome.clone(),
            });
            let _ = reply.send(outcome);

            let reports = services.report_all();
            if let Some(tx) = worker_tx.upgrade() {
                let _ = tx.blocking_send(Command::ServiceReports(reports));
            }
        });
    }

    fn refresh_service_reports(&self) {
        let services = Arc::clone(&self.services);
        let worker_tx = self.worker_tx.clone();
        tokio::task::spawn_blocking(move || {
            let reports = services.report_all();
            debug!(count = reports.len(), "Service reports refreshed");
            if let Some(tx) = worker_tx.upgrade() {
                let _ = tx.blocking_send(Command::ServiceReports(reports));
            }
        });
    }

    fn publish(&self) {
        self.snapshot
            .send_replace(self.monitor().snapshot(&self.service_reports));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuleEntry;
    use crate::core::error::ServiceActionFailure;
    use crate::monitor::services::ServiceState;
    use crate::platform::mock::MockPlatform;
    use crate::platform::{ProcessSnapshot, ProcessSource, ServiceRunState, ServiceStartKind};
    use std::sync::mpsc as std_mpsc;

    /// Blocks every snapshot until the test lets it through.
    struct GatedSource {
        entered: mpsc::UnboundedSender<()>,
        release: std_mpsc::Receiver<()>,
    }

    impl ProcessSource for GatedSource {
        fn snapshot(&mut self, _wanted: &dyn Fn(&str) -> bool) -> ProcessSnapshot {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            ProcessSnapshot::default()
        }
    }

    fn config(enabled: bool) -> GovernorConfig {
        GovernorConfig {
            enabled,
            service_timeout_secs: 1,
            rules: vec![RuleEntry {
                match_name: "SGuard64.exe".into(),
                profile: "efficiency".into(),
                suppress_dialogs: false,
                trim_on_idle: false,
            }],
            ..GovernorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_commands() {
        let mock = MockPlatform::new();
        let (handle, join) = spawn_monitor(&config(false), mock.platform());

        assert_eq!(handle.pause().await, Ok(MonitorState::Stopped));
        assert_eq!(handle.start().await, Ok(MonitorState::Running));
        assert_eq!(handle.pause().await, Ok(MonitorState::Paused));
        assert_eq!(handle.resume().await, Ok(MonitorState::Running));
        assert_eq!(handle.stop().await, Ok(MonitorState::Stopped));
        assert_eq!(handle.snapshot().state, MonitorState::Stopped);

        handle.shutdown().await;
        join.await.unwrap();
        assert_eq!(handle.start().await, Err(MonitorError::Closed));
    }

    #[tokio::test]
    async fn test_refresh_runs_cycle_and_publishes() {
        let mock = MockPlatform::new();
        mock.spawn(4321, "SGuard64.exe", 1);
        let (handle, join) = spawn_monitor(&config(false), mock.platform());

        handle.set_enabled(true).await.unwrap();
        handle.refresh().await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, MonitorState::Running);
        let entry = snapshot.applied.iter().find(|e| e.pid == 4321).unwrap();
        assert_eq!(entry.profile, Some(PerformanceProfile::Efficiency));

        handle.stop().await.unwrap();
        assert!(handle.snapshot().applied.is_empty());
        assert_eq!(mock.opened_handles(), mock.released_handles());

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_profile_unknown_rule_rejected() {
        let mock = MockPlatform::new();
        let (handle, join) = spawn_monitor(&config(false), mock.platform());

        assert!(handle
            .set_profile("SGuard64.exe", PerformanceProfile::High)
            .await
            .is_ok());
        assert!(matches!(
            handle.set_profile("nope.exe", PerformanceProfile::High).await,
            Err(MonitorError::Rejected(_))
        ));

        handle.set_dialog_suppression(false).await.unwrap();
        assert!(!handle.snapshot().dialog_suppression);

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_service_action_result_event() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-GAME", ServiceRunState::Running, ServiceStartKind::System);
        let (handle, join) = spawn_monitor(&config(false), mock.platform());
        let mut events = handle.subscribe();

        let game = ServiceDescriptor::find("ACE-GAME").unwrap();
        let outcome = handle
            .trigger_service_action(game.clone(), ServiceAction::Stop)
            .await
            .unwrap();
        assert_eq!(outcome, Ok(ServiceState::Stopped));

        let mut saw_result = false;
        while let Ok(ev) = events.try_recv() {
            if let MonitorEvent::ServiceActionResult { descriptor, action, .. } = ev {
                assert_eq!(descriptor, game);
                assert_eq!(action, ServiceAction::Stop);
                saw_result = true;
            }
        }
        assert!(saw_result);

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_service_action_failure_is_typed() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Running, ServiceStartKind::System);
        mock.deny_service("ACE-BASE");
        let (handle, join) = spawn_monitor(&config(false), mock.platform());

        let outcome = handle
            .trigger_service_action(ServiceDescriptor::find("ACE-BASE").unwrap(), ServiceAction::Delete)
            .await
            .unwrap();
        assert!(matches!(outcome, Err(ServiceActionFailure::AccessDenied(_))));

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_one_tick_without_backlog() {
        let mock = MockPlatform::new();
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let (release, release_rx) = std_mpsc::channel();
        let platform = Platform::new(
            Box::new(GatedSource {
                entered: entered_tx,
                release: release_rx,
            }),
            Arc::new(mock.clone()),
            Box::new(mock.clone()),
            Arc::new(mock.clone()),
        );
        let config = GovernorConfig {
            poll_interval_secs: 1,
            ..config(true)
        };
        let (handle, join) = spawn_monitor(&config, platform);
        let mut snapshots = handle.watch();

        // First tick fires at once; hold the cycle for three intervals.
        entered.recv().await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        release.send(()).unwrap();

        let after_first = snapshots.wait_for(|s| s.cycles >= 1).await.unwrap().clone();
        assert_eq!(after_first.cycles, 1);
        assert_eq!(after_first.skipped_cycles, 1);

        // The missed ticks are not replayed.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(handle.snapshot().cycles, 1);
        assert!(entered.try_recv().is_err());

        release.send(()).unwrap();
        let after_second = snapshots.wait_for(|s| s.cycles >= 2).await.unwrap().clone();
        assert_eq!(after_second.cycles, 2);
        assert_eq!(after_second.skipped_cycles, 1);

        handle.shutdown().await;
        join.await.unwrap();
    }
}
