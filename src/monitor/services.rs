//! Anti-cheat service control
//!
//! Unlike the passive per-cycle work, every action here is triggered by the
//! user and its failure is returned to the caller as a typed reason.

use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::error::ServiceActionFailure;
use crate::platform::{
    PlatformError, PlatformResult, ServiceBackend, ServiceRunState, ServiceStartKind,
};

/// A known anti-cheat service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceDescriptor {
    pub service_name: String,
    /// Backed by a kernel driver
    pub kernel_mode: bool,
}

impl ServiceDescriptor {
    pub fn new(service_name: impl Into<String>, kernel_mode: bool) -> Self {
        Self {
            service_name: service_name.into(),
            kernel_mode,
        }
    }

    /// The fixed list of services installed by the anti-cheat.
    pub fn known() -> Vec<ServiceDescriptor> {
        vec![
            ServiceDescriptor::new("AntiCheatExpert Service", false),
            ServiceDescriptor::new("AntiCheatExpert Protection", false),
            ServiceDescriptor::new("ACE-BASE", true),
            ServiceDescriptor::new("ACE-GAME", true),
        ]
    }

    /// Look up a known service by name, case-insensitively.
    pub fn find(name: &str) -> Option<ServiceDescriptor> {
        Self::known()
            .into_iter()
            .find(|d| d.service_name.eq_ignore_ascii_case(name))
    }
}

/// Coarse service state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Running,
    Stopped,
    Disabled,
    Unknown,
}

impl ServiceState {
    fn from_query(run_state: ServiceRunState, start_kind: ServiceStartKind) -> Self {
        match (run_state, start_kind) {
            (ServiceRunState::Running, _) => ServiceState::Running,
            (ServiceRunState::Stopped, ServiceStartKind::Disabled) => ServiceState::Disabled,
            (ServiceRunState::Stopped, _) => ServiceState::Stopped,
            _ => ServiceState::Unknown,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Disabled => "disabled",
            ServiceState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// User-triggered service action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceAction {
    Start,
    Stop,
    Disable,
    /// Stop, then remove the service registration
    Delete,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Disable => "disable",
            ServiceAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

pub type ServiceOutcome = Result<ServiceState, ServiceActionFailure>;

type Request = fn(&dyn ServiceBackend, &str) -> PlatformResult<()>;

/// Status line for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub descriptor: ServiceDescriptor,
    pub exists: bool,
    pub state: ServiceState,
    pub start_type: ServiceStartKind,
}

/// Synchronous service controller. Every request to the SCM and every
/// wait for a state change is bounded by the same timeout.
pub struct ServiceController {
    backend: Arc<dyn ServiceBackend>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ServiceController {
    pub fn new(backend: Arc<dyn ServiceBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn start(&self, descriptor: &ServiceDescriptor) -> ServiceOutcome {
        self.request(descriptor, |backend, name| backend.start(name))?;
        self.wait_for(descriptor, ServiceRunState::Running)
    }

    pub fn stop(&self, descriptor: &ServiceDescriptor) -> ServiceOutcome {
        self.request(descriptor, |backend, name| backend.stop(name))?;
        self.wait_for(descriptor, ServiceRunState::Stopped)
    }

    pub fn disable(&self, descriptor: &ServiceDescriptor) -> ServiceOutcome {
        self.request(descriptor, |backend, name| backend.disable(name))?;
        let query = self.backend.query(&descriptor.service_name)?;
        if query.start_kind != ServiceStartKind::Disabled {
            return Err(ServiceActionFailure::Os(format!(
                "{} start type is still {:?}",
                descriptor.service_name, query.start_kind
            )));
        }
        Ok(ServiceState::from_query(query.run_state, query.start_kind))
    }

    /// Stop the service if it runs, then delete it. Deletion of a running
    /// driver only takes effect after reboot, so the stop must succeed
    /// first.
    pub fn delete(&self, descriptor: &ServiceDescriptor) -> ServiceOutcome {
        let query = self.backend.query(&descriptor.service_name)?;
        if query.run_state != ServiceRunState::Stopped {
            self.stop(descriptor)?;
        }
        self.request(descriptor, |backend, name| backend.delete(name))?;
        Ok(ServiceState::Unknown)
    }

    /// Current state; any query failure reads as `Unknown`.
    pub fn query_state(&self, descriptor: &ServiceDescriptor) -> ServiceState {
        match self.backend.query(&descriptor.service_name) {
            Ok(q) => ServiceState::from_query(q.run_state, q.start_kind),
            Err(e) => {
                debug!(service = %descriptor.service_name, error = %e, "Service query failed");
                ServiceState::Unknown
            }
        }
    }

    pub fn perform(&self, descriptor: &ServiceDescriptor, action: ServiceAction) -> ServiceOutcome {
        info!(service = %descriptor.service_name, %action, "Service action requested");
        let outcome = match action {
            ServiceAction::Start => self.start(descriptor),
            ServiceAction::Stop => self.stop(descriptor),
            ServiceAction::Disable => self.disable(descriptor),
            ServiceAction::Delete => self.delete(descriptor),
        };
        match &outcome {
            Ok(state) => info!(service = %descriptor.service_name, %action, %state, "Service action done"),
            Err(e) => warn!(service = %descriptor.service_name, %action, error = %e, "Service action failed"),
        }
        outcome
    }

    pub fn report(&self, descriptor: &ServiceDescriptor) -> ServiceReport {
        match self.backend.query(&descriptor.service_name) {
            Ok(q) => ServiceReport {
                descriptor: descriptor.clone(),
                exists: true,
                state: ServiceState::from_query(q.run_state, q.start_kind),
                start_type: q.start_kind,
            },
            Err(e) => {
                if !matches!(e, PlatformError::NotFound(_)) {
                    debug!(service = %descriptor.service_name, error = %e, "Service query failed");
                }
                ServiceReport {
                    descriptor: descriptor.clone(),
                    exists: false,
                    state: ServiceState::Unknown,
                    start_type: ServiceStartKind::Unknown,
                }
            }
        }
    }

    pub fn report_all(&self) -> Vec<ServiceReport> {
        ServiceDescriptor::known()
            .iter()
            .map(|d| self.report(d))
            .collect()
    }

    /// Run one mutating SCM call on a worker thread and give up on it after
    /// the timeout. A call that never returns leaves its worker parked, but
    /// the caller always gets an answer.
    fn request(&self, descriptor: &ServiceDescriptor, call: Request) -> Result<(), ServiceActionFailure> {
        let backend = Arc::clone(&self.backend);
        let name = descriptor.service_name.clone();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("scm-request".into())
            .spawn(move || {
                let _ = tx.send(call(backend.as_ref(), &name));
            })
            .map_err(|e| ServiceActionFailure::Os(format!("{}: {}", descriptor.service_name, e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(ServiceActionFailure::from),
            Err(RecvTimeoutError::Timeout) => Err(ServiceActionFailure::Timeout(format!(
                "{} did not answer within {:?}",
                descriptor.service_name, self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceActionFailure::Os(format!(
                "{}: request worker exited without a result",
                descriptor.service_name
            ))),
        }
    }

    fn wait_for(&self, descriptor: &ServiceDescriptor, target: ServiceRunState) -> ServiceOutcome {
        let deadline = Instant::now() + self.timeout;
        loop {
            let query = self.backend.query(&descriptor.service_name)?;
            if query.run_state == target {
                return Ok(ServiceState::from_query(query.run_state, query.start_kind));
            }
            if Instant::now() >= deadline {
                return Err(ServiceActionFailure::Timeout(format!(
                    "{} still {:?} after {:?}",
                    descriptor.service_name, query.run_state, self.timeout
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    fn controller(mock: &MockPlatform) -> ServiceController {
        ServiceController::new(Arc::new(mock.clone()), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn ace_base() -> ServiceDescriptor {
        ServiceDescriptor::find("ace-base").unwrap()
    }

    #[test]
    fn test_known_services() {
        let known = ServiceDescriptor::known();
        assert_eq!(known.len(), 4);
        assert!(ace_base().kernel_mode);
        assert!(!ServiceDescriptor::find("AntiCheatExpert Service").unwrap().kernel_mode);
        assert!(ServiceDescriptor::find("Spooler").is_none());
    }

    #[test]
    fn test_stop_and_start() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Running, ServiceStartKind::Auto);
        let ctl = controller(&mock);

        assert_eq!(ctl.stop(&ace_base()), Ok(ServiceState::Stopped));
        assert_eq!(ctl.query_state(&ace_base()), ServiceState::Stopped);
        assert_eq!(ctl.start(&ace_base()), Ok(ServiceState::Running));
    }

    #[test]
    fn test_disable_reports_disabled() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Stopped, ServiceStartKind::Auto);
        let ctl = controller(&mock);

        assert_eq!(ctl.disable(&ace_base()), Ok(ServiceState::Disabled));
        assert_eq!(ctl.query_state(&ace_base()), ServiceState::Disabled);
    }

    #[test]
    fn test_access_denied_is_typed() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Running, ServiceStartKind::Auto);
        mock.deny_service("ACE-BASE");
        let ctl = controller(&mock);

        assert!(matches!(
            ctl.stop(&ace_base()),
            Err(ServiceActionFailure::AccessDenied(_))
        ));
    }

    #[test]
    fn test_missing_service_is_not_found() {
        let mock = MockPlatform::new();
        let ctl = controller(&mock);

        assert!(matches!(
            ctl.perform(&ace_base(), ServiceAction::Stop),
            Err(ServiceActionFailure::NotFound(_))
        ));
        assert_eq!(ctl.query_state(&ace_base()), ServiceState::Unknown);
        let report = ctl.report(&ace_base());
        assert!(!report.exists);
        assert_eq!(report.start_type, ServiceStartKind::Unknown);
    }

    #[test]
    fn test_stuck_service_times_out() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Running, ServiceStartKind::Auto);
        mock.stick_service("ACE-BASE");
        let ctl = controller(&mock);

        assert!(matches!(
            ctl.stop(&ace_base()),
            Err(ServiceActionFailure::Timeout(_))
        ));
    }

    #[test]
    fn test_hung_request_times_out() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Stopped, ServiceStartKind::Auto);
        mock.hang_service("ACE-BASE", Duration::from_millis(500));
        let ctl = controller(&mock);

        let started = Instant::now();
        assert!(matches!(
            ctl.disable(&ace_base()),
            Err(ServiceActionFailure::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_delete_stops_first() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-BASE", ServiceRunState::Running, ServiceStartKind::Auto);
        let ctl = controller(&mock);

        assert_eq!(ctl.delete(&ace_base()), Ok(ServiceState::Unknown));
        assert!(mock.service("ACE-BASE").is_none());
    }

    #[test]
    fn test_report_all_covers_known_list() {
        let mock = MockPlatform::new();
        mock.add_service("ACE-GAME", ServiceRunState::Running, ServiceStartKind::System);
        let ctl = controller(&mock);

        let reports = ctl.report_all();
        assert_eq!(reports.len(), 4);
        let game = reports
            .iter()
            .find(|r| r.descriptor.service_name == "ACE-GAME")
            .unwrap();
        assert!(game.exists);
        assert_eq!(game.state, ServiceState::Running);
        assert_eq!(reports.iter().filter(|r| !r.exists).count(), 3);
    }
}
