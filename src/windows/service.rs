//! Service control through the SCM

use std::ffi::OsStr;
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::System::Services::{
    ChangeServiceConfigW, CloseServiceHandle, OpenSCManagerW, OpenServiceW, ENUM_SERVICE_TYPE,
    SC_HANDLE, SC_MANAGER_CONNECT, SERVICE_CHANGE_CONFIG, SERVICE_DISABLED, SERVICE_ERROR,
    SERVICE_NO_CHANGE,
};
use windows_service::service::{ServiceAccess, ServiceStartType, ServiceState as ScmState};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
use windows_service::Error as ScmError;

use super::platform_error;
use crate::platform::{
    PlatformError, PlatformResult, ServiceBackend, ServiceQuery, ServiceRunState,
    ServiceStartKind,
};

const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const ERROR_SERVICE_MARKED_FOR_DELETE: i32 = 1072;

pub struct ScmBackend;

/// Closes a raw SCM handle on drop.
struct ScHandle(SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseServiceHandle(self.0);
        }
    }
}

fn os_code(err: &ScmError) -> Option<i32> {
    match err {
        ScmError::Winapi(io) => io.raw_os_error(),
        _ => None,
    }
}

fn scm_error(err: ScmError, context: &str) -> PlatformError {
    match os_code(&err) {
        Some(code) => PlatformError::from_os_code(code, context),
        None => PlatformError::Internal(format!("{}: {}", context, err)),
    }
}

fn open(name: &str, access: ServiceAccess) -> PlatformResult<windows_service::service::Service> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
        .map_err(|e| scm_error(e, "OpenSCManager"))?;
    manager
        .open_service(name, access)
        .map_err(|e| scm_error(e, name))
}

/// Treat the given Win32 codes as success.
fn tolerate(result: Result<(), ScmError>, ok_codes: &[i32], context: &str) -> PlatformResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if os_code(&e).is_some_and(|c| ok_codes.contains(&c)) => Ok(()),
        Err(e) => Err(scm_error(e, context)),
    }
}

impl ServiceBackend for ScmBackend {
    fn query(&self, name: &str) -> PlatformResult<ServiceQuery> {
        let service = open(name, ServiceAccess::QUERY_STATUS | ServiceAccess::QUERY_CONFIG)?;
        let status = service.query_status().map_err(|e| scm_error(e, name))?;
        let config = service.query_config().map_err(|e| scm_error(e, name))?;

        let run_state = match status.current_state {
            ScmState::Running => ServiceRunState::Running,
            ScmState::Stopped => ServiceRunState::Stopped,
            ScmState::StartPending => ServiceRunState::StartPending,
            ScmState::StopPending => ServiceRunState::StopPending,
            ScmState::Paused => ServiceRunState::Paused,
            _ => ServiceRunState::Other,
        };
        let start_kind = match config.start_type {
            ServiceStartType::BootStart => ServiceStartKind::Boot,
            ServiceStartType::SystemStart => ServiceStartKind::System,
            ServiceStartType::AutoStart => ServiceStartKind::Auto,
            ServiceStartType::OnDemand => ServiceStartKind::Manual,
            ServiceStartType::Disabled => ServiceStartKind::Disabled,
        };
        Ok(ServiceQuery {
            run_state,
            start_kind,
        })
    }

    fn start(&self, name: &str) -> PlatformResult<()> {
        let service = open(name, ServiceAccess::START)?;
        tolerate(
            service.start::<&OsStr>(&[]),
            &[ERROR_SERVICE_ALREADY_RUNNING],
            name,
        )
    }

    fn stop(&self, name: &str) -> PlatformResult<()> {
        let service = open(name, ServiceAccess::STOP)?;
        tolerate(
            service.stop().map(|_| ()),
            &[ERROR_SERVICE_NOT_ACTIVE],
            name,
        )
    }

    /// Only the start type changes; every other field is left as is, so
    /// kernel drivers keep their image path.
    fn disable(&self, name: &str) -> PlatformResult<()> {
        let wide = HSTRING::from(name);
        unsafe {
            let manager = ScHandle(
                OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT)
                    .map_err(|e| platform_error(e, "OpenSCManager"))?,
            );
            let service = ScHandle(
                OpenServiceW(manager.0, PCWSTR(wide.as_ptr()), SERVICE_CHANGE_CONFIG)
                    .map_err(|e| platform_error(e, name))?,
            );
            ChangeServiceConfigW(
                service.0,
                ENUM_SERVICE_TYPE(SERVICE_NO_CHANGE),
                SERVICE_DISABLED,
                SERVICE_ERROR(SERVICE_NO_CHANGE),
                PCWSTR::null(),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
            .map_err(|e| platform_error(e, &format!("ChangeServiceConfig({})", name)))
        }
    }

    fn delete(&self, name: &str) -> PlatformResult<()> {
        let service = open(name, ServiceAccess::DELETE)?;
        tolerate(service.delete(), &[ERROR_SERVICE_MARKED_FOR_DELETE], name)
    }
}
