//! Process monitoring: the polling loop and the components it drives

pub mod applier;
pub mod dialog;
pub mod engine;
pub mod events;
pub mod runtime;
pub mod services;
pub mod trimmer;

pub use engine::{CycleReport, MonitorLoop, MonitorSnapshot};
pub use events::{ErrorRecord, MonitorEvent, MonitorState};
pub use runtime::{spawn_monitor, MonitorHandle};
pub use services::{
    ServiceAction, ServiceController, ServiceDescriptor, ServiceOutcome, ServiceReport,
    ServiceState,
};
