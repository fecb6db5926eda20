//! Process privileges

pub mod privileges;

pub use privileges::{PrivilegeLevel, PrivilegeManager};
