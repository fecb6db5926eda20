//! Core data model: profiles, rules, configuration and applied state

pub mod config;
pub mod error;
pub mod profile;
pub mod rules;
pub mod state;
