//! Persistence for host-side state.

pub mod config;
pub mod profile;
