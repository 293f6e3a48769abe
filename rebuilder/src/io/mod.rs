//! I/O helpers for rebuilder commands.

pub mod autosave;
pub mod build;
pub mod client;
pub mod config;
pub mod engine;
pub mod kill;
pub mod launcher;
pub mod pid_store;
pub mod process;
pub mod project;
pub mod readiness;
