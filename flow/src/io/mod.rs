//! I/O helpers for flow commands.

pub mod agent;
pub mod atomic;
pub mod config;
pub mod console;
pub mod git;
pub mod issue_store;
pub mod paths;
pub mod process;
pub mod schema;
pub mod skills;
pub mod state_store;
