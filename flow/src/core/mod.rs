//! Deterministic, pure logic shared by the flow core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod decision;
pub mod invariants;
pub mod plan;
pub mod retry;
pub mod types;
