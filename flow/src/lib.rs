//! Phase-driven workflow engine for agent-assisted development iterations.
//!
//! An iteration moves through three phases (define, prototype, refactor).
//! The persisted state document records each step's status; from it the
//! engine decides the next step, stops at human approval gates and runs the
//! agent-backed steps in between. A separate queue drives automated fixes for
//! the iteration's issue ledger with a bounded retry budget; the agent drafts
//! that ledger, and issues the queue gives up on get guided manual sessions.
//!
//! - **[`core`]**: Pure, deterministic logic (decision engine, failure
//!   classification, retry transitions, invariants). No I/O.
//! - **[`io`]**: Side-effecting adapters (state store, issue ledger, agent
//!   processes, git, config, console). Each sits behind a trait where the
//!   orchestration needs a fake in tests.
//!
//! Orchestration modules ([`flow`], [`steps`], [`execution`], [`approve`],
//! [`start`], [`create_issue`], [`triage`], [`manual_fix`], [`validate`])
//! combine the two to implement CLI commands.

pub mod approve;
pub mod core;
pub mod create_issue;
pub mod execution;
pub mod exit_codes;
pub mod flow;
pub mod guardrail;
pub mod io;
pub mod issue;
pub mod logging;
pub mod manual_fix;
pub mod start;
pub mod state;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod triage;
pub mod validate;
