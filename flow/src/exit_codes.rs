//! Stable exit codes for flow CLI commands.

/// Command succeeded, or `flow run` stopped at an approval gate or completion.
pub const OK: i32 = 0;
/// Command failed: invalid state/ledger/config, step handler error, or other errors.
pub const FAILURE: i32 = 1;
/// `flow next` found the iteration complete.
pub const COMPLETE: i32 = 2;
/// `flow run` or `flow next` found no runnable step.
pub const BLOCKED: i32 = 3;
/// A strict guardrail refused the operation.
pub const GUARDRAIL: i32 = 4;
/// The operator declined a relaxed guardrail confirmation.
pub const ABORTED: i32 = 5;
