//! Guardrail enforcement for phase/status violations.
//!
//! | mode    | force | behaviour                           |
//! |---------|-------|-------------------------------------|
//! | strict  | no    | fail with the violation message     |
//! | strict  | yes   | warn, proceed                       |
//! | relaxed | no    | warn, ask `[y/N]`, abort unless yes |
//! | relaxed | yes   | warn, proceed                       |

use thiserror::Error;
use tracing::debug;

use crate::io::console::{Console, LineReader, is_yes};
use crate::state::{GuardrailMode, WorkflowState};

pub const CONFIRM_PROMPT: &str = "Proceed anyway? [y/N]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardrailError {
    /// Strict mode refused the operation.
    #[error("{0}")]
    Violation(String),
    /// The operator declined (or closed stdin) at the confirmation prompt.
    #[error("Aborted.")]
    Aborted,
}

/// Check a precondition against the state's guardrail mode.
///
/// No-op when `violated` is false. Reader failures count as a declined prompt.
pub fn enforce_guardrail(
    state: &WorkflowState,
    violated: bool,
    message: &str,
    force: bool,
    reader: &dyn LineReader,
    console: &dyn Console,
) -> Result<(), GuardrailError> {
    if !violated {
        return Ok(());
    }

    let mode = state.guardrail();
    if mode == GuardrailMode::Strict && !force {
        return Err(GuardrailError::Violation(message.to_string()));
    }

    console.err(&format!("Warning: {message}"));
    if force {
        debug!(?mode, "guardrail overridden by force");
        return Ok(());
    }

    console.err(CONFIRM_PROMPT);
    let answer = reader.read_line().unwrap_or_else(|err| {
        debug!(err = %err, "confirmation read failed");
        None
    });
    if is_yes(answer.as_deref()) {
        return Ok(());
    }

    console.err("Aborted.");
    Err(GuardrailError::Aborted)
}
