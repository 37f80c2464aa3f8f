//! State load/save with schema + invariant validation.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_state_invariants;
use crate::io::atomic::write_json_atomic;
use crate::io::schema::Schema;
use crate::state::WorkflowState;

/// Persistence port for the workflow state document.
pub trait StateStore {
    /// Load and validate. Malformed documents are errors, never defaults.
    fn read(&self) -> Result<WorkflowState>;
    /// Replace the document atomically.
    fn write(&self, state: &WorkflowState) -> Result<()>;
}

/// State stored as pretty JSON at `.agents/state.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl StateStore for FileStateStore {
    fn read(&self) -> Result<WorkflowState> {
        let path = &self.path;
        if !path.exists() {
            return Err(anyhow!(
                "missing state file {}; run `flow start` first",
                path.display()
            ));
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", path.display()))?;
        Schema::state()?
            .check(&value)
            .map_err(|err| anyhow!("state schema validation failed: {err}"))?;
        let state: WorkflowState = serde_json::from_value(value)
            .with_context(|| format!("deserialize state {}", path.display()))?;
        check_invariants(&state)?;
        debug!(
            iteration = %state.current_iteration,
            phase = state.current_phase.as_str(),
            "loaded state"
        );
        Ok(state)
    }

    fn write(&self, state: &WorkflowState) -> Result<()> {
        check_invariants(state)?;
        write_json_atomic(&self.path, state)
            .with_context(|| format!("write state {}", self.path.display()))
    }
}

fn check_invariants(state: &WorkflowState) -> Result<()> {
    let errors = validate_state_invariants(state);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("state invariants failed: {}", errors.join("; ")))
}
