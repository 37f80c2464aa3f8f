//! Workflow state document (`.agents/state.json`).

use serde::{Deserialize, Serialize};

/// Iteration id assigned by the very first `flow start`.
pub const FIRST_ITERATION: &str = "000001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Define,
    Prototype,
    Refactor,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Define => "define",
            Phase::Prototype => "prototype",
            Phase::Refactor => "refactor",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailMode {
    #[default]
    Strict,
    Relaxed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    PendingApproval,
    Created,
    Approved,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::PendingApproval => "pending_approval",
            StepStatus::Created => "created",
            StepStatus::Approved => "approved",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    /// A step that never started, or started without reaching a terminal
    /// status, is runnable again.
    pub fn is_runnable(self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::InProgress)
    }
}

/// Status/artifact pair tracked for every step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStep {
    pub status: StepStatus,
    pub file: Option<String>,
}

impl PhaseStep {
    pub fn set(&mut self, status: StepStatus, file: impl Into<String>) {
        self.status = status;
        self.file = Some(file.into());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinePhase {
    pub requirement_definition: PhaseStep,
    pub prd_generation: PhaseStep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrototypePhase {
    pub project_context: PhaseStep,
    pub test_plan: PhaseStep,
    pub tp_generation: PhaseStep,
    pub prototype_build: PhaseStep,
    pub test_execution: PhaseStep,
    pub prototype_approved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorPhase {
    pub evaluation_report: PhaseStep,
    pub refactor_plan: PhaseStep,
    pub refactor_execution: PhaseStep,
    pub changelog: PhaseStep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phases {
    pub define: DefinePhase,
    pub prototype: PrototypePhase,
    pub refactor: RefactorPhase,
}

/// Archived iteration record appended by `flow start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: String,
    pub archived_at: String,
    pub archived_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_iteration: String,
    pub current_phase: Phase,
    /// Absent in the document means strict.
    #[serde(
        rename = "flow_guardrail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub guardrail_mode: Option<GuardrailMode>,
    pub phases: Phases,
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl WorkflowState {
    pub fn guardrail(&self) -> GuardrailMode {
        self.guardrail_mode.unwrap_or_default()
    }

    /// Artifact name for this iteration, e.g. `it_000003_test-plan.md`.
    pub fn artifact_name(&self, suffix: &str) -> String {
        format!("it_{}_{}", self.current_iteration, suffix)
    }

    /// Stamp the document with the writer and the current time.
    pub fn touch(&mut self, updated_by: &str) {
        self.last_updated = now_rfc3339();
        self.updated_by = Some(updated_by.to_string());
    }
}

/// Fresh state for an iteration: define phase, every step pending.
pub fn initial_state(iteration: &str) -> WorkflowState {
    WorkflowState {
        current_iteration: iteration.to_string(),
        current_phase: Phase::Define,
        guardrail_mode: None,
        phases: Phases::default(),
        last_updated: now_rfc3339(),
        updated_by: None,
        history: Vec::new(),
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
