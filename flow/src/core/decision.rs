//! Deterministic next-step decision for a workflow state.
//!
//! Rules are evaluated top to bottom on every call, first match wins:
//! completion, then approval gates (independent of the active phase), then
//! the active phase's step table, then `Blocked`.

use crate::core::types::{ApprovalGate, Decision, StepId};
use crate::state::{Phase, StepStatus, WorkflowState};

/// Map a workflow state to exactly one next action.
pub fn decide(state: &WorkflowState) -> Decision {
    if is_iteration_complete(state) {
        return complete(state);
    }

    if let Some(gate) = pending_approval(state) {
        return Decision::ApprovalGate {
            gate,
            message: approval_message(gate),
        };
    }

    let step = match state.current_phase {
        Phase::Define => next_define_step(state),
        Phase::Prototype => next_prototype_step(state),
        Phase::Refactor => next_refactor_step(state),
    };

    match step {
        Some(step) => Decision::Step(step),
        None => Decision::Blocked {
            message: format!(
                "No runnable flow step found in {} phase.",
                state.current_phase.as_str()
            ),
        },
    }
}

/// First approval gate whose field is awaiting a human, in fixed priority order.
pub fn pending_approval(state: &WorkflowState) -> Option<ApprovalGate> {
    let define = &state.phases.define;
    let prototype = &state.phases.prototype;
    let refactor = &state.phases.refactor;

    // The requirement document parks in `in_progress` while under review.
    if define.requirement_definition.status == StepStatus::InProgress {
        return Some(ApprovalGate::Requirement);
    }
    if prototype.project_context.status == StepStatus::PendingApproval {
        return Some(ApprovalGate::ProjectContext);
    }
    if prototype.test_plan.status == StepStatus::PendingApproval {
        return Some(ApprovalGate::TestPlan);
    }
    if prototype.test_execution.status == StepStatus::Completed && !prototype.prototype_approved {
        return Some(ApprovalGate::Prototype);
    }
    if refactor.refactor_plan.status == StepStatus::PendingApproval {
        return Some(ApprovalGate::RefactorPlan);
    }
    None
}

pub fn approval_message(gate: ApprovalGate) -> String {
    format!("Waiting for approval. Run: flow approve {gate} to continue, then re-run flow run.")
}

fn is_iteration_complete(state: &WorkflowState) -> bool {
    state.current_phase == Phase::Refactor
        && state.phases.refactor.refactor_execution.status == StepStatus::Completed
}

fn complete(state: &WorkflowState) -> Decision {
    Decision::Complete {
        message: format!(
            "Iteration {} complete. All phases finished.",
            state.current_iteration
        ),
    }
}

fn next_define_step(state: &WorkflowState) -> Option<StepId> {
    let define = &state.phases.define;
    let prototype = &state.phases.prototype;

    if define.requirement_definition.status == StepStatus::Pending {
        return Some(StepId::DefineRequirement);
    }
    if define.requirement_definition.status == StepStatus::Approved
        && define.prd_generation.status.is_runnable()
    {
        return Some(StepId::CreatePrd);
    }
    if define.prd_generation.status == StepStatus::Completed
        && prototype.project_context.status == StepStatus::Pending
    {
        return Some(StepId::CreateProjectContext);
    }
    None
}

fn next_prototype_step(state: &WorkflowState) -> Option<StepId> {
    let prototype = &state.phases.prototype;
    let refactor = &state.phases.refactor;

    if prototype.project_context.status == StepStatus::Pending {
        return Some(StepId::CreateProjectContext);
    }
    if prototype.project_context.status == StepStatus::Created
        && prototype.prototype_build.status.is_runnable()
    {
        return Some(StepId::CreatePrototype);
    }
    if prototype.prototype_build.status == StepStatus::Created
        && prototype.test_plan.status == StepStatus::Pending
    {
        return Some(StepId::CreateTestPlan);
    }
    if prototype.tp_generation.status == StepStatus::Created
        && (prototype.test_execution.status.is_runnable()
            || prototype.test_execution.status == StepStatus::Failed)
    {
        return Some(StepId::ExecuteTestPlan);
    }
    if prototype.prototype_approved && refactor.refactor_plan.status == StepStatus::Pending {
        return Some(StepId::DefineRefactorPlan);
    }
    None
}

fn next_refactor_step(state: &WorkflowState) -> Option<StepId> {
    let refactor = &state.phases.refactor;

    if refactor.refactor_plan.status == StepStatus::Pending {
        return Some(StepId::DefineRefactorPlan);
    }
    if refactor.refactor_plan.status == StepStatus::Approved
        && refactor.refactor_execution.status.is_runnable()
    {
        return Some(StepId::ExecuteRefactor);
    }
    None
}
