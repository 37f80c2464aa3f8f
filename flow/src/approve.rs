//! `flow approve <gate>`: human sign-off that flips an approval gate.

use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::plan::{parse_refactor_plan, parse_test_plan};
use crate::core::types::ApprovalGate;
use crate::guardrail::enforce_guardrail;
use crate::io::atomic::write_json_atomic;
use crate::io::console::{Console, LineReader};
use crate::io::git::Committer;
use crate::io::paths::FlowPaths;
use crate::io::state_store::StateStore;
use crate::state::{Phase, PhaseStep, StepStatus, WorkflowState};

/// Collaborators for an approval.
pub struct Approver<'a> {
    pub paths: FlowPaths,
    pub store: &'a dyn StateStore,
    pub committer: &'a dyn Committer,
    pub reader: &'a dyn LineReader,
    pub console: &'a dyn Console,
}

impl Approver<'_> {
    #[instrument(skip_all, fields(%gate, force))]
    pub fn approve(&self, gate: ApprovalGate, force: bool) -> Result<()> {
        let mut state = self.store.read()?;
        match gate {
            ApprovalGate::Requirement => self.requirement(&mut state)?,
            ApprovalGate::ProjectContext => self.project_context(&mut state)?,
            ApprovalGate::TestPlan => self.test_plan(&mut state)?,
            ApprovalGate::Prototype => {
                if !self.prototype(&mut state, force)? {
                    return Ok(());
                }
            }
            ApprovalGate::RefactorPlan => self.refactor_plan(&mut state)?,
        }
        state.touch(&format!("flow:approve-{gate}"));
        self.store.write(&state)?;
        info!(%gate, "approved");
        Ok(())
    }

    fn requirement(&self, state: &mut WorkflowState) -> Result<()> {
        let step = &mut state.phases.define.requirement_definition;
        self.check_gate(
            step,
            StepStatus::InProgress,
            "requirement",
            "define.requirement_definition.file",
        )?;
        step.status = StepStatus::Approved;
        self.console.out("Requirement approved.");
        Ok(())
    }

    fn project_context(&self, state: &mut WorkflowState) -> Result<()> {
        let step = &mut state.phases.prototype.project_context;
        self.check_gate(
            step,
            StepStatus::PendingApproval,
            "project context",
            "project_context.file",
        )?;
        step.status = StepStatus::Created;
        self.console.out("Project context approved.");
        Ok(())
    }

    fn test_plan(&self, state: &mut WorkflowState) -> Result<()> {
        let plan_path = self.check_gate(
            &state.phases.prototype.test_plan,
            StepStatus::PendingApproval,
            "test plan",
            "prototype.test_plan.file",
        )?;
        let markdown = fs::read_to_string(&plan_path)
            .with_context(|| format!("read {}", plan_path.display()))?;
        let tp_name = state.artifact_name("TP.json");
        let tp_path = self.paths.flow_dir.join(&tp_name);
        write_json_atomic(&tp_path, &parse_test_plan(&markdown))
            .with_context(|| format!("write {}", tp_path.display()))?;

        let prototype = &mut state.phases.prototype;
        prototype.test_plan.status = StepStatus::Created;
        prototype.tp_generation.set(StepStatus::Created, tp_name);
        self.console.out("Test plan approved.");
        self.console.out(&format!(
            "Test-plan JSON written to {}",
            self.paths.relative(&tp_path)
        ));
        Ok(())
    }

    /// Returns false when there was nothing to commit and the state is unchanged.
    fn prototype(&self, state: &mut WorkflowState, force: bool) -> Result<bool> {
        let message = format!(
            "Cannot approve prototype: current_phase must be 'prototype'. Current: '{}'.",
            state.current_phase.as_str()
        );
        enforce_guardrail(
            state,
            state.current_phase != Phase::Prototype,
            &message,
            force,
            self.reader,
            self.console,
        )?;
        let prototype = &state.phases.prototype;
        if prototype.prototype_approved {
            return Err(anyhow!(
                "Cannot approve prototype: phases.prototype.prototype_approved is already true."
            ));
        }
        if prototype.test_execution.status != StepStatus::Completed {
            return Err(anyhow!(
                "Cannot approve prototype from test_execution status '{}'. Expected completed.",
                prototype.test_execution.status.as_str()
            ));
        }

        let commit_message = format!("feat: approve prototype it_{}", state.current_iteration);
        let committed = self
            .committer
            .commit_all(&commit_message)
            .context("Failed to create prototype approval commit")?;
        if !committed {
            self.console
                .out("No pending changes to commit; working tree is clean.");
            return Ok(false);
        }

        state.phases.prototype.prototype_approved = true;
        self.console.out(&format!(
            "Committed prototype changes with message: {commit_message}"
        ));
        Ok(true)
    }

    fn refactor_plan(&self, state: &mut WorkflowState) -> Result<()> {
        let plan_path = self.check_gate(
            &state.phases.refactor.refactor_plan,
            StepStatus::PendingApproval,
            "refactor plan",
            "refactor.refactor_plan.file",
        )?;
        let markdown = fs::read_to_string(&plan_path)
            .with_context(|| format!("read {}", plan_path.display()))?;
        let prd_path = self
            .paths
            .flow_dir
            .join(state.artifact_name("refactor-prd.json"));
        write_json_atomic(&prd_path, &parse_refactor_plan(&markdown))
            .with_context(|| format!("write {}", prd_path.display()))?;

        state.phases.refactor.refactor_plan.status = StepStatus::Approved;
        self.console.out("Refactor plan approved.");
        self.console.out(&format!(
            "Refactor items written to {}",
            self.paths.relative(&prd_path)
        ));
        Ok(())
    }

    /// Check status and that the recorded artifact exists; returns its path.
    fn check_gate(
        &self,
        step: &PhaseStep,
        expected: StepStatus,
        what: &str,
        file_field: &str,
    ) -> Result<std::path::PathBuf> {
        if step.status != expected {
            return Err(anyhow!(
                "Cannot approve {what} from status '{}'. Expected {}.",
                step.status.as_str(),
                expected.as_str()
            ));
        }
        let file = step
            .file
            .as_deref()
            .ok_or_else(|| anyhow!("Cannot approve {what}: {file_field} is missing."))?;
        let path = self.paths.artifact_path(file);
        if !path.exists() {
            return Err(anyhow!(
                "Cannot approve {what}: file not found at {}",
                path.display()
            ));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        BufferConsole, MemoryStateStore, RecordingCommitter, ScriptedLineReader, TempProject,
        prototype_state, with_state,
    };

    struct Harness {
        project: TempProject,
        store: MemoryStateStore,
        committer: RecordingCommitter,
        reader: ScriptedLineReader,
        console: BufferConsole,
    }

    impl Harness {
        fn new(state: WorkflowState) -> Self {
            Self {
                project: TempProject::new().expect("project"),
                store: MemoryStateStore::new(state),
                committer: RecordingCommitter::default(),
                reader: ScriptedLineReader::new(Vec::<&str>::new()),
                console: BufferConsole::default(),
            }
        }

        fn approve(&self, gate: ApprovalGate, force: bool) -> Result<()> {
            Approver {
                paths: self.project.paths(),
                store: &self.store,
                committer: &self.committer,
                reader: &self.reader,
                console: &self.console,
            }
            .approve(gate, force)
        }
    }

    #[test]
    fn requirement_requires_document_on_disk() {
        let state = with_state(&prototype_state(), |s| {
            s.phases.define.requirement_definition.set(
                StepStatus::InProgress,
                "it_000019_product-requirement-document.md",
            );
        });
        let harness = Harness::new(state);
        let err = harness
            .approve(ApprovalGate::Requirement, false)
            .expect_err("missing file");
        assert!(err.to_string().starts_with("Cannot approve requirement: file not found at"));

        harness
            .project
            .write_flow_file("it_000019_product-requirement-document.md", "# PRD")
            .expect("write");
        harness
            .approve(ApprovalGate::Requirement, false)
            .expect("approve");
        let state = harness.store.state();
        assert_eq!(
            state.phases.define.requirement_definition.status,
            StepStatus::Approved
        );
        assert_eq!(state.updated_by.as_deref(), Some("flow:approve-requirement"));
        assert_eq!(harness.console.out_lines(), vec!["Requirement approved."]);
    }

    #[test]
    fn wrong_status_is_rejected() {
        let harness = Harness::new(prototype_state());
        let err = harness
            .approve(ApprovalGate::ProjectContext, false)
            .expect_err("already created");
        assert_eq!(
            err.to_string(),
            "Cannot approve project context from status 'created'. Expected pending_approval."
        );
        assert!(harness.store.writes().is_empty());
    }

    #[test]
    fn test_plan_writes_tp_json() {
        let state = with_state(&prototype_state(), |s| {
            s.phases.prototype.prototype_build.status = StepStatus::Created;
            s.phases
                .prototype
                .test_plan
                .set(StepStatus::PendingApproval, "it_000019_test-plan.md");
        });
        let harness = Harness::new(state);
        harness
            .project
            .write_flow_file(
                "it_000019_test-plan.md",
                "# Plan\n## Smoke\n- [ ] app starts\n- renders home\n## Edge\n1. empty input\n",
            )
            .expect("write plan");

        harness.approve(ApprovalGate::TestPlan, false).expect("approve");

        let prototype = harness.store.state().phases.prototype;
        assert_eq!(prototype.test_plan.status, StepStatus::Created);
        assert_eq!(prototype.tp_generation.status, StepStatus::Created);
        assert_eq!(prototype.tp_generation.file.as_deref(), Some("it_000019_TP.json"));

        let tp: serde_json::Value = serde_json::from_str(
            &harness
                .project
                .read_flow_file("it_000019_TP.json")
                .expect("read tp"),
        )
        .expect("json");
        assert_eq!(tp["cases"].as_array().expect("cases").len(), 3);
        assert_eq!(tp["cases"][2]["section"], "Edge");
        assert_eq!(
            harness.console.out_lines()[1],
            "Test-plan JSON written to .agents/flow/it_000019_TP.json"
        );
    }

    #[test]
    fn prototype_commits_and_marks_approved() {
        let state = with_state(&prototype_state(), |s| {
            s.phases.prototype.test_execution.status = StepStatus::Completed;
        });
        let harness = Harness::new(state);
        harness.approve(ApprovalGate::Prototype, false).expect("approve");

        assert!(harness.store.state().phases.prototype.prototype_approved);
        assert_eq!(
            harness.committer.messages(),
            vec!["feat: approve prototype it_000019"]
        );
    }

    #[test]
    fn prototype_outside_phase_is_guarded() {
        let state = with_state(&prototype_state(), |s| {
            s.current_phase = Phase::Refactor;
            s.phases.prototype.test_execution.status = StepStatus::Completed;
        });
        let harness = Harness::new(state);
        let err = harness
            .approve(ApprovalGate::Prototype, false)
            .expect_err("strict");
        assert_eq!(
            err.to_string(),
            "Cannot approve prototype: current_phase must be 'prototype'. Current: 'refactor'."
        );
        assert!(harness.committer.messages().is_empty());

        harness.approve(ApprovalGate::Prototype, true).expect("forced");
        assert_eq!(
            harness.console.err_lines(),
            vec![
                "Warning: Cannot approve prototype: current_phase must be 'prototype'. Current: 'refactor'."
            ]
        );
    }

    #[test]
    fn clean_tree_leaves_prototype_unapproved() {
        let state = with_state(&prototype_state(), |s| {
            s.phases.prototype.test_execution.status = StepStatus::Completed;
        });
        let mut harness = Harness::new(state);
        harness.committer = RecordingCommitter::with_results(vec![Ok(false)]);
        harness.approve(ApprovalGate::Prototype, false).expect("no-op");
        assert!(!harness.store.state().phases.prototype.prototype_approved);
        assert!(harness.store.writes().is_empty());
    }

    #[test]
    fn refactor_plan_writes_refactor_items() {
        let state = with_state(&prototype_state(), |s| {
            s.current_phase = Phase::Refactor;
            s.phases.prototype.prototype_approved = true;
            s.phases
                .refactor
                .refactor_plan
                .set(StepStatus::PendingApproval, "it_000019_refactor-plan.md");
        });
        let harness = Harness::new(state);
        harness
            .project
            .write_flow_file(
                "it_000019_refactor-plan.md",
                "# Refactor\n- extract parser\n- rename config\n",
            )
            .expect("write plan");

        harness
            .approve(ApprovalGate::RefactorPlan, false)
            .expect("approve");

        assert_eq!(
            harness.store.state().phases.refactor.refactor_plan.status,
            StepStatus::Approved
        );
        let prd: serde_json::Value = serde_json::from_str(
            &harness
                .project
                .read_flow_file("it_000019_refactor-prd.json")
                .expect("read prd"),
        )
        .expect("json");
        assert_eq!(prd["items"][1]["id"], "RF-002");
        assert_eq!(prd["items"][1]["description"], "rename config");
    }
}
