//! Agent-backed step handlers dispatched by the flow driver.
//!
//! Every handler follows the same shape: re-read state, check the phase via
//! the guardrail, check its own status precondition, render a skill prompt,
//! invoke the agent, persist the transition. Handlers are safe to re-run:
//! long-running steps mark themselves `in_progress` first, which the decision
//! engine treats as runnable. Test and refactor execution go one plan item at
//! a time through [`crate::execution`] and resume from their progress files.

use std::fs;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

use crate::core::plan::{RefactorPlanJson, TestPlanJson};
use crate::core::types::StepId;
use crate::execution::ItemRun;
use crate::flow::{StepContext, StepHandlers};
use crate::guardrail::enforce_guardrail;
use crate::io::agent::{AgentExecutor, AgentRequest, AgentResult};
use crate::io::console::{Console, LineReader};
use crate::io::paths::FlowPaths;
use crate::io::skills::{ContextEntry, build_prompt, load_skill};
use crate::io::state_store::StateStore;
use crate::state::{Phase, StepStatus, WorkflowState};

pub const PROJECT_CONTEXT_FILE: &str = ".agents/PROJECT_CONTEXT.md";

/// Production step table.
pub struct AgentSteps<'a> {
    pub paths: FlowPaths,
    pub store: &'a dyn StateStore,
    pub agent: &'a dyn AgentExecutor,
    pub reader: &'a dyn LineReader,
    pub console: &'a dyn Console,
}

impl StepHandlers for AgentSteps<'_> {
    fn run_step(&self, step: StepId, ctx: &StepContext) -> Result<()> {
        match step {
            StepId::DefineRequirement => self.define_requirement(ctx),
            StepId::CreatePrd => self.create_prd(ctx),
            StepId::CreateProjectContext => self.create_project_context(ctx),
            StepId::CreatePrototype => self.create_prototype(ctx),
            StepId::CreateTestPlan => self.create_test_plan(ctx),
            StepId::ExecuteTestPlan => self.execute_test_plan(ctx),
            StepId::DefineRefactorPlan => self.define_refactor_plan(ctx),
            StepId::ExecuteRefactor => self.execute_refactor(ctx),
        }
    }
}

impl AgentSteps<'_> {
    #[instrument(skip_all)]
    fn define_requirement(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Define], "Cannot define requirement", ctx)?;
        let requirement = &state.phases.define.requirement_definition;
        expect_status(requirement.status, StepStatus::Pending, "define requirement")?;

        let entries = vec![ContextEntry::new(
            "current_iteration",
            &state.current_iteration,
        )];
        self.invoke_checked(ctx, "create-pr-document", &entries)?;

        let file = state.artifact_name("product-requirement-document.md");
        state
            .phases
            .define
            .requirement_definition
            .set(StepStatus::InProgress, file);
        self.save(&mut state, StepId::DefineRequirement)?;
        self.console
            .out("Requirement definition started and marked as in progress.");
        Ok(())
    }

    #[instrument(skip_all)]
    fn create_prd(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Define], "Cannot create PRD", ctx)?;
        let define = &state.phases.define;
        if define.requirement_definition.status != StepStatus::Approved {
            return Err(anyhow!(
                "Cannot create PRD: define.requirement_definition must be approved first. Run `flow approve requirement`."
            ));
        }
        if !define.prd_generation.status.is_runnable() {
            return Err(anyhow!(
                "Cannot create PRD from status '{}'. Expected pending or in_progress.",
                define.prd_generation.status.as_str()
            ));
        }

        let mut entries = vec![ContextEntry::new(
            "current_iteration",
            &state.current_iteration,
        )];
        self.push_artifact(
            &mut entries,
            "requirement_document",
            define.requirement_definition.file.as_deref(),
        )?;
        self.invoke_checked(ctx, "create-prd", &entries)?;

        let file = state.artifact_name("PRD.json");
        state
            .phases
            .define
            .prd_generation
            .set(StepStatus::Completed, file);
        self.save(&mut state, StepId::CreatePrd)?;
        self.console.out("PRD generated and marked as completed.");
        Ok(())
    }

    #[instrument(skip_all)]
    fn create_project_context(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(
            &state,
            &[Phase::Define, Phase::Prototype],
            "Cannot create project context",
            ctx,
        )?;
        let prd = &state.phases.define.prd_generation;
        if prd.status != StepStatus::Completed {
            return Err(anyhow!(
                "Cannot create project context: define.prd_generation must be completed first."
            ));
        }
        let prd_file = prd
            .file
            .clone()
            .ok_or_else(|| {
                anyhow!("Cannot create project context: define.prd_generation.file is missing.")
            })?;
        match state.phases.prototype.project_context.status {
            StepStatus::Pending => {}
            StepStatus::PendingApproval => {
                return Err(anyhow!(
                    "Cannot create project context: project context is pending approval. Run `flow approve project-context` first."
                ));
            }
            StepStatus::Created => {
                return Err(anyhow!(
                    "Cannot create project context: project context already exists."
                ));
            }
            other => {
                return Err(anyhow!(
                    "Cannot create project context from status '{}'. Expected pending.",
                    other.as_str()
                ));
            }
        }

        if state.current_phase == Phase::Define {
            state.current_phase = Phase::Prototype;
        }

        let mut entries = vec![ContextEntry::new("prd_file", &prd_file)];
        self.push_artifact(&mut entries, "prd_content", Some(&prd_file))?;
        let existing = self.paths.artifact_path(PROJECT_CONTEXT_FILE);
        if existing.exists() {
            let content = fs::read_to_string(&existing)
                .with_context(|| format!("read {}", existing.display()))?;
            entries.push(ContextEntry::new("existing_project_context", content));
        }
        self.invoke_checked(ctx, "create-project-context", &entries)?;

        state
            .phases
            .prototype
            .project_context
            .set(StepStatus::PendingApproval, PROJECT_CONTEXT_FILE);
        self.save(&mut state, StepId::CreateProjectContext)?;
        self.console
            .out("Project context generated and marked as pending approval.");
        Ok(())
    }

    #[instrument(skip_all)]
    fn create_prototype(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Prototype], "Cannot create prototype", ctx)?;
        let prototype = &state.phases.prototype;
        if prototype.project_context.status != StepStatus::Created {
            return Err(anyhow!(
                "Cannot create prototype: prototype.project_context.status must be created. Run `flow approve project-context` first."
            ));
        }
        if !prototype.prototype_build.status.is_runnable() {
            return Err(anyhow!(
                "Cannot create prototype from status '{}'. Expected pending or in_progress.",
                prototype.prototype_build.status.as_str()
            ));
        }

        let file = state.artifact_name("prototype.md");
        state
            .phases
            .prototype
            .prototype_build
            .set(StepStatus::InProgress, file.clone());
        self.save(&mut state, StepId::CreatePrototype)?;

        let mut entries = vec![ContextEntry::new(
            "current_iteration",
            &state.current_iteration,
        )];
        self.push_artifact(&mut entries, "project_context", Some(PROJECT_CONTEXT_FILE))?;
        self.invoke_checked(ctx, "create-prototype", &entries)?;

        state
            .phases
            .prototype
            .prototype_build
            .set(StepStatus::Created, file);
        self.save(&mut state, StepId::CreatePrototype)?;
        self.console.out("Prototype built and marked as created.");
        Ok(())
    }

    #[instrument(skip_all)]
    fn create_test_plan(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Prototype], "Cannot create test plan", ctx)?;
        let prototype = &state.phases.prototype;
        if prototype.prototype_build.status != StepStatus::Created {
            return Err(anyhow!(
                "Cannot create test plan: prototype.prototype_build.status must be created."
            ));
        }
        expect_status(prototype.test_plan.status, StepStatus::Pending, "create test plan")?;

        let mut entries = vec![ContextEntry::new(
            "current_iteration",
            &state.current_iteration,
        )];
        self.push_artifact(&mut entries, "project_context", Some(PROJECT_CONTEXT_FILE))?;
        self.invoke_checked(ctx, "create-test-plan", &entries)?;

        let file = state.artifact_name("test-plan.md");
        state
            .phases
            .prototype
            .test_plan
            .set(StepStatus::PendingApproval, file);
        self.save(&mut state, StepId::CreateTestPlan)?;
        self.console
            .out("Test plan generated and marked as pending approval.");
        Ok(())
    }

    #[instrument(skip_all)]
    fn execute_test_plan(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Prototype], "Cannot execute test plan", ctx)?;
        let prototype = &state.phases.prototype;
        if prototype.tp_generation.status != StepStatus::Created {
            return Err(anyhow!(
                "Cannot execute test plan: prototype.tp_generation.status must be created. Run `flow approve test-plan` first."
            ));
        }
        let tp_file = prototype.tp_generation.file.clone().ok_or_else(|| {
            anyhow!("Cannot execute test plan: prototype.tp_generation.file is missing.")
        })?;
        let execution = prototype.test_execution.status;
        if !(execution.is_runnable() || execution == StepStatus::Failed) {
            return Err(anyhow!(
                "Cannot execute test plan from status '{}'. Expected pending, in_progress or failed.",
                execution.as_str()
            ));
        }
        let plan: TestPlanJson = self.read_plan(&tp_file, "Test plan JSON")?;
        let context_path = self.paths.artifact_path(PROJECT_CONTEXT_FILE);
        if !context_path.exists() {
            return Err(anyhow!("Project context missing: expected {PROJECT_CONTEXT_FILE}."));
        }
        let project_context = fs::read_to_string(&context_path)
            .with_context(|| format!("read {}", context_path.display()))?;
        let skill_body = load_skill(&self.paths, "execute-test-case")?;

        let progress = state.artifact_name("test-execution-progress.json");
        state
            .phases
            .prototype
            .test_execution
            .set(StepStatus::InProgress, progress.clone());
        self.save(&mut state, StepId::ExecuteTestPlan)?;

        info!(cases = plan.cases.len(), provider = %ctx.provider, "executing test plan");
        let summary = self
            .item_run(ctx, &state, &skill_body)
            .test_cases(&plan, &tp_file, &project_context)?;
        let status = if summary.failed.is_empty() {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        state.phases.prototype.test_execution.set(status, progress);
        self.save(&mut state, StepId::ExecuteTestPlan)?;
        self.console.out(&summary.line());
        if !summary.failed.is_empty() {
            return Err(anyhow!(
                "Test execution failed for {} case(s): {}.",
                summary.failed.len(),
                summary.failed.join(", ")
            ));
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn define_refactor_plan(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(
            &state,
            &[Phase::Prototype, Phase::Refactor],
            "Cannot define refactor plan",
            ctx,
        )?;
        if !state.phases.prototype.prototype_approved {
            return Err(anyhow!(
                "Cannot define refactor plan: prototype must be approved first. Run `flow approve prototype`."
            ));
        }
        expect_status(
            state.phases.refactor.refactor_plan.status,
            StepStatus::Pending,
            "define refactor plan",
        )?;

        if state.current_phase == Phase::Prototype {
            state.current_phase = Phase::Refactor;
        }

        let mut entries = vec![ContextEntry::new(
            "current_iteration",
            &state.current_iteration,
        )];
        let execution_report = state.artifact_name("test-execution-report.md");
        self.push_artifact(&mut entries, "test_execution_report", Some(&execution_report))?;
        self.invoke_checked(ctx, "plan-refactor", &entries)?;

        let report = state.artifact_name("evaluation-report.md");
        let plan = state.artifact_name("refactor-plan.md");
        let refactor = &mut state.phases.refactor;
        refactor.evaluation_report.set(StepStatus::Created, report);
        refactor.refactor_plan.set(StepStatus::PendingApproval, plan);
        self.save(&mut state, StepId::DefineRefactorPlan)?;
        self.console.out(
            "Refactor plan defined: evaluation report created and refactor plan marked as pending approval.",
        );
        Ok(())
    }

    #[instrument(skip_all)]
    fn execute_refactor(&self, ctx: &StepContext) -> Result<()> {
        let mut state = self.store.read()?;
        self.require_phase(&state, &[Phase::Refactor], "Cannot execute refactor", ctx)?;
        let refactor = &state.phases.refactor;
        if refactor.refactor_plan.status != StepStatus::Approved {
            return Err(anyhow!(
                "Cannot execute refactor: refactor.refactor_plan.status must be approved. Run `flow approve refactor-plan` first."
            ));
        }
        if !refactor.refactor_execution.status.is_runnable() {
            return Err(anyhow!(
                "Cannot execute refactor from status '{}'. Expected pending or in_progress.",
                refactor.refactor_execution.status.as_str()
            ));
        }
        let prd_file = state.artifact_name("refactor-prd.json");
        if !self.paths.artifact_path(&prd_file).exists() {
            return Err(anyhow!(
                "Refactor PRD file missing: expected {}. Run `flow approve refactor-plan` first.",
                self.paths.relative(&self.paths.artifact_path(&prd_file))
            ));
        }
        let plan: RefactorPlanJson = self.read_plan(&prd_file, "Refactor PRD")?;
        let skill_body = load_skill(&self.paths, "execute-refactor-item")?;

        let progress = state.artifact_name("refactor-execution-progress.json");
        state
            .phases
            .refactor
            .refactor_execution
            .set(StepStatus::InProgress, progress.clone());
        self.save(&mut state, StepId::ExecuteRefactor)?;

        info!(items = plan.items.len(), provider = %ctx.provider, "executing refactor");
        let summary = self.item_run(ctx, &state, &skill_body).refactor_items(&plan)?;
        if !summary.failed.is_empty() {
            self.save(&mut state, StepId::ExecuteRefactor)?;
            return Err(anyhow!(
                "Refactor execution incomplete: {} of {} item(s) not completed: {}.",
                summary.failed.len(),
                summary.total,
                summary.failed.join(", ")
            ));
        }

        let changelog = state.artifact_name("CHANGELOG.md");
        let refactor = &mut state.phases.refactor;
        refactor.refactor_execution.set(StepStatus::Completed, progress);
        refactor.changelog.set(StepStatus::Created, changelog);
        self.save(&mut state, StepId::ExecuteRefactor)?;
        self.console
            .out("Refactor executed and changelog created.");
        Ok(())
    }

    fn require_phase(
        &self,
        state: &WorkflowState,
        allowed: &[Phase],
        action: &str,
        ctx: &StepContext,
    ) -> Result<()> {
        let violated = !allowed.contains(&state.current_phase);
        let expected = allowed
            .iter()
            .map(|phase| format!("'{}'", phase.as_str()))
            .collect::<Vec<_>>()
            .join(" or ");
        let message = format!(
            "{action}: current_phase must be {expected}. Current: '{}'.",
            state.current_phase.as_str()
        );
        enforce_guardrail(state, violated, &message, ctx.force, self.reader, self.console)?;
        Ok(())
    }

    /// Add an artifact's contents when the file exists; its name otherwise.
    fn push_artifact(
        &self,
        entries: &mut Vec<ContextEntry>,
        key: &str,
        file: Option<&str>,
    ) -> Result<()> {
        let Some(file) = file else {
            return Ok(());
        };
        let path = self.paths.artifact_path(file);
        if path.exists() {
            let content =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            entries.push(ContextEntry::new(key, content));
        } else {
            warn!(file, "artifact not found, passing its name only");
            entries.push(ContextEntry::new(key, file));
        }
        Ok(())
    }

    fn item_run<'s>(
        &'s self,
        ctx: &StepContext,
        state: &'s WorkflowState,
        skill_body: &'s str,
    ) -> ItemRun<'s> {
        ItemRun {
            paths: &self.paths,
            state,
            agent: self.agent,
            provider: ctx.provider,
            skill_body,
            console: self.console,
        }
    }

    /// Parse a frozen plan document produced on approval.
    fn read_plan<T: DeserializeOwned>(&self, file: &str, what: &str) -> Result<T> {
        let path = self.paths.artifact_path(file);
        let display = self.paths.relative(&path);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("{what} not found at {display}"))?;
        serde_json::from_str(&contents)
            .map_err(|err| anyhow!("Invalid {what} in {display}: {err}"))
    }

    fn invoke(
        &self,
        ctx: &StepContext,
        skill: &str,
        entries: &[ContextEntry],
    ) -> Result<AgentResult> {
        let body = load_skill(&self.paths, skill)?;
        let prompt = build_prompt(&body, entries)?;
        info!(skill, provider = %ctx.provider, "invoking agent");
        self.agent.invoke(&AgentRequest {
            provider: ctx.provider,
            prompt,
            workdir: self.paths.root.clone(),
        })
    }

    fn invoke_checked(
        &self,
        ctx: &StepContext,
        skill: &str,
        entries: &[ContextEntry],
    ) -> Result<AgentResult> {
        let result = self.invoke(ctx, skill, entries)?;
        if !result.success() {
            return Err(agent_failed(&result));
        }
        Ok(result)
    }

    fn save(&self, state: &mut WorkflowState, step: StepId) -> Result<()> {
        state.touch(&format!("flow:{step}"));
        self.store.write(state)
    }
}

fn expect_status(actual: StepStatus, expected: StepStatus, action: &str) -> Result<()> {
    if actual != expected {
        return Err(anyhow!(
            "Cannot {action} from status '{}'. Expected {}.",
            actual.as_str(),
            expected.as_str()
        ));
    }
    Ok(())
}

fn agent_failed(result: &AgentResult) -> anyhow::Error {
    anyhow!(
        "Agent invocation failed with exit code {}.",
        result.exit_code
    )
}
