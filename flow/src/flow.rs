//! Flow driver for `flow run`.
//!
//! Each pass re-reads the persisted state, asks the decision engine for the
//! next action and dispatches at most one step. Handlers persist their own
//! progress; the driver never trusts an in-memory copy across passes.

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::decision::decide;
use crate::core::types::{Decision, StepId};
use crate::guardrail::GuardrailError;
use crate::io::agent::AgentProvider;
use crate::io::console::{Console, LineReader};
use crate::io::state_store::StateStore;

/// Inputs every step handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    pub provider: AgentProvider,
    pub force: bool,
}

/// Dispatch table from step id to the step's real work.
///
/// Implementations must persist their own state change and be safe to
/// re-run after a partial failure.
pub trait StepHandlers {
    fn run_step(&self, step: StepId, ctx: &StepContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowOptions {
    pub provider: Option<AgentProvider>,
    pub force: bool,
    pub max_steps: usize,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            provider: None,
            force: false,
            max_steps: 100,
        }
    }
}

/// Reason why `run_flow` stopped without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStop {
    Complete(String),
    AwaitingApproval(String),
    /// No rule matched; the message was written to the error channel.
    Blocked(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub steps_executed: usize,
    pub stop: FlowStop,
}

/// Context attached to a handler error. Its message was already reported.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("step {step} failed")]
pub struct StepFailed {
    pub step: StepId,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("flow run exceeded {max_steps} steps without reaching a stop; a step is not persisting progress")]
pub struct MaxStepsExceeded {
    pub max_steps: usize,
}

/// Run steps until the iteration completes, waits for approval, or blocks.
///
/// Stops on the first handler error: the message goes to the error channel
/// (unless the operator aborted, which is already reported) and the error is
/// returned with [`StepFailed`] context.
#[instrument(skip_all, fields(force = options.force, max_steps = options.max_steps))]
pub fn run_flow(
    store: &dyn StateStore,
    handlers: &dyn StepHandlers,
    options: &FlowOptions,
    reader: &dyn LineReader,
    console: &dyn Console,
) -> Result<FlowOutcome> {
    let mut provider = options.provider;
    let mut steps_executed = 0usize;

    loop {
        let state = store.read()?;
        let step = match decide(&state) {
            Decision::Complete { message } => {
                console.out(&message);
                return Ok(FlowOutcome {
                    steps_executed,
                    stop: FlowStop::Complete(message),
                });
            }
            Decision::ApprovalGate { gate, message } => {
                debug!(%gate, "stopping at approval gate");
                console.out(&message);
                return Ok(FlowOutcome {
                    steps_executed,
                    stop: FlowStop::AwaitingApproval(message),
                });
            }
            Decision::Blocked { message } => {
                console.err(&message);
                return Ok(FlowOutcome {
                    steps_executed,
                    stop: FlowStop::Blocked(message),
                });
            }
            Decision::Step(step) => step,
        };

        if steps_executed >= options.max_steps {
            return Err(MaxStepsExceeded {
                max_steps: options.max_steps,
            }
            .into());
        }

        let result = ensure_provider(step, &mut provider, reader, console).and_then(|provider| {
            console.out(&format!("Running step: {} ({})", step, step.label()));
            info!(%step, %provider, "running step");
            handlers.run_step(
                step,
                &StepContext {
                    provider,
                    force: options.force,
                },
            )
        });

        if let Err(err) = result {
            if !matches!(err.downcast_ref::<GuardrailError>(), Some(GuardrailError::Aborted)) {
                console.err(&format!("{err:#}"));
            }
            return Err(err.context(StepFailed { step }));
        }
        steps_executed += 1;
    }
}

/// Provider for `step`, asking once on the line reader when none was given.
fn ensure_provider(
    step: StepId,
    provider: &mut Option<AgentProvider>,
    reader: &dyn LineReader,
    console: &dyn Console,
) -> Result<AgentProvider> {
    if let Some(known) = *provider {
        return Ok(known);
    }
    if !step.requires_agent() {
        return Err(anyhow!("step {step} has no agent provider"));
    }
    let parsed = ask_provider(reader, console)?;
    *provider = Some(parsed);
    Ok(parsed)
}

/// Prompt for a provider name and read it from the line reader.
pub fn ask_provider(reader: &dyn LineReader, console: &dyn Console) -> Result<AgentProvider> {
    console.out("Enter agent provider:");
    let line = reader
        .read_line()?
        .ok_or_else(|| anyhow!("Missing agent provider from stdin."))?;
    line.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::approval_message;
    use crate::core::types::ApprovalGate;
    use crate::state::{FIRST_ITERATION, Phase, StepStatus, WorkflowState, initial_state};
    use crate::test_support::{
        BufferConsole, MemoryStateStore, RecordingSteps, ScriptedLineReader, prototype_state,
        with_state,
    };

    fn options(provider: Option<AgentProvider>) -> FlowOptions {
        FlowOptions {
            provider,
            ..FlowOptions::default()
        }
    }

    fn complete_state() -> WorkflowState {
        with_state(&prototype_state(), |s| {
            s.current_phase = Phase::Refactor;
            s.phases.refactor.refactor_execution.status = StepStatus::Completed;
        })
    }

    #[test]
    fn complete_prints_to_stdout_and_runs_nothing() {
        let store = MemoryStateStore::new(complete_state());
        let steps = RecordingSteps::new(&store);
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let outcome = run_flow(&store, &steps, &options(None), &reader, &console).expect("run");
        assert_eq!(outcome.steps_executed, 0);
        assert_eq!(
            outcome.stop,
            FlowStop::Complete("Iteration 000019 complete. All phases finished.".to_string())
        );
        assert_eq!(
            console.out_lines(),
            vec!["Iteration 000019 complete. All phases finished."]
        );
        assert!(steps.calls().is_empty());
        assert_eq!(reader.reads(), 0);
    }

    #[test]
    fn runs_steps_until_approval_gate() {
        let store = MemoryStateStore::new(prototype_state());
        // create-prototype, then create-test-plan parks at the test-plan gate.
        let steps = RecordingSteps::new(&store)
            .on(StepId::CreatePrototype, |s| {
                s.phases.prototype.prototype_build.status = StepStatus::Created;
            })
            .on(StepId::CreateTestPlan, |s| {
                s.phases.prototype.test_plan.status = StepStatus::PendingApproval;
            });
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let outcome = run_flow(
            &store,
            &steps,
            &options(Some(AgentProvider::Codex)),
            &reader,
            &console,
        )
        .expect("run");

        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(
            outcome.stop,
            FlowStop::AwaitingApproval(approval_message(ApprovalGate::TestPlan))
        );
        assert_eq!(
            steps.calls(),
            vec![StepId::CreatePrototype, StepId::CreateTestPlan]
        );
        assert_eq!(
            console.out_lines(),
            vec![
                "Running step: create-prototype (create prototype)".to_string(),
                "Running step: create-test-plan (create test-plan)".to_string(),
                approval_message(ApprovalGate::TestPlan),
            ]
        );
    }

    #[test]
    fn asks_for_provider_once() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store)
            .on(StepId::CreatePrototype, |s| {
                s.phases.prototype.prototype_build.status = StepStatus::Created;
            })
            .on(StepId::CreateTestPlan, |s| {
                s.phases.prototype.test_plan.status = StepStatus::PendingApproval;
            });
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(["gemini"]);

        run_flow(&store, &steps, &options(None), &reader, &console).expect("run");

        assert_eq!(reader.reads(), 1);
        assert_eq!(console.out_lines()[0], "Enter agent provider:");
        assert_eq!(
            steps.providers(),
            vec![AgentProvider::Gemini, AgentProvider::Gemini]
        );
    }

    #[test]
    fn missing_provider_on_eof_fails_the_step() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store);
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let err = run_flow(&store, &steps, &options(None), &reader, &console).expect_err("eof");
        assert_eq!(
            err.downcast_ref::<StepFailed>(),
            Some(&StepFailed {
                step: StepId::CreatePrototype
            })
        );
        assert_eq!(console.err_lines(), vec!["Missing agent provider from stdin."]);
        assert!(steps.calls().is_empty());
    }

    #[test]
    fn handler_error_stops_the_loop_and_is_reported() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store).fail(
            StepId::CreatePrototype,
            "Agent invocation failed with exit code 2.",
        );
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let err = run_flow(
            &store,
            &steps,
            &options(Some(AgentProvider::Claude)),
            &reader,
            &console,
        )
        .expect_err("handler error");

        assert!(err.downcast_ref::<StepFailed>().is_some());
        assert_eq!(
            console.err_lines(),
            vec!["Agent invocation failed with exit code 2."]
        );
        assert_eq!(steps.calls(), vec![StepId::CreatePrototype]);
    }

    #[test]
    fn operator_abort_is_not_reported_twice() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store).fail_with(StepId::CreatePrototype, || {
            GuardrailError::Aborted.into()
        });
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let err = run_flow(
            &store,
            &steps,
            &options(Some(AgentProvider::Claude)),
            &reader,
            &console,
        )
        .expect_err("aborted");
        assert_eq!(
            err.downcast_ref::<GuardrailError>(),
            Some(&GuardrailError::Aborted)
        );
        assert!(console.err_lines().is_empty());
    }

    #[test]
    fn blocked_goes_to_error_channel() {
        let store = MemoryStateStore::new(with_state(&initial_state(FIRST_ITERATION), |s| {
            s.current_phase = Phase::Refactor;
            s.phases.refactor.refactor_plan.status = StepStatus::Failed;
        }));
        let steps = RecordingSteps::new(&store);
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());

        let outcome = run_flow(&store, &steps, &options(None), &reader, &console).expect("run");
        assert_eq!(
            outcome.stop,
            FlowStop::Blocked("No runnable flow step found in refactor phase.".to_string())
        );
        assert!(console.out_lines().is_empty());
        assert_eq!(
            console.err_lines(),
            vec!["No runnable flow step found in refactor phase."]
        );
    }

    #[test]
    fn step_without_progress_hits_max_steps() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store);
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());
        let options = FlowOptions {
            provider: Some(AgentProvider::Claude),
            force: false,
            max_steps: 3,
        };

        let err = run_flow(&store, &steps, &options, &reader, &console).expect_err("no progress");
        assert_eq!(
            err.downcast_ref::<MaxStepsExceeded>(),
            Some(&MaxStepsExceeded { max_steps: 3 })
        );
        assert_eq!(steps.calls().len(), 3);
    }

    #[test]
    fn force_is_forwarded_to_handlers() {
        let store = MemoryStateStore::new(prototype_state());
        let steps = RecordingSteps::new(&store).on(StepId::CreatePrototype, |s| {
            s.phases.prototype.prototype_build.status = StepStatus::Created;
            s.phases.prototype.test_plan.status = StepStatus::PendingApproval;
        });
        let console = BufferConsole::default();
        let reader = ScriptedLineReader::new(Vec::<&str>::new());
        let options = FlowOptions {
            provider: Some(AgentProvider::Claude),
            force: true,
            max_steps: 10,
        };

        run_flow(&store, &steps, &options, &reader, &console).expect("run");
        assert_eq!(steps.forced(), vec![true]);
    }
}
