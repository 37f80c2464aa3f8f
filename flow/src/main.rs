//! `flow`: drive an agent-assisted development iteration from the shell.
//!
//! State lives in `.agents/state.json` under the current directory. Every
//! command re-reads it, so commands can be interleaved freely with human
//! edits and approvals.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use flow::approve::Approver;
use flow::core::decision::decide;
use flow::core::types::{ApprovalGate, Decision};
use flow::create_issue::create_issues;
use flow::exit_codes;
use flow::flow::{FlowOptions, FlowStop, StepFailed, ask_provider, run_flow};
use flow::guardrail::GuardrailError;
use flow::io::agent::{AgentProvider, CliAgentExecutor};
use flow::io::config::{FlowConfig, load_config};
use flow::io::console::{Console, StdConsole, StdinLineReader};
use flow::io::git::Git;
use flow::io::paths::FlowPaths;
use flow::io::state_store::{FileStateStore, StateStore};
use flow::logging;
use flow::manual_fix::run_manual_fix;
use flow::start::start_iteration;
use flow::steps::AgentSteps;
use flow::triage::{FixOverrides, run_automated_fix};
use flow::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "flow",
    version,
    about = "Phase-driven workflow for agent-assisted iterations"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the first iteration, or archive the current one and start the next.
    Start,
    /// Run steps until completion, an approval gate, or a dead end.
    Run {
        /// Agent provider (claude, codex, gemini). Asked on stdin when absent.
        #[arg(long)]
        agent: Option<String>,
        /// Proceed past guardrail violations with a warning.
        #[arg(long)]
        force: bool,
    },
    /// Print the next action without running it.
    Next,
    /// Approve a gate: requirement, project-context, test-plan, prototype, refactor-plan.
    Approve {
        gate: String,
        #[arg(long)]
        force: bool,
    },
    /// Process open issues of the current iteration with the automated-fix agent.
    Fix {
        #[arg(long)]
        agent: Option<String>,
        /// Number of open issues to attempt in this run.
        #[arg(long)]
        iterations: Option<usize>,
        /// Extra attempts per issue after a failed fix.
        #[arg(long)]
        retry_on_fail: Option<u32>,
    },
    /// Have the agent write the current iteration's issue ledger.
    Issue {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Walk through `manual-fix` issues one guided agent session at a time.
    ManualFix {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Check config, state and the current issue ledger.
    Validate,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let console = StdConsole;
    let code = match run(cli, &console) {
        Ok(code) => code,
        Err(err) => report(&err, &console),
    };
    std::process::exit(code);
}

fn run(cli: Cli, console: &dyn Console) -> Result<i32> {
    let root = env::current_dir().context("resolve current directory")?;
    let paths = FlowPaths::new(&root);
    match cli.command {
        Command::Start => {
            start_iteration(&paths, console)?;
            Ok(exit_codes::OK)
        }
        Command::Run { agent, force } => cmd_run(&paths, agent.as_deref(), force, console),
        Command::Next => cmd_next(&paths, console),
        Command::Approve { gate, force } => {
            let gate: ApprovalGate = gate.parse()?;
            Approver {
                paths: paths.clone(),
                store: &FileStateStore::new(&paths.state_path),
                committer: &Git::new(&root),
                reader: &StdinLineReader,
                console,
            }
            .approve(gate, force)?;
            Ok(exit_codes::OK)
        }
        Command::Fix {
            agent,
            iterations,
            retry_on_fail,
        } => cmd_fix(
            &paths,
            agent.as_deref(),
            FixOverrides {
                iterations,
                retry_on_fail,
            },
            console,
        ),
        Command::Issue { agent } => {
            let (config, provider) = provider_for(&paths, agent.as_deref(), console)?;
            create_issues(&paths, provider, &executor(&config), console)?;
            Ok(exit_codes::OK)
        }
        Command::ManualFix { agent } => {
            let (config, provider) = provider_for(&paths, agent.as_deref(), console)?;
            run_manual_fix(
                &paths,
                provider,
                &executor(&config),
                &StdinLineReader,
                console,
            )?;
            Ok(exit_codes::OK)
        }
        Command::Validate => cmd_validate(&paths, console),
    }
}

fn cmd_run(
    paths: &FlowPaths,
    agent: Option<&str>,
    force: bool,
    console: &dyn Console,
) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let options = FlowOptions {
        provider: resolve_provider(agent, &config)?,
        force,
        max_steps: config.flow.max_steps,
    };
    let store = FileStateStore::new(&paths.state_path);
    let executor = executor(&config);
    let steps = AgentSteps {
        paths: paths.clone(),
        store: &store,
        agent: &executor,
        reader: &StdinLineReader,
        console,
    };
    let outcome = run_flow(&store, &steps, &options, &StdinLineReader, console)?;
    Ok(match outcome.stop {
        FlowStop::Blocked(_) => exit_codes::BLOCKED,
        FlowStop::Complete(_) | FlowStop::AwaitingApproval(_) => exit_codes::OK,
    })
}

fn cmd_next(paths: &FlowPaths, console: &dyn Console) -> Result<i32> {
    let state = FileStateStore::new(&paths.state_path).read()?;
    Ok(match decide(&state) {
        Decision::Step(step) => {
            console.out(&format!("Next step: {step} ({})", step.label()));
            exit_codes::OK
        }
        Decision::ApprovalGate { message, .. } => {
            console.out(&message);
            exit_codes::OK
        }
        Decision::Complete { message } => {
            console.out(&message);
            exit_codes::COMPLETE
        }
        Decision::Blocked { message } => {
            console.err(&message);
            exit_codes::BLOCKED
        }
    })
}

fn cmd_fix(
    paths: &FlowPaths,
    agent: Option<&str>,
    overrides: FixOverrides,
    console: &dyn Console,
) -> Result<i32> {
    let (config, provider) = provider_for(paths, agent, console)?;
    run_automated_fix(
        paths,
        &config,
        provider,
        overrides,
        &executor(&config),
        &Git::new(&paths.root),
        console,
    )?;
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &FlowPaths, console: &dyn Console) -> Result<i32> {
    let outcome = validate_project(paths)?;
    console.out(&format!(
        "OK: iteration {} (phase: {})",
        outcome.iteration,
        outcome.phase.as_str()
    ));
    if let Some(ledger) = outcome.ledger {
        for warning in &ledger.warnings {
            console.err(warning);
        }
        console.out(&format!("Issues: {} in {}", ledger.issues, ledger.path));
    }
    Ok(exit_codes::OK)
}

/// Load config and settle the provider, asking on stdin as a last resort.
fn provider_for(
    paths: &FlowPaths,
    agent: Option<&str>,
    console: &dyn Console,
) -> Result<(FlowConfig, AgentProvider)> {
    let config = load_config(&paths.config_path)?;
    let provider = match resolve_provider(agent, &config)? {
        Some(provider) => provider,
        None => ask_provider(&StdinLineReader, console)?,
    };
    Ok((config, provider))
}

/// CLI flag first, then `agent.provider` from config.
fn resolve_provider(flag: Option<&str>, config: &FlowConfig) -> Result<Option<AgentProvider>> {
    match flag {
        Some(name) => Ok(Some(name.parse()?)),
        None => config.provider(),
    }
}

fn executor(config: &FlowConfig) -> CliAgentExecutor {
    CliAgentExecutor {
        timeout: config.agent.timeout_secs.map(Duration::from_secs),
        output_limit_bytes: config.agent.output_limit_bytes,
    }
}

/// Print `err` unless it was already reported, and pick the exit code.
fn report(err: &anyhow::Error, console: &dyn Console) -> i32 {
    let guardrail = err.downcast_ref::<GuardrailError>();
    let reported = err.downcast_ref::<StepFailed>().is_some()
        || matches!(guardrail, Some(GuardrailError::Aborted));
    if !reported {
        console.err(&format!("{err:#}"));
    }
    match guardrail {
        Some(GuardrailError::Violation(_)) => exit_codes::GUARDRAIL,
        Some(GuardrailError::Aborted) => exit_codes::ABORTED,
        None => exit_codes::FAILURE,
    }
}
