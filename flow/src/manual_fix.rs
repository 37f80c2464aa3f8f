//! `flow manual-fix`: guided sessions for issues the automated queue gave up on.
//!
//! Every `manual-fix` issue in the ledger gets one agent session with a
//! guidance prompt. After each session the operator decides whether the issue
//! is fixed; only a yes changes the ledger.

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use tracing::{info, instrument};

use crate::io::agent::{AgentExecutor, AgentProvider, AgentRequest};
use crate::io::console::{Console, LineReader, is_yes};
use crate::io::issue_store::{IssueLedger, Ledger};
use crate::io::paths::FlowPaths;
use crate::io::state_store::{FileStateStore, StateStore};
use crate::issue::{Issue, IssueStatus};

pub const NO_MANUAL_FIX_ISSUES: &str = "No manual-fix issues to process. Exiting without changes.";

const GUIDANCE_TEMPLATE: &str = include_str!("io/prompts/manual_fix.md");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualFixSummary {
    /// Confirmed fixed and recorded in the ledger.
    pub fixed: Vec<String>,
    /// Guided but left as `manual-fix`.
    pub remaining: Vec<String>,
}

#[instrument(skip_all, fields(provider = %provider))]
pub fn run_manual_fix(
    paths: &FlowPaths,
    provider: AgentProvider,
    executor: &dyn AgentExecutor,
    reader: &dyn LineReader,
    console: &dyn Console,
) -> Result<ManualFixSummary> {
    let state = FileStateStore::new(&paths.state_path).read()?;
    let issues_path = paths.issues_path(&state.current_iteration);
    let display = paths.relative(&issues_path);
    let mut ledger = IssueLedger::load(&issues_path, &display)?;
    for warning in ledger.warnings() {
        console.err(warning);
    }

    let pending: Vec<Issue> = ledger
        .issues()
        .iter()
        .filter(|issue| issue.status == IssueStatus::ManualFix)
        .cloned()
        .collect();
    let total = pending.len();
    console.out(&format!(
        "Found {total} issue(s) with status 'manual-fix' in {display}."
    ));
    if pending.is_empty() {
        console.out(NO_MANUAL_FIX_ISSUES);
        return Ok(ManualFixSummary::default());
    }

    console.out(&format!(
        "Proceed with manual-fix processing for {total} issue(s) using '{provider}'? [y/N]"
    ));
    if !is_yes(reader.read_line()?.as_deref()) {
        console.out("Manual-fix execution cancelled.");
        return Ok(ManualFixSummary::default());
    }
    console.out(&format!("Ready to process {total} manual-fix issue(s)."));

    let mut summary = ManualFixSummary::default();
    for (position, issue) in pending.iter().enumerate() {
        console.out(&format!(
            "Issue {}/{total}: {} - {}",
            position + 1,
            issue.id,
            issue.title
        ));
        let prompt = guidance_prompt(issue, &state.current_iteration)?;
        info!(id = %issue.id, "starting guided session");
        let result = executor
            .invoke(&AgentRequest {
                provider,
                prompt,
                workdir: paths.root.clone(),
            })
            .with_context(|| format!("guide issue {}", issue.id))?;
        if !result.success() {
            bail!(
                "Agent invocation failed while guiding issue {} with exit code {}.",
                issue.id,
                result.exit_code
            );
        }
        if !result.stdout.trim().is_empty() {
            console.out(result.stdout.trim_end());
        }

        console.out(&format!("Mark {} as fixed? [y/N]", issue.id));
        if is_yes(reader.read_line()?.as_deref()) {
            ledger.record(&issue.id, IssueStatus::Fixed)?;
            console.out(&format!("{}: fixed", issue.id));
            summary.fixed.push(issue.id.clone());
        } else {
            summary.remaining.push(issue.id.clone());
        }
    }
    Ok(summary)
}

fn guidance_prompt(issue: &Issue, iteration: &str) -> Result<String> {
    Environment::new()
        .render_str(GUIDANCE_TEMPLATE, context! { issue => issue, iteration => iteration })
        .context("render manual-fix prompt")
}
