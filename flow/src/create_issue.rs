//! `flow issue`: have the agent draft the current iteration's issue ledger.
//!
//! The agent answers with a JSON array of `{title, description}` objects,
//! either on stdout (optionally inside a fenced block) or by writing the
//! ledger file itself. Drafts are numbered `ISSUE-<iteration>-NNN`, opened,
//! checked against the entry schema and written as a fresh ledger.

use std::fs;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::io::agent::{AgentExecutor, AgentProvider, AgentRequest};
use crate::io::console::Console;
use crate::io::issue_store::IssueLedger;
use crate::io::paths::FlowPaths;
use crate::io::skills::{ContextEntry, build_prompt, load_skill};
use crate::io::state_store::{FileStateStore, StateStore};
use crate::issue::{Issue, IssueStatus};

pub const CREATE_ISSUE_SKILL: &str = "create-issue";

const FENCED_BLOCK: &str = r"(?s)```(?:json)?[ \t]*\r?\n(.*?)```";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct DraftIssue {
    title: String,
    description: String,
}

#[instrument(skip_all, fields(provider = %provider))]
pub fn create_issues(
    paths: &FlowPaths,
    provider: AgentProvider,
    executor: &dyn AgentExecutor,
    console: &dyn Console,
) -> Result<Vec<Issue>> {
    let state = FileStateStore::new(&paths.state_path).read()?;
    let iteration = state.current_iteration;
    let skill = load_skill(paths, CREATE_ISSUE_SKILL)?;
    let prompt = build_prompt(&skill, &[ContextEntry::new("current_iteration", &iteration)])?;

    info!(iteration = %iteration, "invoking agent for issues");
    let result = executor.invoke(&AgentRequest {
        provider,
        prompt,
        workdir: paths.root.clone(),
    })?;
    if !result.success() {
        bail!("Agent invocation failed with exit code {}.", result.exit_code);
    }

    let issues_path = paths.issues_path(&iteration);
    let raw = if !result.stdout.trim().is_empty() {
        result.stdout
    } else if issues_path.exists() {
        debug!("stdout empty, reading the file the agent wrote");
        fs::read_to_string(&issues_path)
            .with_context(|| format!("read issues {}", issues_path.display()))?
    } else {
        bail!(
            "Agent did not produce output. Expected JSON array of issues on stdout or written to file."
        );
    };

    let issues = number_drafts(&iteration, parse_drafts(&raw)?);
    IssueLedger::create(&issues_path, issues.clone())?;
    console.out(&format!(
        "Issues file created: {}",
        paths.relative(&issues_path)
    ));
    Ok(issues)
}

/// The first fenced block if there is one, else the outermost `[...]`.
fn extract_json(raw: &str) -> Result<&str> {
    let fenced = Regex::new(FENCED_BLOCK).context("compile fenced block pattern")?;
    if let Some(block) = fenced.captures(raw).and_then(|caps| caps.get(1)) {
        return Ok(block.as_str().trim());
    }
    Ok(match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    })
}

fn parse_drafts(raw: &str) -> Result<Vec<DraftIssue>> {
    let value: Value = serde_json::from_str(extract_json(raw)?)
        .map_err(|_| anyhow!("Failed to parse agent output as JSON. Raw output:\n{raw}"))?;
    serde_json::from_value(value)
        .map_err(|err| anyhow!("Agent output does not match expected format: {err}"))
}

fn number_drafts(iteration: &str, drafts: Vec<DraftIssue>) -> Vec<Issue> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| Issue {
            id: format!("ISSUE-{iteration}-{:03}", index + 1),
            title: draft.title,
            description: draft.description,
            status: IssueStatus::Open,
        })
        .collect()
}
