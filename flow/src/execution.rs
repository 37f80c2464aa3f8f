//! Resumable per-item execution of approved plans.
//!
//! `execute-test-plan` and `execute-refactor` invoke the agent once per plan
//! item and rewrite a progress document after every state change:
//!
//! - `it_<i>_test-execution-progress.json`: `pending -> in_progress -> passed | failed`
//! - `it_<i>_refactor-execution-progress.json`: `pending -> completed | failed`
//!
//! A re-run loads the document and skips items that already passed or
//! completed, so an interrupted or partly failed step resumes where it stopped.
//! The progress ids must match the approved plan exactly.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::plan::{PlanItem, RefactorPlanJson, TestPlanJson};
use crate::io::agent::{AgentExecutor, AgentProvider, AgentRequest, AgentResult};
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::console::Console;
use crate::io::paths::FlowPaths;
use crate::io::skills::{ContextEntry, build_prompt};
use crate::state::{WorkflowState, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Pending => "pending",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Passed => "passed",
            CaseStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseProgress {
    pub id: String,
    pub status: CaseStatus,
    pub attempt_count: u32,
    pub last_agent_exit_code: Option<i32>,
    pub last_error_summary: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProgress {
    pub entries: Vec<CaseProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub id: String,
    pub description: String,
    pub status: ItemStatus,
    pub agent_exit_code: Option<i32>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorProgress {
    pub entries: Vec<ItemProgress>,
}

/// What the agent must print on stdout for one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub status: Verdict,
    pub evidence: String,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunSummary {
    pub total: usize,
    pub passed: usize,
    /// Ids still failing after this run, in plan order.
    pub failed: Vec<String>,
    /// Markdown report, relative to the project root.
    pub report: String,
}

impl TestRunSummary {
    pub fn line(&self) -> String {
        format!(
            "{}/{} tests passed, {} failed. Report: {}",
            self.passed,
            self.total,
            self.total - self.passed,
            self.report
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactorRunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<String>,
}

/// Collaborators for one per-item run.
pub struct ItemRun<'a> {
    pub paths: &'a FlowPaths,
    pub state: &'a WorkflowState,
    pub agent: &'a dyn AgentExecutor,
    pub provider: AgentProvider,
    pub skill_body: &'a str,
    pub console: &'a dyn Console,
}

impl ItemRun<'_> {
    /// Run every test case that has not passed yet and write both reports.
    #[instrument(skip_all, fields(iteration = %self.state.current_iteration))]
    pub fn test_cases(
        &self,
        plan: &TestPlanJson,
        plan_file: &str,
        project_context: &str,
    ) -> Result<TestRunSummary> {
        let progress_path = self
            .paths
            .flow_dir
            .join(self.state.artifact_name("test-execution-progress.json"));
        let mut progress = match load_progress::<TestProgress>(&progress_path, self.paths)? {
            Some(progress) => {
                check_ids(
                    "Test execution",
                    &plan.cases,
                    progress.entries.iter().map(|entry| entry.id.as_str()),
                )?;
                progress
            }
            None => TestProgress::pending(&plan.cases),
        };
        let artifacts_dir = self
            .paths
            .flow_dir
            .join(self.state.artifact_name("test-execution-artifacts"));
        fs::create_dir_all(&artifacts_dir)
            .with_context(|| format!("create {}", artifacts_dir.display()))?;
        write_json_atomic(&progress_path, &progress)?;

        let mut executed = Vec::new();
        for (position, case) in plan.cases.iter().enumerate() {
            if progress.entries[position].status == CaseStatus::Passed {
                debug!(id = %case.id, "already passed, skipping");
                continue;
            }
            let entry = &mut progress.entries[position];
            entry.status = CaseStatus::InProgress;
            entry.updated_at = now_rfc3339();
            write_json_atomic(&progress_path, &progress)?;

            let prompt = build_prompt(
                self.skill_body,
                &[
                    ContextEntry::new("project_context", project_context),
                    ContextEntry::new(
                        "test_case",
                        serde_json::to_string_pretty(case).context("serialize test case")?,
                    ),
                ],
            )?;
            let attempt = CaseAttempt::judge(self.invoke(prompt.clone()));
            executed.push(case.id.clone());

            let entry = &mut progress.entries[position];
            entry.attempt_count += 1;
            entry.last_agent_exit_code = attempt.exit_code;
            entry.last_error_summary = attempt.summary();
            entry.status = if attempt.passed() {
                CaseStatus::Passed
            } else {
                CaseStatus::Failed
            };
            entry.updated_at = now_rfc3339();
            let attempt_number = entry.attempt_count;
            info!(
                id = %case.id,
                status = entry.status.as_str(),
                attempt_number,
                "test case executed"
            );
            write_json_atomic(&progress_path, &progress)?;

            let artifact = artifacts_dir.join(artifact_name(&case.id, attempt_number));
            write_json_atomic(&artifact, &attempt.artifact(&case.id, attempt_number, &prompt))?;
        }

        let results = plan
            .cases
            .iter()
            .zip(&progress.entries)
            .map(|(case, entry)| CaseReport::new(case, entry, self.paths, &artifacts_dir))
            .collect::<Vec<_>>();
        let report = TestExecutionReport {
            iteration: &self.state.current_iteration,
            test_plan_file: plan_file,
            executed_test_ids: executed,
            results,
        };
        let results_path = self
            .paths
            .flow_dir
            .join(self.state.artifact_name("test-execution-results.json"));
        write_json_atomic(&results_path, &report)?;
        let markdown_path = self
            .paths
            .flow_dir
            .join(self.state.artifact_name("test-execution-report.md"));
        write_atomic(&markdown_path, &report.markdown())?;

        let failed = progress
            .entries
            .iter()
            .filter(|entry| entry.status != CaseStatus::Passed)
            .map(|entry| entry.id.clone())
            .collect::<Vec<_>>();
        Ok(TestRunSummary {
            total: plan.cases.len(),
            passed: plan.cases.len() - failed.len(),
            failed,
            report: self.paths.relative(&markdown_path),
        })
    }

    /// Run every refactor item that has not completed yet.
    #[instrument(skip_all, fields(iteration = %self.state.current_iteration))]
    pub fn refactor_items(&self, plan: &RefactorPlanJson) -> Result<RefactorRunSummary> {
        let progress_path = self
            .paths
            .flow_dir
            .join(self.state.artifact_name("refactor-execution-progress.json"));
        let mut progress = match load_progress::<RefactorProgress>(&progress_path, self.paths)? {
            Some(progress) => {
                check_ids(
                    "Refactor execution",
                    &plan.items,
                    progress.entries.iter().map(|entry| entry.id.as_str()),
                )?;
                progress
            }
            None => RefactorProgress::pending(&plan.items),
        };
        write_json_atomic(&progress_path, &progress)?;

        for (position, item) in plan.items.iter().enumerate() {
            if progress.entries[position].status == ItemStatus::Completed {
                debug!(id = %item.id, "already completed, skipping");
                continue;
            }
            let prompt = build_prompt(
                self.skill_body,
                &[
                    ContextEntry::new("iteration", &self.state.current_iteration),
                    ContextEntry::new(
                        "refactor_item",
                        serde_json::to_string_pretty(item).context("serialize refactor item")?,
                    ),
                ],
            )?;
            let (status, exit_code) = match self.invoke(prompt) {
                Ok(result) if result.success() => (ItemStatus::Completed, Some(result.exit_code)),
                Ok(result) => (ItemStatus::Failed, Some(result.exit_code)),
                Err(err) => {
                    warn!(id = %item.id, err = %format!("{err:#}"), "agent invocation failed");
                    (ItemStatus::Failed, None)
                }
            };

            let entry = &mut progress.entries[position];
            entry.status = status;
            entry.agent_exit_code = exit_code;
            entry.updated_at = now_rfc3339();
            write_json_atomic(&progress_path, &progress)?;
            self.console.out(&format!(
                "iteration=it_{} item={} outcome={}",
                self.state.current_iteration,
                item.id,
                status.as_str()
            ));
        }

        let failed = progress
            .entries
            .iter()
            .filter(|entry| entry.status != ItemStatus::Completed)
            .map(|entry| entry.id.clone())
            .collect::<Vec<_>>();
        if failed.is_empty() {
            self.console
                .out("Refactor execution completed for all items.");
        } else {
            self.console
                .out("Refactor execution paused with remaining pending or failed items.");
        }
        Ok(RefactorRunSummary {
            total: plan.items.len(),
            completed: plan.items.len() - failed.len(),
            failed,
        })
    }

    fn invoke(&self, prompt: String) -> Result<AgentResult> {
        self.agent.invoke(&AgentRequest {
            provider: self.provider,
            prompt,
            workdir: self.paths.root.clone(),
        })
    }
}

impl TestProgress {
    fn pending(cases: &[PlanItem]) -> Self {
        let now = now_rfc3339();
        Self {
            entries: cases
                .iter()
                .map(|case| CaseProgress {
                    id: case.id.clone(),
                    status: CaseStatus::Pending,
                    attempt_count: 0,
                    last_agent_exit_code: None,
                    last_error_summary: String::new(),
                    updated_at: now.clone(),
                })
                .collect(),
        }
    }
}

impl RefactorProgress {
    fn pending(items: &[PlanItem]) -> Self {
        let now = now_rfc3339();
        Self {
            entries: items
                .iter()
                .map(|item| ItemProgress {
                    id: item.id.clone(),
                    description: item.description.clone(),
                    status: ItemStatus::Pending,
                    agent_exit_code: None,
                    updated_at: now.clone(),
                })
                .collect(),
        }
    }
}

/// `None` when the document does not exist yet.
fn load_progress<T: DeserializeOwned>(path: &Path, paths: &FlowPaths) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let display = paths.relative(path);
    let contents =
        fs::read_to_string(path).with_context(|| format!("read progress {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|err| anyhow!("Invalid progress JSON in {display}: {err}"))?;
    let progress = serde_json::from_value(value)
        .map_err(|err| anyhow!("Progress schema mismatch in {display}: {err}"))?;
    Ok(Some(progress))
}

/// Progress entries must follow the plan one-to-one, in plan order.
fn check_ids<'a>(
    what: &str,
    plan: &[PlanItem],
    entries: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let entries = entries.collect::<Vec<_>>();
    let in_order = plan.len() == entries.len()
        && plan.iter().zip(&entries).all(|(item, id)| item.id == *id);
    if in_order {
        return Ok(());
    }
    let expected = plan.iter().map(|item| item.id.as_str()).collect::<BTreeSet<_>>();
    let found = entries.iter().copied().collect::<BTreeSet<_>>();
    if expected == found {
        return Err(anyhow!(
            "{what} progress file out of order: entries must follow the approved plan."
        ));
    }
    Err(anyhow!(
        "{what} progress file out of sync: entry ids do not match the approved plan ids."
    ))
}

/// `TC-001` attempt 2 becomes `TC-001_attempt_002.json`.
fn artifact_name(id: &str, attempt: u32) -> String {
    let safe = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("{safe}_attempt_{attempt:03}.json")
}

/// One agent invocation for a test case, judged.
#[derive(Debug)]
struct CaseAttempt {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    payload: Option<ExecutionPayload>,
    /// Why the attempt could not be judged from a payload.
    error: Option<String>,
}

impl CaseAttempt {
    fn judge(result: Result<AgentResult>) -> Self {
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                return Self {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    payload: None,
                    error: Some(format!("{err:#}")),
                };
            }
        };
        let (payload, error) = if result.success() {
            match parse_payload(result.stdout.trim()) {
                Ok(payload) => (Some(payload), None),
                Err(reason) => (None, Some(reason)),
            }
        } else {
            (
                None,
                Some(format!(
                    "Agent invocation failed with exit code {}.",
                    result.exit_code
                )),
            )
        };
        Self {
            exit_code: Some(result.exit_code),
            stdout: result.stdout,
            stderr: result.stderr,
            payload,
            error,
        }
    }

    fn passed(&self) -> bool {
        self.payload
            .as_ref()
            .is_some_and(|payload| payload.status == Verdict::Passed)
    }

    fn summary(&self) -> String {
        match (&self.error, &self.payload) {
            (Some(error), _) => error.clone(),
            (None, Some(payload)) if payload.status != Verdict::Passed => payload.notes.clone(),
            _ => String::new(),
        }
    }

    fn artifact<'a>(&'a self, id: &'a str, attempt: u32, prompt: &'a str) -> AttemptArtifact<'a> {
        AttemptArtifact {
            test_case_id: id,
            attempt,
            prompt,
            agent_exit_code: self.exit_code,
            stdout: &self.stdout,
            stderr: &self.stderr,
            payload: self.payload.as_ref(),
            error: self.error.as_deref(),
        }
    }
}

fn parse_payload(stdout: &str) -> std::result::Result<ExecutionPayload, String> {
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|_| "Agent output was not valid JSON.".to_string())?;
    serde_json::from_value(value).map_err(|err| {
        format!("Agent output did not match required execution payload schema: {err}")
    })
}

#[derive(Debug, Serialize)]
struct AttemptArtifact<'a> {
    test_case_id: &'a str,
    attempt: u32,
    prompt: &'a str,
    agent_exit_code: Option<i32>,
    stdout: &'a str,
    stderr: &'a str,
    payload: Option<&'a ExecutionPayload>,
    error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TestExecutionReport<'a> {
    iteration: &'a str,
    test_plan_file: &'a str,
    executed_test_ids: Vec<String>,
    results: Vec<CaseReport>,
}

#[derive(Debug, Serialize)]
struct CaseReport {
    id: String,
    section: Option<String>,
    description: String,
    status: CaseStatus,
    attempts: u32,
    last_agent_exit_code: Option<i32>,
    notes: String,
    artifacts: Vec<String>,
}

impl CaseReport {
    fn new(case: &PlanItem, entry: &CaseProgress, paths: &FlowPaths, dir: &Path) -> Self {
        Self {
            id: case.id.clone(),
            section: case.section.clone(),
            description: case.description.clone(),
            status: entry.status,
            attempts: entry.attempt_count,
            last_agent_exit_code: entry.last_agent_exit_code,
            notes: entry.last_error_summary.clone(),
            artifacts: (1..=entry.attempt_count)
                .map(|attempt| paths.relative(&dir.join(artifact_name(&case.id, attempt))))
                .collect(),
        }
    }
}

impl TestExecutionReport<'_> {
    fn markdown(&self) -> String {
        let passed = self
            .results
            .iter()
            .filter(|result| result.status == CaseStatus::Passed)
            .count();
        let mut lines = vec![
            format!("# Test Execution Report (Iteration {})", self.iteration),
            String::new(),
            format!("- Test Plan: `{}`", self.test_plan_file),
            format!("- Total Tests: {}", self.results.len()),
            format!("- Passed: {passed}"),
            format!("- Failed: {}", self.results.len() - passed),
            String::new(),
            "| Test ID | Description | Status | Notes | Artifacts |".to_string(),
            "| --- | --- | --- | --- | --- |".to_string(),
        ];
        for result in &self.results {
            let artifacts = result
                .artifacts
                .iter()
                .map(|path| format!("`{path}`"))
                .collect::<Vec<_>>()
                .join("<br>");
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                result.id,
                result.description,
                result.status.as_str(),
                result.notes.replace('\n', " "),
                artifacts
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}
