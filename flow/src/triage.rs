//! Automated-fix queue (`flow fix`).
//!
//! Open issues are attempted one at a time in ascending id order. After every
//! attempt the outcome is classified, the per-item transition is chosen by
//! [`crate::core::retry::resolve`], and the ledger is rewritten before
//! anything else happens. Terminal items are committed; a failed commit is
//! reported but never changes the recorded status.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{FailureClass, FailureClassifier, KeywordClassifier};
use crate::core::retry::{AttemptOutcome, resolve};
use crate::io::agent::{AgentExecutor, AgentProvider, AgentRequest, AgentResult};
use crate::io::config::FlowConfig;
use crate::io::console::Console;
use crate::io::git::Committer;
use crate::io::issue_store::{IssueLedger, Ledger};
use crate::io::paths::FlowPaths;
use crate::io::skills::{ContextEntry, build_prompt, load_skill};
use crate::io::state_store::{FileStateStore, StateStore};
use crate::issue::{Issue, IssueStatus, select_open};
use crate::state::now_rfc3339;

pub const NO_OPEN_ISSUES: &str = "No open issues to process. Exiting without changes.";
pub const FIX_SKILL: &str = "automated-fix";

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub provider: AgentProvider,
    pub workdir: PathBuf,
    pub skill_body: String,
    pub iteration: String,
    /// Extra attempts per item after a logic failure.
    pub retry_on_fail: u32,
    /// Open items to attempt this run; the rest stay `open`.
    pub iterations: usize,
}

/// Final record for one processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub id: String,
    pub status: IssueStatus,
    pub attempts: u32,
    pub committed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub outcomes: Vec<ItemOutcome>,
}

impl QueueSummary {
    pub fn fixed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == IssueStatus::Fixed)
            .count()
    }

    /// Everything that did not end `fixed`.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.fixed()
    }

    pub fn commit_failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.committed)
            .count()
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!("Summary: Fixed={} Failed={}", self.fixed(), self.failed());
        let commit_failed = self.commit_failed();
        if commit_failed > 0 {
            line.push_str(&format!(" CommitFailed={commit_failed}"));
        }
        line
    }
}

/// Process the open items of `items` against the agent.
///
/// Ledger write failures are fatal and propagate; agent failures never do.
#[instrument(
    skip_all,
    fields(retry_on_fail = options.retry_on_fail, iterations = options.iterations)
)]
pub fn process_queue(
    items: &[Issue],
    ledger: &mut dyn Ledger,
    executor: &dyn AgentExecutor,
    classifier: &dyn FailureClassifier,
    committer: &dyn Committer,
    options: &QueueOptions,
    console: &dyn Console,
) -> Result<QueueSummary> {
    let selected = select_open(items, options.iterations);
    if selected.is_empty() {
        console.out(NO_OPEN_ISSUES);
        return Ok(QueueSummary::default());
    }

    let mut summary = QueueSummary::default();
    for id in &selected {
        let Some(issue) = items.iter().find(|issue| &issue.id == id) else {
            continue;
        };
        let outcome = process_item(
            issue, ledger, executor, classifier, committer, options, console,
        )?;
        summary.outcomes.push(outcome);
    }

    console.out(&summary.summary_line());
    console.out(&format!(
        "Processed {} open issue(s) at {}",
        selected.len(),
        now_rfc3339()
    ));
    Ok(summary)
}

fn process_item(
    issue: &Issue,
    ledger: &mut dyn Ledger,
    executor: &dyn AgentExecutor,
    classifier: &dyn FailureClassifier,
    committer: &dyn Committer,
    options: &QueueOptions,
    console: &dyn Console,
) -> Result<ItemOutcome> {
    let prompt = build_prompt(
        &options.skill_body,
        &[
            ContextEntry::new("iteration", &options.iteration),
            ContextEntry::new(
                "issue",
                serde_json::to_string_pretty(issue).context("serialize issue")?,
            ),
        ],
    )?;
    let request = AgentRequest {
        provider: options.provider,
        prompt,
        workdir: options.workdir.clone(),
    };

    let mut retries_remaining = options.retry_on_fail;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let outcome = classify_attempt(executor.invoke(&request), classifier);
        let resolution = resolve(outcome, retries_remaining);
        debug!(id = %issue.id, attempts, ?outcome, ?resolution, "attempt resolved");

        let status = resolution.status();
        ledger.record(&issue.id, status)?;
        if !status.is_terminal() {
            retries_remaining -= 1;
            continue;
        }

        console.out(&format!(
            "{}: {}",
            issue.id,
            if status == IssueStatus::Fixed { "Fixed" } else { "Failed" }
        ));
        let committed = commit(committer, &issue.id, status);
        if !committed {
            console.out(&format!("Error: git commit failed for {}", issue.id));
        }
        info!(id = %issue.id, status = status.as_str(), attempts, committed, "issue processed");
        return Ok(ItemOutcome {
            id: issue.id.clone(),
            status,
            attempts,
            committed,
        });
    }
}

/// Invocation errors and non-zero exits are classified by their text; a
/// success whose output reads as transient is not trusted.
fn classify_attempt(
    result: Result<AgentResult>,
    classifier: &dyn FailureClassifier,
) -> AttemptOutcome {
    match result {
        Err(err) => {
            let text = format!("{err:#}");
            warn!(err = %text, "agent invocation failed");
            AttemptOutcome::Failed(classifier.classify(&text))
        }
        Ok(result) => {
            let class = classifier.classify(&result.combined_output());
            match (result.success(), class) {
                (true, FailureClass::Logic) => AttemptOutcome::Succeeded,
                (_, class) => AttemptOutcome::Failed(class),
            }
        }
    }
}

fn commit(committer: &dyn Committer, id: &str, status: IssueStatus) -> bool {
    let message = format!("fix: automated-fix {id} -> {}", status.as_str());
    match committer.commit_all(&message) {
        Ok(true) => true,
        Ok(false) => {
            warn!(id, "nothing to commit");
            false
        }
        Err(err) => {
            warn!(id, err = %format!("{err:#}"), "commit failed");
            false
        }
    }
}

/// CLI overrides for `flow fix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixOverrides {
    pub iterations: Option<usize>,
    pub retry_on_fail: Option<u32>,
}

/// `flow fix`: load the current iteration's ledger and process it.
pub fn run_automated_fix(
    paths: &FlowPaths,
    config: &FlowConfig,
    provider: AgentProvider,
    overrides: FixOverrides,
    executor: &dyn AgentExecutor,
    committer: &dyn Committer,
    console: &dyn Console,
) -> Result<QueueSummary> {
    let iterations = overrides.iterations.unwrap_or(config.fix.iterations);
    if iterations == 0 {
        anyhow::bail!("Invalid --iterations value. Expected an integer >= 1.");
    }

    let state = FileStateStore::new(&paths.state_path).read()?;
    let issues_path = paths.issues_path(&state.current_iteration);
    let mut ledger = IssueLedger::load(&issues_path, &paths.relative(&issues_path))?;
    for warning in ledger.warnings() {
        console.err(warning);
    }

    let items = ledger.issues().to_vec();
    if select_open(&items, iterations).is_empty() {
        console.out(NO_OPEN_ISSUES);
        return Ok(QueueSummary::default());
    }

    let options = QueueOptions {
        provider,
        workdir: paths.root.clone(),
        skill_body: load_skill(paths, FIX_SKILL)?,
        iteration: state.current_iteration.clone(),
        retry_on_fail: overrides.retry_on_fail.unwrap_or(config.fix.retry_on_fail),
        iterations,
    };
    let classifier = KeywordClassifier::new(&config.fix.transient_keywords);
    process_queue(
        &items,
        &mut ledger,
        executor,
        &classifier,
        committer,
        &options,
        console,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        BufferConsole, MemoryLedger, RecordingCommitter, ScriptedAgent, issue,
    };

    fn options(retry_on_fail: u32, iterations: usize) -> QueueOptions {
        QueueOptions {
            provider: AgentProvider::Claude,
            workdir: PathBuf::from("/project"),
            skill_body: "# Fix the issue".to_string(),
            iteration: "000009".to_string(),
            retry_on_fail,
            iterations,
        }
    }

    fn three_items() -> Vec<Issue> {
        vec![
            issue("C", IssueStatus::Fixed),
            issue("B", IssueStatus::Open),
            issue("A", IssueStatus::Open),
        ]
    }

    fn run(
        items: &[Issue],
        agent: &ScriptedAgent,
        committer: &RecordingCommitter,
        options: &QueueOptions,
    ) -> (QueueSummary, MemoryLedger, BufferConsole) {
        let mut ledger = MemoryLedger::new(items);
        let console = BufferConsole::default();
        let summary = process_queue(
            items,
            &mut ledger,
            agent,
            &KeywordClassifier::default(),
            committer,
            options,
            &console,
        )
        .expect("process");
        (summary, ledger, console)
    }

    #[test]
    fn all_successes_fix_open_items_in_id_order() {
        let agent = ScriptedAgent::succeeding();
        let committer = RecordingCommitter::default();
        let (summary, ledger, console) = run(&three_items(), &agent, &committer, &options(0, 10));

        assert_eq!(ledger.status("A"), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status("B"), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status("C"), Some(IssueStatus::Fixed));
        assert_eq!((summary.fixed(), summary.failed()), (2, 0));
        assert_eq!(
            ledger.writes(),
            vec![
                ("A".to_string(), IssueStatus::Fixed),
                ("B".to_string(), IssueStatus::Fixed),
            ]
        );
        assert_eq!(
            committer.messages(),
            vec!["fix: automated-fix A -> fixed", "fix: automated-fix B -> fixed"]
        );
        let lines = console.out_lines();
        assert_eq!(&lines[..3], &["A: Fixed", "B: Fixed", "Summary: Fixed=2 Failed=0"]);
        assert!(lines[3].starts_with("Processed 2 open issue(s) at "));
    }

    #[test]
    fn logic_failures_exhaust_budget_then_escalate() {
        let agent = ScriptedAgent::exit_codes(&[1]);
        let committer = RecordingCommitter::default();
        let (summary, ledger, console) = run(&three_items(), &agent, &committer, &options(1, 10));

        assert_eq!(agent.requests().len(), 4);
        assert_eq!(
            summary.outcomes,
            vec![
                ItemOutcome {
                    id: "A".to_string(),
                    status: IssueStatus::ManualFix,
                    attempts: 2,
                    committed: true,
                },
                ItemOutcome {
                    id: "B".to_string(),
                    status: IssueStatus::ManualFix,
                    attempts: 2,
                    committed: true,
                },
            ]
        );
        assert_eq!(
            ledger.writes(),
            vec![
                ("A".to_string(), IssueStatus::Retry),
                ("A".to_string(), IssueStatus::ManualFix),
                ("B".to_string(), IssueStatus::Retry),
                ("B".to_string(), IssueStatus::ManualFix),
            ]
        );
        assert_eq!(console.out_lines()[2], "Summary: Fixed=0 Failed=2");
    }

    #[test]
    fn success_on_second_attempt_is_fixed() {
        let agent = ScriptedAgent::exit_codes(&[1, 0]);
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::Open)];
        let (summary, _, _) = run(&items, &agent, &committer, &options(2, 1));
        assert_eq!(summary.outcomes[0].status, IssueStatus::Fixed);
        assert_eq!(summary.outcomes[0].attempts, 2);
    }

    #[test]
    fn transient_error_escalates_without_retry() {
        let agent = ScriptedAgent::scripted(vec![
            Err("connect ECONNREFUSED 127.0.0.1:443".to_string()),
            Ok((0, String::new())),
        ]);
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::Open)];
        let (summary, ledger, _) = run(&items, &agent, &committer, &options(3, 1));

        assert_eq!(agent.requests().len(), 1);
        assert_eq!(summary.outcomes[0].status, IssueStatus::ManualFix);
        assert_eq!(summary.outcomes[0].attempts, 1);
        assert_eq!(ledger.writes(), vec![("A".to_string(), IssueStatus::ManualFix)]);
    }

    #[test]
    fn success_with_transient_output_is_not_trusted() {
        let agent = ScriptedAgent::scripted(vec![Ok((0, "request timed out".to_string()))]);
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::Open)];
        let (summary, _, _) = run(&items, &agent, &committer, &options(3, 1));
        assert_eq!(summary.outcomes[0].status, IssueStatus::ManualFix);
        assert_eq!(agent.requests().len(), 1);
    }

    #[test]
    fn non_transient_invocation_error_is_a_logic_failure() {
        let agent = ScriptedAgent::scripted(vec![
            Err("spawn command: No such file or directory".to_string()),
            Ok((0, String::new())),
        ]);
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::Open)];
        let (summary, _, _) = run(&items, &agent, &committer, &options(1, 1));
        assert_eq!(summary.outcomes[0].status, IssueStatus::Fixed);
        assert_eq!(summary.outcomes[0].attempts, 2);
    }

    #[test]
    fn iterations_budget_leaves_remainder_open() {
        let agent = ScriptedAgent::succeeding();
        let committer = RecordingCommitter::default();
        let items = vec![
            issue("ISSUE-3", IssueStatus::Open),
            issue("ISSUE-1", IssueStatus::Open),
            issue("ISSUE-2", IssueStatus::Open),
        ];
        let (summary, ledger, _) = run(&items, &agent, &committer, &options(0, 1));
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(ledger.status("ISSUE-1"), Some(IssueStatus::Fixed));
        assert_eq!(ledger.status("ISSUE-2"), Some(IssueStatus::Open));
        assert_eq!(ledger.status("ISSUE-3"), Some(IssueStatus::Open));
    }

    #[test]
    fn commit_failure_is_reported_but_status_stands() {
        let agent = ScriptedAgent::succeeding();
        let committer = RecordingCommitter::with_results(vec![Err("hook rejected".to_string())]);
        let items = vec![issue("A", IssueStatus::Open)];
        let (summary, ledger, console) = run(&items, &agent, &committer, &options(0, 1));

        assert_eq!(ledger.status("A"), Some(IssueStatus::Fixed));
        assert!(!summary.outcomes[0].committed);
        let lines = console.out_lines();
        assert_eq!(
            &lines[..3],
            &[
                "A: Fixed",
                "Error: git commit failed for A",
                "Summary: Fixed=1 Failed=0 CommitFailed=1",
            ]
        );
    }

    #[test]
    fn no_open_items_changes_nothing() {
        let agent = ScriptedAgent::succeeding();
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::ManualFix)];
        let (summary, ledger, console) = run(&items, &agent, &committer, &options(0, 5));
        assert!(summary.outcomes.is_empty());
        assert!(ledger.writes().is_empty());
        assert!(agent.requests().is_empty());
        assert_eq!(console.out_lines(), vec![NO_OPEN_ISSUES]);
    }

    #[test]
    fn prompt_carries_issue_and_iteration() {
        let agent = ScriptedAgent::succeeding();
        let committer = RecordingCommitter::default();
        let items = vec![issue("A", IssueStatus::Open)];
        run(&items, &agent, &committer, &options(0, 1));
        let prompt = &agent.requests()[0].prompt;
        assert!(prompt.starts_with("# Fix the issue"));
        assert!(prompt.contains("000009"));
        assert!(prompt.contains("\"id\": \"A\""));
    }
}
