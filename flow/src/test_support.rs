//! Test-only fakes for the flow ports and deterministic fixtures.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::StepId;
use crate::flow::{StepContext, StepHandlers};
use crate::io::agent::{AgentExecutor, AgentProvider, AgentRequest, AgentResult};
use crate::io::console::{Console, LineReader};
use crate::io::git::Committer;
use crate::io::issue_store::Ledger;
use crate::io::paths::FlowPaths;
use crate::io::state_store::{FileStateStore, StateStore};
use crate::issue::{Issue, IssueStatus};
use crate::state::{Phase, StepStatus, WorkflowState, initial_state};
use crate::steps::PROJECT_CONTEXT_FILE;

/// Iteration `000019` sitting in the prototype phase with the define phase
/// done and the project context approved; `create-prototype` is next.
pub fn prototype_state() -> WorkflowState {
    let mut state = initial_state("000019");
    state.current_phase = Phase::Prototype;
    state.phases.define.requirement_definition.set(
        StepStatus::Approved,
        "it_000019_product-requirement-document.md",
    );
    state
        .phases
        .define
        .prd_generation
        .set(StepStatus::Completed, "it_000019_PRD.json");
    state
        .phases
        .prototype
        .project_context
        .set(StepStatus::Created, PROJECT_CONTEXT_FILE);
    state
}

/// Copy of `base` with `edit` applied.
pub fn with_state(base: &WorkflowState, edit: impl FnOnce(&mut WorkflowState)) -> WorkflowState {
    let mut state = base.clone();
    edit(&mut state);
    state
}

pub fn issue(id: &str, status: IssueStatus) -> Issue {
    Issue {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        status,
    }
}

/// Console that captures both channels.
#[derive(Debug, Default)]
pub struct BufferConsole {
    out: RefCell<Vec<String>>,
    err: RefCell<Vec<String>>,
}

impl BufferConsole {
    pub fn out_lines(&self) -> Vec<String> {
        self.out.borrow().clone()
    }

    pub fn err_lines(&self) -> Vec<String> {
        self.err.borrow().clone()
    }
}

impl Console for BufferConsole {
    fn out(&self, line: &str) {
        self.out.borrow_mut().push(line.to_string());
    }

    fn err(&self, line: &str) {
        self.err.borrow_mut().push(line.to_string());
    }
}

/// Line reader fed from a fixed script; end of script is end of input.
#[derive(Debug, Default)]
pub struct ScriptedLineReader {
    lines: RefCell<VecDeque<String>>,
    reads: Cell<usize>,
}

impl ScriptedLineReader {
    pub fn new<I>(lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            lines: RefCell::new(lines.into_iter().map(Into::into).collect()),
            reads: Cell::new(0),
        }
    }

    /// Number of `read_line` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl LineReader for ScriptedLineReader {
    fn read_line(&self) -> Result<Option<String>> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.lines.borrow_mut().pop_front())
    }
}

/// In-memory state store that keeps every written document.
#[derive(Debug)]
pub struct MemoryStateStore {
    state: RefCell<WorkflowState>,
    writes: RefCell<Vec<WorkflowState>>,
}

impl MemoryStateStore {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            state: RefCell::new(state),
            writes: RefCell::new(Vec::new()),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    pub fn writes(&self) -> Vec<WorkflowState> {
        self.writes.borrow().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self) -> Result<WorkflowState> {
        Ok(self.state())
    }

    fn write(&self, state: &WorkflowState) -> Result<()> {
        *self.state.borrow_mut() = state.clone();
        self.writes.borrow_mut().push(state.clone());
        Ok(())
    }
}

enum Behavior<'a> {
    Apply(Box<dyn Fn(&mut WorkflowState) + 'a>),
    Fail(Box<dyn Fn() -> anyhow::Error + 'a>),
}

/// Step handlers that record calls and apply scripted state edits.
///
/// Steps without a script succeed without changing the state.
pub struct RecordingSteps<'a> {
    store: &'a MemoryStateStore,
    behaviors: Vec<(StepId, Behavior<'a>)>,
    calls: RefCell<Vec<(StepId, StepContext)>>,
}

impl<'a> RecordingSteps<'a> {
    pub fn new(store: &'a MemoryStateStore) -> Self {
        Self {
            store,
            behaviors: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Apply `edit` to the stored state when `step` runs.
    pub fn on(mut self, step: StepId, edit: impl Fn(&mut WorkflowState) + 'a) -> Self {
        self.behaviors.push((step, Behavior::Apply(Box::new(edit))));
        self
    }

    pub fn fail(self, step: StepId, message: &str) -> Self {
        let message = message.to_string();
        self.fail_with(step, move || anyhow!(message.clone()))
    }

    pub fn fail_with(mut self, step: StepId, error: impl Fn() -> anyhow::Error + 'a) -> Self {
        self.behaviors.push((step, Behavior::Fail(Box::new(error))));
        self
    }

    pub fn calls(&self) -> Vec<StepId> {
        self.calls.borrow().iter().map(|(step, _)| *step).collect()
    }

    pub fn providers(&self) -> Vec<AgentProvider> {
        self.calls.borrow().iter().map(|(_, ctx)| ctx.provider).collect()
    }

    pub fn forced(&self) -> Vec<bool> {
        self.calls.borrow().iter().map(|(_, ctx)| ctx.force).collect()
    }
}

impl StepHandlers for RecordingSteps<'_> {
    fn run_step(&self, step: StepId, ctx: &StepContext) -> Result<()> {
        self.calls.borrow_mut().push((step, *ctx));
        let Some((_, behavior)) = self.behaviors.iter().find(|(id, _)| *id == step) else {
            return Ok(());
        };
        match behavior {
            Behavior::Apply(edit) => {
                let mut state = self.store.read()?;
                edit(&mut state);
                self.store.write(&state)
            }
            Behavior::Fail(error) => Err(error()),
        }
    }
}

/// Scripted reply: `Ok((exit_code, stdout))` or an invocation error message.
pub type AgentReply = std::result::Result<(i32, String), String>;

/// Agent executor that replays a script; the last reply repeats.
#[derive(Debug)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<AgentReply>>,
    last: RefCell<AgentReply>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn scripted(replies: Vec<AgentReply>) -> Self {
        let last = replies.last().cloned().unwrap_or(Ok((0, String::new())));
        Self {
            replies: RefCell::new(replies.into()),
            last: RefCell::new(last),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn exit_codes(codes: &[i32]) -> Self {
        Self::scripted(codes.iter().map(|code| Ok((*code, String::new()))).collect())
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl AgentExecutor for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.last.borrow().clone());
        match reply {
            Ok((exit_code, stdout)) => Ok(AgentResult {
                exit_code,
                stdout,
                stderr: String::new(),
            }),
            Err(message) => Err(anyhow!(message)),
        }
    }
}

/// Committer that records messages; results are scripted, then `Ok(true)`.
#[derive(Debug, Default)]
pub struct RecordingCommitter {
    results: RefCell<VecDeque<std::result::Result<bool, String>>>,
    messages: RefCell<Vec<String>>,
}

impl RecordingCommitter {
    pub fn with_results(results: Vec<std::result::Result<bool, String>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            messages: RefCell::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Committer for RecordingCommitter {
    fn commit_all(&self, message: &str) -> Result<bool> {
        self.messages.borrow_mut().push(message.to_string());
        match self.results.borrow_mut().pop_front() {
            None => Ok(true),
            Some(Ok(committed)) => Ok(committed),
            Some(Err(message)) => Err(anyhow!(message)),
        }
    }
}

/// Ledger held in memory; records every status write in order.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    issues: Vec<Issue>,
    writes: Vec<(String, IssueStatus)>,
}

impl MemoryLedger {
    pub fn new(issues: &[Issue]) -> Self {
        Self {
            issues: issues.to_vec(),
            writes: Vec::new(),
        }
    }

    pub fn status(&self, id: &str) -> Option<IssueStatus> {
        self.issues
            .iter()
            .find(|issue| issue.id == id)
            .map(|issue| issue.status)
    }

    pub fn writes(&self) -> Vec<(String, IssueStatus)> {
        self.writes.clone()
    }
}

impl Ledger for MemoryLedger {
    fn record(&mut self, id: &str, status: IssueStatus) -> Result<()> {
        let issue = self
            .issues
            .iter_mut()
            .find(|issue| issue.id == id)
            .ok_or_else(|| anyhow!("unknown issue id '{id}'"))?;
        issue.status = status;
        self.writes.push((id.to_string(), status));
        Ok(())
    }
}

/// Project root in a temporary directory.
#[derive(Debug)]
pub struct TempProject {
    dir: TempDir,
}

impl TempProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp project")?;
        let project = Self { dir };
        fs::create_dir_all(project.paths().flow_dir).context("create flow dir")?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> FlowPaths {
        FlowPaths::new(self.root())
    }

    /// Write a minimal `SKILL.md` with frontmatter for each name.
    pub fn write_skills(&self, names: &[&str]) -> Result<()> {
        for name in names {
            let path = self.paths().skill_path(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("create skill dir")?;
            }
            fs::write(&path, format!("---\nname: {name}\n---\n# {name}\n"))
                .with_context(|| format!("write skill {name}"))?;
        }
        Ok(())
    }

    pub fn write_flow_file(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.paths().flow_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read_flow_file(&self, name: &str) -> Result<String> {
        let path = self.paths().flow_dir.join(name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn read_state(&self) -> Result<WorkflowState> {
        FileStateStore::new(self.paths().state_path).read()
    }

    pub fn write_state(&self, state: &WorkflowState) -> Result<()> {
        FileStateStore::new(self.paths().state_path).write(state)
    }
}
