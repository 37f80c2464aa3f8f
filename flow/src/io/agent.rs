//! Agent abstraction for coding-agent invocation.
//!
//! The [`AgentExecutor`] trait decouples step handlers and the fix queue from
//! the agent CLIs. Tests use scripted executors that return predetermined
//! results without spawning processes.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command;

/// Supported coding-agent CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentProvider {
    Claude,
    Codex,
    Gemini,
}

impl AgentProvider {
    pub const ALL: [AgentProvider; 3] = [
        AgentProvider::Claude,
        AgentProvider::Codex,
        AgentProvider::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentProvider::Claude => "claude",
            AgentProvider::Codex => "codex",
            AgentProvider::Gemini => "gemini",
        }
    }

    /// Build the command line. Returns the command plus the stdin payload, if
    /// the provider reads its prompt from stdin.
    pub fn command(self, prompt: &str) -> (Command, Option<Vec<u8>>) {
        match self {
            AgentProvider::Claude => {
                let mut cmd = Command::new("claude");
                cmd.arg("--dangerously-skip-permissions").arg("--print");
                (cmd, Some(prompt.as_bytes().to_vec()))
            }
            AgentProvider::Codex => {
                let mut cmd = Command::new("codex");
                cmd.arg("exec")
                    .arg("--dangerously-bypass-approvals-and-sandbox");
                (cmd, Some(prompt.as_bytes().to_vec()))
            }
            AgentProvider::Gemini => {
                let mut cmd = Command::new("gemini");
                cmd.arg("-p").arg(prompt).arg("--yolo");
                (cmd, None)
            }
        }
    }
}

impl fmt::Display for AgentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        AgentProvider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == trimmed)
            .ok_or_else(|| {
                let valid = AgentProvider::ALL.map(AgentProvider::as_str).join(", ");
                anyhow!("Unknown agent provider '{trimmed}'. Valid providers: {valid}.")
            })
    }
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub provider: AgentProvider,
    pub prompt: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
}

/// What the agent process reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl AgentResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for classification and error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Abstraction over agent backends.
///
/// `Err` means the invocation itself failed (spawn failure, timeout); a
/// non-zero exit is reported through [`AgentResult::exit_code`].
pub trait AgentExecutor {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult>;
}

/// Executor that spawns the provider's CLI.
#[derive(Debug, Clone)]
pub struct CliAgentExecutor {
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl AgentExecutor for CliAgentExecutor {
    #[instrument(skip_all, fields(provider = %request.provider))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let (mut cmd, stdin) = request.provider.command(&request.prompt);
        cmd.current_dir(&request.workdir);

        let output = run_command(cmd, stdin.as_deref(), self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {} agent", request.provider))?;

        if output.timed_out {
            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!(timeout_secs = secs, "agent timed out");
            return Err(anyhow!(
                "{} agent timed out after {secs}s",
                request.provider
            ));
        }

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, "agent finished");
        Ok(AgentResult {
            exit_code,
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers_and_lists_valid_ones() {
        assert_eq!(" claude\n".parse::<AgentProvider>().expect("parse"), AgentProvider::Claude);
        let err = "copilot".parse::<AgentProvider>().expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "Unknown agent provider 'copilot'. Valid providers: claude, codex, gemini."
        );
    }

    #[test]
    fn gemini_takes_prompt_as_argument() {
        let (cmd, stdin) = AgentProvider::Gemini.command("fix it");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-p", "fix it", "--yolo"]);
        assert!(stdin.is_none());
    }

    #[test]
    fn claude_and_codex_read_prompt_from_stdin() {
        let (cmd, stdin) = AgentProvider::Claude.command("hello");
        assert_eq!(cmd.get_program(), "claude");
        assert_eq!(stdin.as_deref(), Some(b"hello".as_slice()));

        let (cmd, _) = AgentProvider::Codex.command("hello");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["exec", "--dangerously-bypass-approvals-and-sandbox"]);
    }

    #[test]
    fn combined_output_joins_non_empty_streams() {
        let result = AgentResult {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(result.combined_output(), "out\nerr");
        assert!(!result.success());
    }
}
