//! Flow configuration stored under `.agents/flow.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::DEFAULT_TRANSIENT_KEYWORDS;
use crate::io::agent::AgentProvider;
use crate::io::atomic::write_atomic;

/// Flow configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
/// Command-line flags override these values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FlowConfig {
    pub agent: AgentConfig,
    pub fix: FixConfig,
    pub flow: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider used when `--agent` is not given. Absent means ask on stdin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Kill the agent after this many seconds. Absent means wait forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Keep at most this many bytes of agent stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: None,
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixConfig {
    /// Extra attempts per issue after a logic failure.
    pub retry_on_fail: u32,

    /// Open issues to attempt per `flow fix` run.
    pub iterations: usize,

    /// Substrings (case-insensitive) that mark a failure as transient.
    pub transient_keywords: Vec<String>,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            retry_on_fail: 0,
            iterations: 1,
            transient_keywords: DEFAULT_TRANSIENT_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound on steps executed by a single `flow run`.
    pub max_steps: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { max_steps: 100 }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(provider) = &self.agent.provider {
            provider
                .parse::<AgentProvider>()
                .context("agent.provider")?;
        }
        if self.agent.timeout_secs == Some(0) {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.fix.iterations == 0 {
            return Err(anyhow!("fix.iterations must be >= 1"));
        }
        if self
            .fix
            .transient_keywords
            .iter()
            .any(|keyword| keyword.trim().is_empty())
        {
            return Err(anyhow!("fix.transient_keywords must not contain empty entries"));
        }
        if self.flow.max_steps == 0 {
            return Err(anyhow!("flow.max_steps must be > 0"));
        }
        Ok(())
    }

    /// Default provider from config, parsed.
    pub fn provider(&self) -> Result<Option<AgentProvider>> {
        self.agent
            .provider
            .as_deref()
            .map(str::parse)
            .transpose()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FlowConfig::default()`.
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    if !path.exists() {
        return Ok(FlowConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FlowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FlowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FlowConfig::default());
        assert_eq!(cfg.fix.iterations, 1);
        assert_eq!(cfg.flow.max_steps, 100);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("flow.toml");
        let mut cfg = FlowConfig::default();
        cfg.agent.provider = Some("codex".to_string());
        cfg.agent.timeout_secs = Some(600);
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.provider().expect("provider"), Some(AgentProvider::Codex));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("flow.toml");
        fs::write(&path, "[fix]\nretry_on_fail = 2\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.fix.retry_on_fail, 2);
        assert_eq!(cfg.fix.iterations, 1);
        assert_eq!(cfg.agent, AgentConfig::default());
    }

    #[test]
    fn rejects_unknown_provider_and_zero_iterations() {
        let mut cfg = FlowConfig::default();
        cfg.agent.provider = Some("copilot".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = FlowConfig::default();
        cfg.fix.iterations = 0;
        let err = cfg.validate().expect_err("zero iterations");
        assert!(err.to_string().contains("fix.iterations"));
    }
}
