//! Issue ledger load/save (`.agents/flow/it_<iteration>_ISSUES.json`).
//!
//! Entries that fail the entry schema are kept verbatim and never processed,
//! so rewriting the ledger never loses data a human put there.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::validate_issue_invariants;
use crate::io::atomic::write_json_atomic;
use crate::io::schema::Schema;
use crate::issue::{Issue, IssueStatus};

/// Persistence port for issue status changes.
pub trait Ledger {
    /// Set `id`'s status and persist the whole ledger before returning.
    fn record(&mut self, id: &str, status: IssueStatus) -> Result<()>;
}

/// File-backed ledger. Malformed entries are written back with their keys,
/// key order and values untouched.
#[derive(Debug)]
pub struct IssueLedger {
    path: PathBuf,
    raw: Vec<Value>,
    issues: Vec<Issue>,
    /// Issue id -> position in `raw`.
    index: HashMap<String, usize>,
    warnings: Vec<String>,
}

impl IssueLedger {
    /// Load and validate. `display` is the path shown in validation errors.
    pub fn load(path: impl Into<PathBuf>, display: &str) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(anyhow!(
                "Issues file not found: expected {display}. Run `flow issue` first."
            ));
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read issues {}", path.display()))?;
        let parsed: Value = serde_json::from_str(&contents).map_err(|err| {
            debug!(err = %err, "issues json parse failed");
            anyhow!("Deterministic validation error: invalid issues JSON in {display}.")
        })?;
        let Value::Array(raw) = parsed else {
            return Err(anyhow!(
                "Deterministic validation error: issues schema mismatch in {display}."
            ));
        };

        let schema = Schema::issue()?;
        let mut issues = Vec::new();
        let mut index = HashMap::new();
        let mut warnings = Vec::new();
        for (position, entry) in raw.iter().enumerate() {
            let checked = schema.check(entry).and_then(|()| {
                serde_json::from_value::<Issue>(entry.clone()).map_err(|err| err.to_string())
            });
            match checked {
                Ok(issue) => {
                    index.insert(issue.id.clone(), position);
                    issues.push(issue);
                }
                Err(reason) => {
                    warn!(position, reason = %reason, "skipping malformed issue");
                    warnings.push(format!("Warning: Skipping issue at index {position}: {reason}"));
                }
            }
        }

        let errors = validate_issue_invariants(&issues);
        if !errors.is_empty() {
            return Err(anyhow!(
                "Deterministic validation error: {} in {display}.",
                errors.join("; ")
            ));
        }

        debug!(
            valid = issues.len(),
            skipped = warnings.len(),
            "loaded issue ledger"
        );
        Ok(Self {
            path,
            raw,
            issues,
            index,
            warnings,
        })
    }

    /// Replace whatever is at `path` with a ledger holding exactly `issues`.
    pub fn create(path: impl Into<PathBuf>, issues: Vec<Issue>) -> Result<Self> {
        let errors = validate_issue_invariants(&issues);
        if !errors.is_empty() {
            return Err(anyhow!("Generated issues are invalid: {}.", errors.join("; ")));
        }
        let schema = Schema::issue()?;
        let mut raw = Vec::with_capacity(issues.len());
        let mut index = HashMap::new();
        for (position, issue) in issues.iter().enumerate() {
            let entry = serde_json::to_value(issue).context("serialize issue")?;
            schema.check(&entry).map_err(|reason| {
                anyhow!("Generated issue '{}' failed schema validation: {reason}", issue.id)
            })?;
            index.insert(issue.id.clone(), position);
            raw.push(entry);
        }
        let ledger = Self {
            path: path.into(),
            raw,
            issues,
            index,
            warnings: Vec::new(),
        };
        ledger.persist()?;
        Ok(ledger)
    }

    /// Well-formed issues, in file order.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// One line per skipped entry.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.raw)
            .with_context(|| format!("write issues {}", self.path.display()))
    }
}

impl Ledger for IssueLedger {
    fn record(&mut self, id: &str, status: IssueStatus) -> Result<()> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| anyhow!("unknown issue id '{id}'"))?;
        let entry = self.raw[position]
            .as_object_mut()
            .ok_or_else(|| anyhow!("issue '{id}' is not an object"))?;
        entry.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        if let Some(issue) = self.issues.iter_mut().find(|issue| issue.id == id) {
            issue.status = status;
        }
        self.persist()
    }
}
