//! `flow validate`: check config, state and the current issue ledger.

use anyhow::{Context, Result};

use crate::io::config::load_config;
use crate::io::issue_store::IssueLedger;
use crate::io::paths::FlowPaths;
use crate::io::state_store::{FileStateStore, StateStore};
use crate::state::Phase;

/// Summary of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub iteration: String,
    pub phase: Phase,
    /// Issue ledger for the current iteration, when one exists.
    pub ledger: Option<LedgerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub path: String,
    pub issues: usize,
    /// Entries that fail the entry schema (kept, never processed).
    pub warnings: Vec<String>,
}

pub fn validate_project(paths: &FlowPaths) -> Result<ValidateOutcome> {
    load_config(&paths.config_path).context("load .agents/flow.toml")?;
    let state = FileStateStore::new(&paths.state_path)
        .read()
        .context("load .agents/state.json")?;

    let issues_path = paths.issues_path(&state.current_iteration);
    let ledger = if issues_path.exists() {
        let display = paths.relative(&issues_path);
        let ledger = IssueLedger::load(&issues_path, &display)?;
        Some(LedgerSummary {
            path: display,
            issues: ledger.issues().len(),
            warnings: ledger.warnings().to_vec(),
        })
    } else {
        None
    };

    Ok(ValidateOutcome {
        iteration: state.current_iteration,
        phase: state.current_phase,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TempProject, prototype_state};

    #[test]
    fn valid_project_without_ledger() {
        let project = TempProject::new().expect("project");
        project.write_state(&prototype_state()).expect("state");

        let outcome = validate_project(&project.paths()).expect("validate");
        assert_eq!(outcome.iteration, "000019");
        assert_eq!(outcome.phase, Phase::Prototype);
        assert_eq!(outcome.ledger, None);
    }

    #[test]
    fn ledger_is_counted_and_malformed_entries_reported() {
        let project = TempProject::new().expect("project");
        project.write_state(&prototype_state()).expect("state");
        project
            .write_flow_file(
                "it_000019_ISSUES.json",
                r#"[
                    {"id": "A", "title": "a", "description": "d", "status": "open"},
                    {"id": "B", "title": "b", "description": "d", "status": "unknown"}
                ]"#,
            )
            .expect("ledger");

        let ledger = validate_project(&project.paths())
            .expect("validate")
            .ledger
            .expect("ledger summary");
        assert_eq!(ledger.path, ".agents/flow/it_000019_ISSUES.json");
        assert_eq!(ledger.issues, 1);
        assert_eq!(ledger.warnings.len(), 1);
        assert!(ledger.warnings[0].starts_with("Warning: Skipping issue at index 1:"));
    }

    #[test]
    fn missing_state_fails() {
        let project = TempProject::new().expect("project");
        let err = validate_project(&project.paths()).expect_err("no state");
        assert!(format!("{err:#}").contains("run `flow start` first"));
    }

    #[test]
    fn invalid_config_fails() {
        let project = TempProject::new().expect("project");
        project.write_state(&prototype_state()).expect("state");
        std::fs::write(&project.paths().config_path, "[fix]\niterations = 0\n").expect("config");
        let err = validate_project(&project.paths()).expect_err("bad config");
        assert!(format!("{err:#}").contains("fix.iterations must be >= 1"));
    }
}
