//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::issue::Issue;
use crate::state::WorkflowState;

/// Check state invariants:
/// - `current_iteration` is a six-digit ordinal
/// - history entries name distinct iterations
pub fn validate_state_invariants(state: &WorkflowState) -> Vec<String> {
    let mut errors = Vec::new();
    if !is_iteration_id(&state.current_iteration) {
        errors.push(format!(
            "current_iteration '{}' must be six digits",
            state.current_iteration
        ));
    }
    let mut seen = HashSet::new();
    for entry in &state.history {
        if !seen.insert(entry.iteration.as_str()) {
            errors.push(format!("duplicate history entry for iteration '{}'", entry.iteration));
        }
    }
    errors
}

/// Check ledger invariants: ids are non-empty and unique.
pub fn validate_issue_invariants(issues: &[Issue]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for issue in issues {
        if issue.id.trim().is_empty() {
            errors.push("issue id must not be empty".to_string());
            continue;
        }
        if !seen.insert(issue.id.as_str()) {
            errors.push(format!("duplicate issue id '{}'", issue.id));
        }
    }
    errors
}

pub fn is_iteration_id(value: &str) -> bool {
    value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit())
}
