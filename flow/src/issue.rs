//! Work items processed by the automated-fix queue.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueStatus {
    Open,
    Retry,
    Fixed,
    ManualFix,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Retry => "retry",
            IssueStatus::Fixed => "fixed",
            IssueStatus::ManualFix => "manual-fix",
        }
    }

    /// `fixed` and `manual-fix` end an item's automated run.
    pub fn is_terminal(self) -> bool {
        matches!(self, IssueStatus::Fixed | IssueStatus::ManualFix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
}

/// Open issues in processing order (ascending id), truncated to `limit`.
pub fn select_open(issues: &[Issue], limit: usize) -> Vec<String> {
    let mut open: Vec<&Issue> = issues
        .iter()
        .filter(|issue| issue.status == IssueStatus::Open)
        .collect();
    open.sort_by(|a, b| a.id.cmp(&b.id));
    open.into_iter()
        .take(limit)
        .map(|issue| issue.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::issue;

    #[test]
    fn status_serializes_kebab_case() {
        let value = serde_json::to_value(IssueStatus::ManualFix).expect("serialize");
        assert_eq!(value, "manual-fix");
        assert_eq!(IssueStatus::ManualFix.as_str(), "manual-fix");
    }

    #[test]
    fn only_fixed_and_manual_fix_are_terminal() {
        assert!(IssueStatus::Fixed.is_terminal());
        assert!(IssueStatus::ManualFix.is_terminal());
        assert!(!IssueStatus::Open.is_terminal());
        assert!(!IssueStatus::Retry.is_terminal());
    }

    #[test]
    fn select_open_sorts_by_id_and_truncates() {
        let issues = vec![
            issue("C", IssueStatus::Open),
            issue("A", IssueStatus::Fixed),
            issue("B", IssueStatus::Open),
            issue("D", IssueStatus::Open),
        ];
        assert_eq!(select_open(&issues, 2), vec!["B", "C"]);
        assert_eq!(select_open(&issues, 10), vec!["B", "C", "D"]);
    }
}
