//! Per-item retry state machine for the automated-fix queue.
//!
//! `open -> retry* -> fixed | manual-fix`. Only logic failures spend the
//! retry budget; a transient failure escalates immediately without spending it.

use crate::core::classifier::FailureClass;
use crate::issue::IssueStatus;

/// What a single attempt amounted to after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FailureClass),
}

/// Transition chosen after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Terminal: the item is fixed.
    Fixed,
    /// Spend one retry and attempt again.
    Retry,
    /// Terminal: a human must take over.
    ManualFix,
}

impl Resolution {
    pub fn status(self) -> IssueStatus {
        match self {
            Resolution::Fixed => IssueStatus::Fixed,
            Resolution::Retry => IssueStatus::Retry,
            Resolution::ManualFix => IssueStatus::ManualFix,
        }
    }
}

/// Decide the next transition given the attempt outcome and the retries left.
pub fn resolve(outcome: AttemptOutcome, retries_remaining: u32) -> Resolution {
    match outcome {
        AttemptOutcome::Succeeded => Resolution::Fixed,
        AttemptOutcome::Failed(FailureClass::Transient) => Resolution::ManualFix,
        AttemptOutcome::Failed(FailureClass::Logic) if retries_remaining > 0 => Resolution::Retry,
        AttemptOutcome::Failed(FailureClass::Logic) => Resolution::ManualFix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive `resolve` over a scripted outcome sequence; returns (final status, attempts).
    fn simulate(outcomes: &[AttemptOutcome], budget: u32) -> (IssueStatus, usize) {
        let mut remaining = budget;
        for (index, outcome) in outcomes.iter().enumerate() {
            match resolve(*outcome, remaining) {
                Resolution::Retry => remaining -= 1,
                terminal => return (terminal.status(), index + 1),
            }
        }
        panic!("outcome script exhausted before a terminal resolution");
    }

    const LOGIC: AttemptOutcome = AttemptOutcome::Failed(FailureClass::Logic);
    const TRANSIENT: AttemptOutcome = AttemptOutcome::Failed(FailureClass::Transient);

    #[test]
    fn exhausting_budget_escalates_after_budget_plus_one_attempts() {
        for budget in 0..5u32 {
            let outcomes = vec![LOGIC; budget as usize + 1];
            assert_eq!(
                simulate(&outcomes, budget),
                (IssueStatus::ManualFix, budget as usize + 1)
            );
        }
    }

    #[test]
    fn success_within_budget_is_fixed() {
        let budget = 3;
        for k in 1..=budget as usize + 1 {
            let mut outcomes = vec![LOGIC; k - 1];
            outcomes.push(AttemptOutcome::Succeeded);
            assert_eq!(simulate(&outcomes, budget), (IssueStatus::Fixed, k));
        }
    }

    #[test]
    fn transient_failure_escalates_without_spending_budget() {
        assert_eq!(resolve(TRANSIENT, 3), Resolution::ManualFix);
        assert_eq!(
            simulate(&[TRANSIENT, AttemptOutcome::Succeeded], 3),
            (IssueStatus::ManualFix, 1)
        );
    }

    #[test]
    fn logic_failure_with_budget_retries() {
        assert_eq!(resolve(LOGIC, 1), Resolution::Retry);
        assert_eq!(resolve(LOGIC, 0), Resolution::ManualFix);
    }
}
