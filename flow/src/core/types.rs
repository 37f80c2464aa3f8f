//! Shared deterministic types for the flow core.
//!
//! These types define stable contracts between the decision engine, the
//! driver, and the retry engine. They must not depend on external state.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};

/// Every step the driver can dispatch. Adding a variant forces every
/// dispatch `match` to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    DefineRequirement,
    CreatePrd,
    CreateProjectContext,
    CreatePrototype,
    CreateTestPlan,
    ExecuteTestPlan,
    DefineRefactorPlan,
    ExecuteRefactor,
}

impl StepId {
    pub const ALL: [StepId; 8] = [
        StepId::DefineRequirement,
        StepId::CreatePrd,
        StepId::CreateProjectContext,
        StepId::CreatePrototype,
        StepId::CreateTestPlan,
        StepId::ExecuteTestPlan,
        StepId::DefineRefactorPlan,
        StepId::ExecuteRefactor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::DefineRequirement => "define-requirement",
            StepId::CreatePrd => "create-prd",
            StepId::CreateProjectContext => "create-project-context",
            StepId::CreatePrototype => "create-prototype",
            StepId::CreateTestPlan => "create-test-plan",
            StepId::ExecuteTestPlan => "execute-test-plan",
            StepId::DefineRefactorPlan => "define-refactor-plan",
            StepId::ExecuteRefactor => "execute-refactor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StepId::DefineRequirement => "define requirement",
            StepId::CreatePrd => "create prd",
            StepId::CreateProjectContext => "create project-context",
            StepId::CreatePrototype => "create prototype",
            StepId::CreateTestPlan => "create test-plan",
            StepId::ExecuteTestPlan => "execute test-plan",
            StepId::DefineRefactorPlan => "define refactor-plan",
            StepId::ExecuteRefactor => "execute refactor",
        }
    }

    /// True if the step invokes the coding agent and therefore needs a provider.
    pub fn requires_agent(self) -> bool {
        match self {
            StepId::DefineRequirement
            | StepId::CreatePrd
            | StepId::CreateProjectContext
            | StepId::CreatePrototype
            | StepId::CreateTestPlan
            | StepId::ExecuteTestPlan
            | StepId::DefineRefactorPlan
            | StepId::ExecuteRefactor => true,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human approval points, in the priority order the decision engine checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalGate {
    Requirement,
    ProjectContext,
    TestPlan,
    Prototype,
    RefactorPlan,
}

impl ApprovalGate {
    pub const ALL: [ApprovalGate; 5] = [
        ApprovalGate::Requirement,
        ApprovalGate::ProjectContext,
        ApprovalGate::TestPlan,
        ApprovalGate::Prototype,
        ApprovalGate::RefactorPlan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalGate::Requirement => "requirement",
            ApprovalGate::ProjectContext => "project-context",
            ApprovalGate::TestPlan => "test-plan",
            ApprovalGate::Prototype => "prototype",
            ApprovalGate::RefactorPlan => "refactor-plan",
        }
    }
}

impl fmt::Display for ApprovalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalGate {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        ApprovalGate::ALL
            .into_iter()
            .find(|gate| gate.as_str() == value)
            .ok_or_else(|| anyhow!("unknown approval gate '{value}'"))
    }
}

/// Next action derived from a workflow state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Exactly one runnable step.
    Step(StepId),
    /// A human must approve before anything can run.
    ApprovalGate { gate: ApprovalGate, message: String },
    /// The iteration reached its terminal state.
    Complete { message: String },
    /// No rule matched the state.
    Blocked { message: String },
}
