//! Embedded JSON Schemas for persisted documents.

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;

const STATE_SCHEMA: &str = include_str!("../../schemas/state.schema.json");
const ISSUE_SCHEMA: &str = include_str!("../../schemas/issue.schema.json");

/// Compiled schema for one document kind.
pub struct Schema {
    validator: Validator,
}

impl Schema {
    pub fn state() -> Result<Self> {
        Self::compile("state", STATE_SCHEMA)
    }

    /// Schema for a single issue ledger entry.
    pub fn issue() -> Result<Self> {
        Self::compile("issue", ISSUE_SCHEMA)
    }

    fn compile(name: &str, source: &str) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(source).with_context(|| format!("parse {name} schema"))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("invalid {name} schema: {err}"))?;
        Ok(Self { validator })
    }

    /// All violations, joined; `Ok` when the document conforms.
    pub fn check(&self, doc: &Value) -> std::result::Result<(), String> {
        if self.validator.is_valid(doc) {
            return Ok(());
        }
        let messages = self
            .validator
            .iter_errors(doc)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FIRST_ITERATION, initial_state};

    #[test]
    fn initial_state_conforms() {
        let schema = Schema::state().expect("schema");
        let doc = serde_json::to_value(initial_state(FIRST_ITERATION)).expect("serialize");
        assert_eq!(schema.check(&doc), Ok(()));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let schema = Schema::state().expect("schema");
        let mut doc = serde_json::to_value(initial_state(FIRST_ITERATION)).expect("serialize");
        doc["phases"]["prototype"]["test_plan"]["status"] = Value::from("done");
        let err = schema.check(&doc).expect_err("invalid");
        assert!(err.contains("\"done\""), "{err}");
    }

    #[test]
    fn issue_entry_requires_known_status() {
        let schema = Schema::issue().expect("schema");
        let ok = serde_json::json!({"id": "A", "title": "t", "description": "d", "status": "open"});
        let bad =
            serde_json::json!({"id": "B", "title": "t", "description": "d", "status": "closed"});
        assert!(schema.check(&ok).is_ok());
        assert!(schema.check(&bad).is_err());
    }
}
