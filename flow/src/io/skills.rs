//! Skill loading and agent prompt rendering.

use std::fs;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::io::paths::FlowPaths;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");

/// One titled block in the prompt's context section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
}

impl ContextEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Read `.agents/skills/<name>/SKILL.md` with its front-matter removed.
pub fn load_skill(paths: &FlowPaths, name: &str) -> Result<String> {
    let path = paths.skill_path(name);
    if !path.exists() {
        return Err(anyhow!("Skill '{name}' not found at {}", path.display()));
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    debug!(skill = name, bytes = raw.len(), "loaded skill");
    Ok(strip_frontmatter(&raw).to_string())
}

/// Drop a leading `---` ... `---` block. Content without a closed block is
/// returned unchanged.
pub fn strip_frontmatter(content: &str) -> &str {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return content;
    };
    match rest.find("---") {
        Some(end) => rest[end + 3..].trim_start(),
        None => content,
    }
}

/// Render the agent prompt: skill body followed by the ordered context blocks.
pub fn build_prompt(skill: &str, entries: &[ContextEntry]) -> Result<String> {
    let env = Environment::new();
    let rendered = env
        .render_str(
            AGENT_TEMPLATE,
            context! {
                skill => skill.trim_end(),
                context => entries,
            },
        )
        .context("render agent prompt")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_closed_frontmatter_only() {
        let skill = "---\nname: fix\n---\n\n# Fix\nDo it.\n";
        assert_eq!(strip_frontmatter(skill), "# Fix\nDo it.\n");
        assert_eq!(strip_frontmatter("# Plain\n"), "# Plain\n");
        assert_eq!(strip_frontmatter("---\nunterminated"), "---\nunterminated");
    }

    #[test]
    fn prompt_lists_context_in_order() {
        let prompt = build_prompt(
            "# Skill",
            &[
                ContextEntry::new("iteration", "000002"),
                ContextEntry::new("test_plan", "plan body"),
            ],
        )
        .expect("render");
        assert!(prompt.starts_with("# Skill\n"));
        let iteration = prompt.find("### iteration").expect("iteration block");
        let plan = prompt.find("### test_plan").expect("plan block");
        assert!(iteration < plan);
        assert!(prompt.contains("## Context"));
        assert!(prompt.contains("plan body"));
    }

    #[test]
    fn prompt_without_context_is_the_skill() {
        let prompt = build_prompt("# Skill\n", &[]).expect("render");
        assert_eq!(prompt.trim_end(), "# Skill");
    }

    #[test]
    fn missing_skill_names_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = FlowPaths::new(temp.path());
        let err = load_skill(&paths, "create-prototype").expect_err("missing");
        assert!(err.to_string().starts_with("Skill 'create-prototype' not found at"));
    }
}
