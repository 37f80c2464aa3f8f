//! Plan documents derived from approved markdown.
//!
//! The test plan and the refactor plan are both reviewed as markdown. On
//! approval every list item becomes one numbered work item, tagged with its
//! nearest heading, and the result is frozen as JSON for the executing step.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub section: Option<String>,
    pub description: String,
}

/// `it_<i>_TP.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlanJson {
    pub cases: Vec<PlanItem>,
}

/// `it_<i>_refactor-prd.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorPlanJson {
    pub items: Vec<PlanItem>,
}

pub fn parse_test_plan(markdown: &str) -> TestPlanJson {
    TestPlanJson {
        cases: parse_plan_items(markdown, "TC"),
    }
}

pub fn parse_refactor_plan(markdown: &str) -> RefactorPlanJson {
    RefactorPlanJson {
        items: parse_plan_items(markdown, "RF"),
    }
}

/// Number list items `<prefix>-001`, `<prefix>-002`, ... in document order.
pub fn parse_plan_items(markdown: &str, prefix: &str) -> Vec<PlanItem> {
    let mut section = None;
    let mut items = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            section = Some(heading.trim_start_matches('#').trim().to_string());
            continue;
        }
        let Some(item) = list_item(trimmed) else {
            continue;
        };
        items.push(PlanItem {
            id: format!("{prefix}-{:03}", items.len() + 1),
            section: section.clone(),
            description: item.to_string(),
        });
    }
    items
}

fn list_item(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| {
            let digits = line.find(|c: char| !c.is_ascii_digit())?;
            (digits > 0).then_some(())?;
            line[digits..].strip_prefix(". ")
        })?;
    let rest = rest
        .strip_prefix("[ ] ")
        .or_else(|| rest.strip_prefix("[x] "))
        .unwrap_or(rest)
        .trim();
    (!rest.is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_items_under_headings() {
        let plan = parse_test_plan("intro\n# A\n- one\n* two\n10. ten\n-not a list\n");
        let ids: Vec<_> = plan.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["TC-001", "TC-002", "TC-003"]);
        assert_eq!(plan.cases[2].description, "ten");
        assert_eq!(plan.cases[0].section.as_deref(), Some("A"));
    }

    #[test]
    fn checkboxes_are_stripped_and_empty_items_skipped() {
        let items = parse_plan_items("- [ ] first\n- [x] second\n- \n", "RF");
        let descriptions: Vec<_> = items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(descriptions, vec!["first", "second"]);
        assert_eq!(items[1].id, "RF-002");
        assert_eq!(items[0].section, None);
    }

    #[test]
    fn refactor_plan_uses_its_own_prefix() {
        let plan = parse_refactor_plan("## Extract\n1. split module\n");
        assert_eq!(plan.items[0].id, "RF-001");
        assert_eq!(plan.items[0].section.as_deref(), Some("Extract"));
    }
}
