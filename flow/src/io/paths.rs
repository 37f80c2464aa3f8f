//! Canonical paths within `.agents/` for a project root.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FlowPaths {
    pub root: PathBuf,
    pub agents_dir: PathBuf,
    pub flow_dir: PathBuf,
    pub archived_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub state_path: PathBuf,
    pub config_path: PathBuf,
}

impl FlowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let agents_dir = root.join(".agents");
        let flow_dir = agents_dir.join("flow");
        Self {
            root: root.clone(),
            agents_dir: agents_dir.clone(),
            flow_dir: flow_dir.clone(),
            archived_dir: flow_dir.join("archived"),
            skills_dir: agents_dir.join("skills"),
            state_path: agents_dir.join("state.json"),
            config_path: agents_dir.join("flow.toml"),
        }
    }

    /// Issue ledger for an iteration: `.agents/flow/it_<iteration>_ISSUES.json`.
    pub fn issues_path(&self, iteration: &str) -> PathBuf {
        self.flow_dir.join(format!("it_{iteration}_ISSUES.json"))
    }

    pub fn skill_path(&self, skill: &str) -> PathBuf {
        self.skills_dir.join(skill).join("SKILL.md")
    }

    /// Resolve a recorded artifact reference.
    ///
    /// References starting with `.agents/` are root-relative; bare names live
    /// in the flow directory.
    pub fn artifact_path(&self, file: &str) -> PathBuf {
        if Path::new(file).starts_with(".agents") {
            self.root.join(file)
        } else {
            self.flow_dir.join(file)
        }
    }

    /// Display form of `path` relative to the project root.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}
