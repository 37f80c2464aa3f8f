//! Orchestration for `flow start`: begin the first or the next iteration.
//!
//! Starting a later iteration archives every `it_<current>_*` artifact under
//! `.agents/flow/archived/<current>/`, records the archive in `history` and
//! resets every step to `pending`.

use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::io::config::{FlowConfig, write_config};
use crate::io::console::Console;
use crate::io::paths::FlowPaths;
use crate::io::state_store::{FileStateStore, StateStore};
use crate::state::{FIRST_ITERATION, HistoryEntry, initial_state, now_rfc3339};

/// Outcome of `flow start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub iteration: String,
    /// Number of artifacts moved into the archive (zero for the first iteration).
    pub archived: usize,
}

#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn start_iteration(paths: &FlowPaths, console: &dyn Console) -> Result<StartOutcome> {
    fs::create_dir_all(&paths.flow_dir)
        .with_context(|| format!("create directory {}", paths.flow_dir.display()))?;
    if !paths.config_path.exists() {
        debug!("writing default config");
        write_config(&paths.config_path, &FlowConfig::default())?;
    }

    let store = FileStateStore::new(&paths.state_path);
    if !store.exists() {
        let state = initial_state(FIRST_ITERATION);
        store.write(&state)?;
        info!(iteration = FIRST_ITERATION, "first iteration started");
        console.out(&format!("Iteration {FIRST_ITERATION} started (phase: define)"));
        return Ok(StartOutcome {
            iteration: FIRST_ITERATION.to_string(),
            archived: 0,
        });
    }

    let previous = store.read()?;
    let current = previous.current_iteration.clone();
    let next = next_iteration(&current)?;

    let archive_dir = paths.archived_dir.join(&current);
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("create directory {}", archive_dir.display()))?;
    let prefix = format!("it_{current}_");
    let mut names = Vec::new();
    for entry in fs::read_dir(&paths.flow_dir)
        .with_context(|| format!("read directory {}", paths.flow_dir.display()))?
    {
        let entry = entry.context("read directory entry")?;
        if !entry.file_type().context("stat entry")?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) {
            names.push(name);
        }
    }
    names.sort();
    for name in &names {
        let from = paths.flow_dir.join(name);
        let to = archive_dir.join(name);
        fs::rename(&from, &to)
            .with_context(|| format!("archive {} to {}", from.display(), to.display()))?;
    }

    let archived_path = paths.relative(&archive_dir);
    let mut state = initial_state(&next);
    state.guardrail_mode = previous.guardrail_mode;
    state.history = previous.history;
    state.history.push(HistoryEntry {
        iteration: current.clone(),
        archived_at: now_rfc3339(),
        archived_path: archived_path.clone(),
    });
    state.touch("flow:start");
    store.write(&state)?;

    info!(from = %current, to = %next, archived = names.len(), "iteration advanced");
    console.out(&format!(
        "Archived {} file(s) to {archived_path}",
        names.len()
    ));
    console.out(&format!("Iteration {next} started (phase: define)"));
    Ok(StartOutcome {
        iteration: next,
        archived: names.len(),
    })
}

/// `000041` -> `000042`.
pub fn next_iteration(current: &str) -> Result<String> {
    let number: u32 = current
        .parse()
        .with_context(|| format!("invalid iteration '{current}'"))?;
    let next = number + 1;
    if next > 999_999 {
        return Err(anyhow!("iteration counter exhausted after '{current}'"));
    }
    Ok(format!("{next:06}"))
}
