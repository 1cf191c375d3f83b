//! Persisted per-module state
//!
//! Each module owns `<state_dir>/<module>/state.json`. The file is read once
//! at discovery and rewritten after every successful mutation. Writes go
//! through a temporary file in the same directory that is renamed over the
//! previous state, so a torn write never corrupts it.

use crate::{Error, Result};
use devstack_config::StateFlag;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const STATE_FILE: &str = "state.json";

/// Completed idempotent operations of one module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleState {
    /// The module has been built
    pub built: bool,
    /// The module has been configured
    pub configured: bool,
    /// Applied migration ids, in application order
    pub migrations: IndexSet<String>,
    /// Completed run-once tasks, in completion order
    pub tasks: IndexSet<String>,
    /// Return values of recorded tasks, read back when they are skipped
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, serde_json::Value>,
    /// Fields written by other tools, preserved on save
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModuleState {
    /// Whether `flag` is set
    pub fn flag(&self, flag: StateFlag) -> bool {
        match flag {
            StateFlag::Built => self.built,
            StateFlag::Configured => self.configured,
        }
    }

    /// Set `flag`
    pub fn set_flag(&mut self, flag: StateFlag, value: bool) {
        match flag {
            StateFlag::Built => self.built = value,
            StateFlag::Configured => self.configured = value,
        }
    }
}

/// Declared migration ids, sorted, minus the applied ones
pub fn not_applied_migrations<'a>(
    declared: impl IntoIterator<Item = &'a str>,
    state: &ModuleState,
) -> Vec<String> {
    let mut pending: Vec<String> = declared
        .into_iter()
        .filter(|id| !state.migrations.contains(*id))
        .map(str::to_string)
        .collect();
    pending.sort();
    pending.dedup();
    pending
}

/// Loads, holds and persists the state of every module
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    states: HashMap<String, ModuleState>,
}

impl StateStore {
    /// Create a store rooted at `dir` (usually `<root>/.devstack`)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            states: HashMap::new(),
        }
    }

    /// State file of `module`
    pub fn path(&self, module: &str) -> PathBuf {
        self.dir.join(module).join(STATE_FILE)
    }

    /// Create the module's state directory and an empty state file if missing
    pub fn ensure(&self, module: &str) -> Result<()> {
        let path = self.path(module);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| state_error(&path, source))?;
        }
        debug!("Creating state file {}", path.display());
        std::fs::write(&path, "").map_err(|source| state_error(&path, source))
    }

    /// Read the module's state from disk and keep it in the store
    ///
    /// A missing or empty file yields the default state.
    pub fn load(&mut self, module: &str) -> Result<ModuleState> {
        let path = self.path(module);
        let state = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => ModuleState::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                state_error(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ModuleState::default(),
            Err(source) => return Err(state_error(&path, source)),
        };
        self.states.insert(module.to_string(), state.clone());
        Ok(state)
    }

    /// Current state of `module`
    pub fn get(&self, module: &str) -> ModuleState {
        self.states.get(module).cloned().unwrap_or_default()
    }

    /// Mutate the module's state and persist it
    pub fn update<F>(&mut self, module: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ModuleState),
    {
        mutate(self.states.entry(module.to_string()).or_default());
        self.save(module)
    }

    /// Clear every flag and applied set of `module` and persist it
    pub fn reset(&mut self, module: &str) -> Result<()> {
        self.update(module, |state| {
            let extra = std::mem::take(&mut state.extra);
            *state = ModuleState {
                extra,
                ..ModuleState::default()
            };
        })
    }

    /// Write the module's state as pretty JSON, atomically
    pub fn save(&self, module: &str) -> Result<()> {
        let path = self.path(module);
        let state = self.get(module);
        let dir = path.parent().unwrap_or(&self.dir).to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| state_error(&path, source))?;

        let mut json = serde_json::to_string_pretty(&state)
            .map_err(|e| state_error(&path, std::io::Error::other(e)))?;
        json.push('\n');

        let mut file = NamedTempFile::new_in(&dir).map_err(|source| state_error(&path, source))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|source| state_error(&path, source))?;
        file.persist(&path)
            .map_err(|e| state_error(&path, e.error))?;

        debug!("Saved state of {}", module);
        Ok(())
    }
}

fn state_error(path: &Path, source: std::io::Error) -> Error {
    Error::State {
        path: path.to_path_buf(),
        source,
    }
}
