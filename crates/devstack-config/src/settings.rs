//! Project-wide settings
//!
//! Settings start from built-in defaults, are overlaid by an optional
//! `devstack.yaml` at the project root, and finally by `DEVSTACK_<FIELD>`
//! environment variables (for example `DEVSTACK_POLL_INTERVAL_MS=250`).

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the optional settings file at the project root
pub const SETTINGS_FILE: &str = "devstack.yaml";

/// Project settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// File name of module descriptors
    pub descriptor_file: String,
    /// File name of companion hook files
    pub hooks_file: String,
    /// Directory, relative to the root, holding per-module state
    pub state_dir: PathBuf,
    /// Compose file handed to the container runtime, relative to the root
    pub compose_file: PathBuf,
    /// Compose project name; defaults to the root directory name
    pub compose_project: Option<String>,
    /// Compose invocation, split on whitespace
    pub compose_program: String,
    /// Process supervisor executable
    pub supervisor_program: String,
    /// Health check utility, split on whitespace
    pub health_check_command: String,
    /// Health check timeout used when a service declares none
    pub health_check_timeout_ms: u64,
    /// Interval of the wait-until-started/stopped loops
    pub poll_interval_ms: u64,
    /// Shell used to run string runnables
    pub shell: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            descriptor_file: "module.yaml".to_string(),
            hooks_file: "module.hooks.yaml".to_string(),
            state_dir: PathBuf::from(".devstack"),
            compose_file: PathBuf::from(".devstack/docker-compose.yml"),
            compose_project: None,
            compose_program: "docker compose".to_string(),
            supervisor_program: "pm2".to_string(),
            health_check_command: "npx --yes wait-on".to_string(),
            health_check_timeout_ms: 60_000,
            poll_interval_ms: 1_000,
            shell: "sh".to_string(),
        }
    }
}

impl Settings {
    /// Load settings for the project at `root`, applying environment overrides
    pub fn load(root: &Path) -> Result<Self> {
        let mut settings = Self::load_file(root)?;
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Load `devstack.yaml` from `root`, or defaults when it does not exist
    pub fn load_file(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Apply `DEVSTACK_<FIELD>` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("DEVSTACK_{}", field.to_uppercase()));

        if let Some(v) = var("descriptor_file") {
            self.descriptor_file = v;
        }
        if let Some(v) = var("hooks_file") {
            self.hooks_file = v;
        }
        if let Some(v) = var("state_dir") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = var("compose_file") {
            self.compose_file = PathBuf::from(v);
        }
        if let Some(v) = var("compose_project") {
            self.compose_project = Some(v);
        }
        if let Some(v) = var("compose_program") {
            self.compose_program = v;
        }
        if let Some(v) = var("supervisor_program") {
            self.supervisor_program = v;
        }
        if let Some(v) = var("health_check_command") {
            self.health_check_command = v;
        }
        if let Some(v) = var("health_check_timeout_ms") {
            self.health_check_timeout_ms = parse_millis("health_check_timeout_ms", &v)?;
        }
        if let Some(v) = var("poll_interval_ms") {
            self.poll_interval_ms = parse_millis("poll_interval_ms", &v)?;
        }
        if let Some(v) = var("shell") {
            self.shell = v;
        }

        Ok(())
    }

    /// Compose project name for the project at `root`
    pub fn compose_project_name(&self, root: &Path) -> String {
        self.compose_project.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "devstack".to_string())
        })
    }

    /// Interval of the wait loops
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_millis(field: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        ConfigError::Validation(format!(
            "DEVSTACK_{} must be a number of milliseconds, got '{}'",
            field.to_uppercase(),
            value
        ))
    })
}
