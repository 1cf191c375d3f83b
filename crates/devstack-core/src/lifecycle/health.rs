//! Health checks through an external wait utility

use crate::{Error, Result};
use command_executor::{Command, Launcher, LocalLauncher};
use devstack_config::HealthCheckSpec;
use tracing::{debug, info};

/// Waits for a service's health-check resources
///
/// The utility (by default `npx --yes wait-on`) is invoked as
/// `<command> -t <timeout-ms> <resources...>` and owns its own polling and
/// timeout.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    command: Vec<String>,
    default_timeout_ms: u64,
    launcher: LocalLauncher,
}

impl HealthChecker {
    /// Create a checker from a whitespace-separated command
    pub fn new(command: &str, default_timeout_ms: u64) -> Self {
        Self {
            command: command.split_whitespace().map(str::to_string).collect(),
            default_timeout_ms,
            launcher: LocalLauncher,
        }
    }

    /// Command that checks `spec`, or `None` when there is nothing to check
    pub fn command_for(&self, spec: &HealthCheckSpec) -> Option<Command> {
        let (program, args) = self.command.split_first()?;
        if spec.resources.is_empty() {
            return None;
        }

        let timeout = spec.timeout.unwrap_or(self.default_timeout_ms);
        let mut command = Command::new(program);
        command
            .args(args)
            .arg("-t")
            .arg(timeout.to_string())
            .args(&spec.resources);
        Some(command)
    }

    /// Block until every resource is reachable
    pub async fn wait_until_healthy(&self, spec: &HealthCheckSpec) -> Result<()> {
        let Some(command) = self.command_for(spec) else {
            debug!("No health check resources to wait for");
            return Ok(());
        };

        info!("Waiting for {}", spec.resources.join(", "));
        let display = command.to_string();
        let result = self.launcher.execute(command).await?;
        if !result.success() {
            return Err(Error::spawn(display, result.status, result.output));
        }

        debug!("Health check passed");
        Ok(())
    }
}
