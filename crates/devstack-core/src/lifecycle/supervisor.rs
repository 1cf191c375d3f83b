//! Process supervisor client seam

use crate::Result;
use crate::lifecycle::backend::ProcessSpec;
use async_trait::async_trait;
use futures::lock::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A process as reported by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Supervisor process name
    pub name: String,
    /// Native status string
    pub status: String,
    /// OS process id, when running
    pub pid: Option<u32>,
}

/// An external process supervisor
///
/// Started processes outlive the orchestrator; every call names the
/// process by its supervisor name.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Establish the control connection
    async fn connect(&self) -> Result<()>;

    /// Tear down the control connection
    async fn disconnect(&self) -> Result<()>;

    /// Start a process
    async fn start(&self, process: &ProcessSpec) -> Result<()>;

    /// Stop a process; `false` when the supervisor does not know it
    async fn stop(&self, name: &str) -> Result<bool>;

    /// Restart a process; `false` when the supervisor does not know it
    async fn restart(&self, name: &str) -> Result<bool>;

    /// Every known process
    async fn list(&self) -> Result<Vec<ProcessInfo>>;
}

/// Shared, lazily connected supervisor
///
/// The first call connects; [`SupervisorHandle::shutdown`] disconnects, and
/// the next call after that connects again.
pub struct SupervisorHandle {
    supervisor: Arc<dyn Supervisor>,
    connected: Mutex<bool>,
}

impl SupervisorHandle {
    /// Wrap a supervisor
    pub fn new(supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            supervisor,
            connected: Mutex::new(false),
        }
    }

    /// The supervisor, connected
    pub async fn get(&self) -> Result<&dyn Supervisor> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            debug!("Connecting to process supervisor");
            self.supervisor.connect().await?;
            *connected = true;
        }
        Ok(self.supervisor.as_ref())
    }

    /// Whether a connection is currently established
    pub async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }

    /// Disconnect if connected
    pub async fn shutdown(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            debug!("Disconnecting from process supervisor");
            *connected = false;
            self.supervisor.disconnect().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle").finish_non_exhaustive()
    }
}
