//! In-memory supervisor for tests

use crate::lifecycle::backend::ProcessSpec;
use crate::lifecycle::supervisor::{ProcessInfo, Supervisor};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::lock::Mutex;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Supervisor that only records what it is asked to do
///
/// Started processes report `online` unless a different start status was
/// scripted with [`MemorySupervisor::set_start_status`].
#[derive(Debug, Default)]
pub struct MemorySupervisor {
    processes: Mutex<IndexMap<String, (ProcessSpec, String)>>,
    start_status: Mutex<Option<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    connected: AtomicBool,
    fail_connect: AtomicBool,
}

impl MemorySupervisor {
    /// Create an empty supervisor
    pub fn new() -> Self {
        Self::default()
    }

    /// Status newly started processes report
    pub async fn set_start_status(&self, status: &str) {
        *self.start_status.lock().await = Some(status.to_string());
    }

    /// Force the status of a known process
    pub async fn set_status(&self, name: &str, status: &str) {
        if let Some(entry) = self.processes.lock().await.get_mut(name) {
            entry.1 = status.to_string();
        }
    }

    /// Make the next connection attempts fail
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Every process started so far, in start order
    pub async fn started(&self) -> Vec<ProcessSpec> {
        self.processes
            .lock()
            .await
            .values()
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnects
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Whether a connection is open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::supervisor("not connected"))
        }
    }

    async fn set_if_known(&self, name: &str, status: &str) -> bool {
        match self.processes.lock().await.get_mut(name) {
            Some(entry) => {
                entry.1 = status.to_string();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Supervisor for MemorySupervisor {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::supervisor("connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, process: &ProcessSpec) -> Result<()> {
        self.ensure_connected()?;
        let status = self
            .start_status
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| "online".to_string());
        self.processes
            .lock()
            .await
            .insert(process.name.clone(), (process.clone(), status));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.set_if_known(name, "stopped").await)
    }

    async fn restart(&self, name: &str) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.set_if_known(name, "online").await)
    }

    async fn list(&self) -> Result<Vec<ProcessInfo>> {
        self.ensure_connected()?;
        Ok(self
            .processes
            .lock()
            .await
            .iter()
            .map(|(name, (_, status))| ProcessInfo {
                name: name.clone(),
                status: status.clone(),
                pid: None,
            })
            .collect())
    }
}
