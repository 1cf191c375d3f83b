//! Running processes and how they ended

use crate::error::Result;
use async_trait::async_trait;

/// Control over a launched process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if the process has one
    fn pid(&self) -> Option<u32>;

    /// Wait until the process exits
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Ask the process to exit (SIGTERM on Unix)
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process outright
    async fn kill(&mut self) -> Result<()>;
}

/// How a process ended
///
/// Exactly one of `code` and `signal` is set for a process that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code of a normal exit
    pub code: Option<i32>,
    /// Signal that killed the process
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Killed by a signal rather than exiting
    pub fn terminated_by_signal(&self) -> bool {
        self.signal.is_some()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Exit status of a finished command together with its captured output
#[derive(Debug, Clone)]
pub struct ExitResult {
    /// How the process exited
    pub status: ExitStatus,
    /// Captured stdout, one line per `\n`
    pub stdout: String,
    /// Captured stderr, one line per `\n`
    pub stderr: String,
    /// Stdout and stderr interleaved in arrival order
    pub output: String,
}

impl ExitResult {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.status.success()
    }
}
