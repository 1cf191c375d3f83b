//! Error types for command execution

use thiserror::Error;

/// Errors raised while launching or controlling a process
#[derive(Error, Debug)]
pub enum Error {
    /// The process could not be spawned or awaited
    #[error("failed to run `{program}`: {reason}")]
    SpawnFailed {
        /// Program that failed
        program: String,
        /// Cause reported by the OS
        reason: String,
    },

    /// A signal could not be delivered
    #[error("failed to send signal {signal} to pid {pid}: {reason}")]
    SignalFailed {
        /// Signal number
        signal: i32,
        /// Target process
        pid: u32,
        /// Cause reported by the OS
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn spawn_failed(program: &std::ffi::OsStr, reason: impl ToString) -> Self {
        Self::SpawnFailed {
            program: program.to_string_lossy().into_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
