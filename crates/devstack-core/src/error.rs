//! Error type shared by every engine component

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced module, service, task or pipeline does not exist
    NotFound,
    /// The dependency graph is inconsistent or a descriptor failed to load
    Resolution,
    /// A runnable has an unsupported shape or failed in-process
    Runnable,
    /// An external process exited non-zero or was killed by a signal
    Spawn,
    /// The process supervisor could not be reached or rejected a call
    Supervisor,
    /// A module state file could not be read or written
    State,
    /// Project settings or literal values are invalid
    Config,
    /// The operation was cancelled by an interrupt
    Interrupted,
    /// Any other I/O failure
    Io,
}

/// Error types for discovery and orchestration operations
#[derive(Error, Debug)]
pub enum Error {
    /// A lookup by name failed
    #[error("{what} not found: {key}")]
    NotFound {
        /// What was looked up (module, service, task, ...)
        what: &'static str,
        /// The key that was looked up
        key: String,
    },

    /// Dependency graph inconsistency
    #[error("resolution error: {message}")]
    Resolution {
        /// Description of the inconsistency
        message: String,
    },

    /// A module descriptor or hook file could not be loaded
    #[error("failed to load {}: {source}", .path.display())]
    Descriptor {
        /// The offending file
        path: PathBuf,
        /// Why loading failed
        #[source]
        source: devstack_config::ConfigError,
    },

    /// Unsupported or failing runnable
    #[error("runnable error: {message}")]
    Runnable {
        /// Description of the failure
        message: String,
    },

    /// An external command failed
    #[error("command `{command}` failed with {}{}", exit_text(.code, .signal), output_text(.output))]
    Spawn {
        /// The command line that failed
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Terminating signal, if any
        signal: Option<i32>,
        /// Captured output (stderr for shell runnables)
        output: String,
    },

    /// Process supervisor failure
    #[error("supervisor error: {message}")]
    Supervisor {
        /// Description of the failure
        message: String,
    },

    /// Module state could not be read or persisted
    #[error("state file {}: {source}", .path.display())]
    State {
        /// The state file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Settings or literal value errors
    #[error("configuration error: {0}")]
    Config(#[from] devstack_config::ConfigError),

    /// Failure to launch a process at all
    #[error("command execution error: {0}")]
    CommandExecutor(#[from] command_executor::Error),

    /// Cancelled by an interrupt signal
    #[error("interrupted")]
    Interrupted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_text(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown exit status".to_string(),
    }
}

fn output_text(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Resolution { .. } | Error::Descriptor { .. } => ErrorKind::Resolution,
            Error::Runnable { .. } => ErrorKind::Runnable,
            Error::Spawn { .. } | Error::CommandExecutor(_) => ErrorKind::Spawn,
            Error::Supervisor { .. } => ErrorKind::Supervisor,
            Error::State { .. } => ErrorKind::State,
            Error::Config(_) => ErrorKind::Config,
            Error::Interrupted => ErrorKind::Interrupted,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            key: key.into(),
        }
    }

    pub(crate) fn resolution(message: impl Into<String>) -> Self {
        Error::Resolution {
            message: message.into(),
        }
    }

    pub(crate) fn runnable(message: impl Into<String>) -> Self {
        Error::Runnable {
            message: message.into(),
        }
    }

    pub(crate) fn supervisor(message: impl Into<String>) -> Self {
        Error::Supervisor {
            message: message.into(),
        }
    }

    pub(crate) fn spawn(
        command: impl Into<String>,
        status: command_executor::ExitStatus,
        output: impl Into<String>,
    ) -> Self {
        Error::Spawn {
            command: command.into(),
            code: status.code,
            signal: status.signal,
            output: output.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use command_executor::ExitStatus;

    #[test]
    fn test_not_found_names_key() {
        let err = Error::not_found("service", "ghost");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "service not found: ghost");
    }

    #[test]
    fn test_spawn_message_carries_exit_and_output() {
        let err = Error::spawn(
            "npm run build",
            ExitStatus {
                code: Some(2),
                signal: None,
            },
            "missing script: build\n",
        );
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert_eq!(
            err.to_string(),
            "command `npm run build` failed with exit code 2: missing script: build"
        );

        let killed = Error::spawn(
            "sleep 30",
            ExitStatus {
                code: None,
                signal: Some(2),
            },
            "",
        );
        assert_eq!(killed.to_string(), "command `sleep 30` failed with signal 2");
    }

    #[test]
    fn test_descriptor_errors_are_resolution_kind() {
        let err = Error::Descriptor {
            path: PathBuf::from("/p/api/module.yaml"),
            source: devstack_config::ConfigError::Validation("bad".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(err.to_string().contains("/p/api/module.yaml"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
