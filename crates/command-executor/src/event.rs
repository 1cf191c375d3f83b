//! Events observed while a process runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipe an output line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Something a launched process did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// The process was spawned
    Started {
        /// OS process id
        pid: u32,
        /// Spawn time
        at: DateTime<Utc>,
    },
    /// The process wrote a line, without its trailing newline
    Output {
        /// Pipe the line came from
        source: LogSource,
        /// Line text
        line: String,
        /// Time the line was read
        at: DateTime<Utc>,
    },
}

impl ProcessEvent {
    pub(crate) fn started(pid: u32) -> Self {
        ProcessEvent::Started { pid, at: Utc::now() }
    }

    pub(crate) fn output(source: LogSource, line: String) -> Self {
        ProcessEvent::Output {
            source,
            line,
            at: Utc::now(),
        }
    }

    /// The output line carried by this event, if any
    pub fn line(&self) -> Option<(LogSource, &str)> {
        match self {
            ProcessEvent::Output { source, line, .. } => Some((*source, line)),
            ProcessEvent::Started { .. } => None,
        }
    }
}
