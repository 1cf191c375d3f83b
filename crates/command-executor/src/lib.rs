//! Runtime-agnostic command execution library
//!
//! This crate provides the process plumbing used by devstack: a cloneable
//! [`Command`] builder, a [`Launcher`] that spawns commands and exposes their
//! output as a stream of [`ProcessEvent`]s, and helpers to run a command to
//! completion while capturing stdout and stderr.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod event;
pub mod launcher;
pub mod local;
pub mod process;
pub mod shell;

pub use command::Command;
pub use error::{Error, Result};
pub use event::{LogSource, ProcessEvent};
pub use launcher::Launcher;
pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
pub use process::{ExitResult, ExitStatus, ProcessHandle};
