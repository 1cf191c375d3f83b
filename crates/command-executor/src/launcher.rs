//! Launcher trait for executing commands

use crate::command::Command;
use crate::error::Result;
use crate::event::{LogSource, ProcessEvent};
use crate::process::{ExitResult, ProcessHandle};
use async_trait::async_trait;
use futures::stream::Stream;

/// A launcher that can execute commands
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The event stream type this launcher produces
    type EventStream: Stream<Item = ProcessEvent> + Send + Unpin;

    /// The process handle type this launcher produces
    type Handle: ProcessHandle;

    /// Launch a command, returning event stream and control handle
    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)>;

    /// Execute a command and wait for it to complete, capturing output
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        self.execute_with(command, |_, _| {}).await
    }

    /// Execute a command, handing every output line to `on_line` as it arrives
    ///
    /// The output is captured as well, so callers that show live output still
    /// get the full text back.
    async fn execute_with<F>(&self, command: Command, mut on_line: F) -> Result<ExitResult>
    where
        F: FnMut(LogSource, &str) + Send,
    {
        use futures::StreamExt;

        let (mut events, mut handle) = self.launch(command).await?;
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut output = String::new();

        while let Some(event) = events.next().await {
            let Some((source, line)) = event.line() else {
                continue;
            };
            on_line(source, line);
            let buffer = match source {
                LogSource::Stdout => &mut stdout,
                LogSource::Stderr => &mut stderr,
            };
            buffer.push_str(line);
            buffer.push('\n');
            output.push_str(line);
            output.push('\n');
        }

        let status = handle.wait().await?;
        Ok(ExitResult {
            status,
            stdout,
            stderr,
            output,
        })
    }
}
