//! Launching processes on the local machine

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{LogSource, ProcessEvent};
use crate::launcher::Launcher;
use crate::process::{ExitStatus, ProcessHandle};

/// Stream of events of a locally launched process
///
/// Yields [`ProcessEvent::Started`] first, then output lines from both pipes
/// as they arrive, and ends once both pipes are closed.
pub type ProcessEventStream = BoxStream<'static, ProcessEvent>;

/// Spawns processes as children of the current one
///
/// Stdin is closed; stdout and stderr are piped and read line by line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// Control handle of a locally launched process
///
/// Dropping the handle before [`ProcessHandle::wait`] returned kills the
/// child, so an abandoned operation never leaves it running.
pub struct LocalProcessHandle {
    child: Child,
    reaped: bool,
}

#[async_trait]
impl Launcher for LocalLauncher {
    type EventStream = ProcessEventStream;
    type Handle = LocalProcessHandle;

    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)> {
        debug!("Launching: {}", command);

        let mut child = command
            .to_async()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::spawn_failed(command.program(), e))?;

        let stdout = child.stdout.take().map(|pipe| lines(pipe, LogSource::Stdout));
        let stderr = child.stderr.take().map(|pipe| lines(pipe, LogSource::Stderr));
        let output = stream::select(
            stream::iter(stdout).flatten(),
            stream::iter(stderr).flatten(),
        );
        let events = stream::once(futures::future::ready(ProcessEvent::started(child.id())))
            .chain(output)
            .boxed();

        Ok((
            events,
            LocalProcessHandle {
                child,
                reaped: false,
            },
        ))
    }
}

/// Lines of `pipe` as output events; a read error ends the stream
fn lines<R>(pipe: R, source: LogSource) -> BoxStream<'static, ProcessEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    BufReader::new(pipe)
        .lines()
        .take_while(|line| futures::future::ready(line.is_ok()))
        .filter_map(move |line| {
            futures::future::ready(line.ok().map(|line| ProcessEvent::output(source, line)))
        })
        .boxed()
}

impl LocalProcessHandle {
    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        let pid = self.child.id();
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal).map_err(|e| {
            Error::SignalFailed {
                signal: signal as i32,
                pid,
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await?;
        self.reaped = true;

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Ok(ExitStatus {
            code: status.code(),
            signal,
        })
    }

    async fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        return self.signal(nix::sys::signal::Signal::SIGTERM);

        #[cfg(not(unix))]
        return self.kill().await;
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().map_err(Error::from)
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
        }
    }
}
