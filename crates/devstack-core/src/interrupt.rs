//! Signal-driven cancellation
//!
//! An interrupt races the running operation. When it fires first the
//! operation is dropped (killing any child it was waiting on), the
//! supervisor connection is shut down, and [`Error::Interrupted`] is
//! returned.

use crate::lifecycle::LifecycleManager;
use crate::{Error, Result};
use async_channel::{Receiver, Sender};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::future::Future;
use tracing::{debug, warn};

/// Source of interrupt notifications
#[derive(Debug, Clone)]
pub struct Interrupt {
    sender: Sender<i32>,
    receiver: Receiver<i32>,
}

impl Interrupt {
    /// Forward SIGINT and SIGTERM to this interrupt
    pub fn install() -> Result<Self> {
        let interrupt = Self::manual();
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let sender = interrupt.sender.clone();

        std::thread::Builder::new()
            .name("devstack-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    debug!("Received signal {}", signal);
                    if sender.send_blocking(signal).is_err() {
                        break;
                    }
                }
            })?;

        Ok(interrupt)
    }

    /// Interrupt that only fires through [`Interrupt::trigger`]
    pub fn manual() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self { sender, receiver }
    }

    /// Fire the interrupt as if SIGINT had been received
    pub fn trigger(&self) {
        let _ = self.sender.try_send(SIGINT);
    }

    /// Wait for the next interrupt and return its signal number
    pub async fn wait(&self) -> i32 {
        match self.receiver.recv().await {
            Ok(signal) => signal,
            // The sender lives in `self`, so the channel never closes.
            Err(_) => futures::future::pending().await,
        }
    }
}

/// Run `operation` unless `interrupt` fires first
///
/// On interrupt the operation is dropped, `lifecycle` is shut down, and
/// [`Error::Interrupted`] is returned.
pub async fn run_until_interrupted<T, F>(
    interrupt: &Interrupt,
    lifecycle: &LifecycleManager,
    operation: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    enum Outcome<T> {
        Finished(Result<T>),
        Interrupted(i32),
    }

    let outcome = smol::future::or(async { Outcome::Finished(operation.await) }, async {
        Outcome::Interrupted(interrupt.wait().await)
    })
    .await;

    match outcome {
        Outcome::Finished(result) => result,
        Outcome::Interrupted(signal) => {
            warn!("Interrupted by signal {}, shutting down", signal);
            lifecycle.shutdown().await?;
            Err(Error::Interrupted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::MemorySupervisor;
    use devstack_config::Settings;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_finished_operation_passes_through() {
        let lifecycle = LifecycleManager::with_supervisor(
            Path::new("/work"),
            &Settings::default(),
            Arc::new(MemorySupervisor::new()),
        );
        let interrupt = Interrupt::manual();

        let value = run_until_interrupted(&interrupt, &lifecycle, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[smol_potat::test]
    async fn test_interrupt_cancels_and_shuts_down() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = LifecycleManager::with_supervisor(
            Path::new("/work"),
            &Settings::default(),
            supervisor.clone(),
        );
        lifecycle.get_process_list().await.unwrap();
        let interrupt = Interrupt::manual();
        interrupt.trigger();

        let result: Result<()> = run_until_interrupted(&interrupt, &lifecycle, async {
            smol::Timer::after(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(supervisor.disconnect_count(), 1);
    }
}
