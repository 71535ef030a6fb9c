//! Deadline race for a single hook or test body
//!
//! Synchronous bodies run inline and always settle. Everything else runs as
//! its own tokio task raced against the deadline and the run's cancellation
//! signal.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{panic_error, Body, Invocation, TestError};
use crate::utils::Timer;

/// How a raced unit of work ended
#[derive(Debug)]
pub enum Settled {
    Success {
        elapsed: Duration,
    },
    Failure {
        error: TestError,
        elapsed: Duration,
    },
    /// Deadline reached first. The task keeps running detached; its result
    /// is dropped.
    Timeout {
        elapsed: Duration,
        timeout: Duration,
    },
    /// Run cancelled while the unit was in flight. The task was aborted.
    Cancelled,
}

impl Settled {
    pub fn is_success(&self) -> bool {
        matches!(self, Settled::Success { .. })
    }
}

/// Receiving side of a run's cancellation flag
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Sender/signal pair, not yet cancelled
    pub fn channel() -> (watch::Sender<bool>, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelSignal::new(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set. Never resolves if the sender is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Run `body` against a deadline of `timeout`
pub async fn race(label: &str, body: &Body, timeout: Duration, cancel: &CancelSignal) -> Settled {
    let timer = Timer::start(label);

    let pending = match body.start() {
        Invocation::Ready(Ok(())) => {
            return Settled::Success {
                elapsed: timer.stop(),
            }
        }
        Invocation::Ready(Err(error)) => {
            return Settled::Failure {
                error: error.into(),
                elapsed: timer.stop(),
            }
        }
        Invocation::Pending(pending) => pending,
    };

    let mut task = tokio::spawn(pending);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            task.abort();
            debug!("{}: aborted by cancellation", label);
            Settled::Cancelled
        }
        joined = &mut task => {
            let elapsed = timer.stop();
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(panic_error(e.into_panic())),
                Err(e) => Err(anyhow::anyhow!("task ended unexpectedly: {e}")),
            };
            match result {
                Ok(()) => Settled::Success { elapsed },
                Err(error) => Settled::Failure {
                    error: error.into(),
                    elapsed,
                },
            }
        }
        _ = tokio::time::sleep(timeout) => {
            debug!("{}: exceeded {}ms, detaching", label, timeout.as_millis());
            Settled::Timeout {
                elapsed: timer.elapsed(),
                timeout,
            }
        }
    }
}
