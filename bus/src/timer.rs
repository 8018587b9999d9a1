//! Timer service for device housekeeping
//!
//! Timers run on the tokio runtime. Cancellation comes in two flavours:
//! `cancel` only signals, while `cancel_sync` also waits until an invocation
//! that is already running has returned, so nothing the callback publishes
//! can race with the caller's teardown.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a scheduled callback. Dropping it cancels pending invocations.
#[derive(Debug)]
pub struct Timer {
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Runs `callback` once after `delay`
    pub fn once<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx.changed() => return,
            }
            if *cancel_rx.borrow() {
                return;
            }
            callback().await;
        });
        Self {
            cancel_tx,
            task: Some(task),
        }
    }

    /// Runs `callback` every `period`, measured from the end of the previous
    /// invocation, until cancelled
    pub fn repeating<F, Fut>(period: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = cancel_rx.changed() => break,
                }
                if *cancel_rx.borrow() {
                    break;
                }
                callback().await;
            }
        });
        Self {
            cancel_tx,
            task: Some(task),
        }
    }

    /// Prevents further invocations without waiting for a running one
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Cancels and waits until no invocation is in flight.
    ///
    /// Must not be awaited from inside this timer's own callback.
    pub async fn cancel_sync(mut self) {
        self.cancel_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Timer callback panicked: {}", e);
                }
            }
        }
    }

    /// True once the timer will never fire again
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel_tx.send_replace(true);
    }
}

/// Runs `callback` on the timer service as soon as possible, detached from
/// the caller. Used for deferred state transitions that must not run inline.
pub fn defer<Fut>(callback: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(callback);
}
