use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::report::Notifier;

/// A running periodic check.  The first check fires immediately; each later
/// one fires a full `period` after the previous check finished.  Checks run
/// inline on the loop task, so they never overlap and a slow check never
/// triggers a burst of catch-up checks.
pub struct PollLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollLoop {
    pub fn spawn<F, Fut>(
        label: &'static str,
        period: Duration,
        notifier: Arc<Notifier>,
        mut check: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let started = tokio::time::Instant::now();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        notifier.info(format!("{label} check cancelled."));
                        break;
                    }
                    _ = check() => {
                        tracing::debug!(monitor = label, elapsed = ?started.elapsed(), "check finished");
                    }
                }
                ticker.reset();
            }
            tracing::debug!(monitor = label, "poll loop exited");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Signals the loop to stop.  Any in-flight check is dropped at its next
    /// suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled when this loop stops, for work run outside the loop
    /// that should stop with it.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels and waits for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("poll loop panicked: {e}");
                }
            }
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
