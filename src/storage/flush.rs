//! Background flushing of dirty stores to their snapshot files.
//!
//! Flushing never runs on the request path: [`FlushScheduler`] wakes on a
//! fixed interval and flushes every dirty store on the blocking pool.
//! Failures are logged and retried on the next tick.

use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// A store whose in-memory state can be written to durable storage.
pub trait Flushable: Send + Sync {
    /// Store name for logs.
    fn name(&self) -> &'static str;

    /// Flushes if there are unflushed writes and `min_interval` has passed
    /// since the last flush. Returns `true` if a flush happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn flush_if_dirty(&self, min_interval: Duration) -> Result<bool>;

    /// Flushes unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn flush_now(&self) -> Result<()>;
}

/// Flushes every target now, logging failures.
///
/// Returns the number of stores that failed.
pub fn flush_all_now(targets: &[Arc<dyn Flushable>]) -> usize {
    targets
        .iter()
        .filter(|target| match target.flush_now() {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(store = target.name(), error = %e, "Final flush failed");
                true
            },
        })
        .count()
}

fn flush_dirty(targets: &[Arc<dyn Flushable>], min_interval: Duration) {
    for target in targets {
        match target.flush_if_dirty(min_interval) {
            Ok(true) => tracing::trace!(store = target.name(), "Periodic flush complete"),
            Ok(false) => {},
            Err(e) => tracing::warn!(store = target.name(), error = %e, "Periodic flush failed"),
        }
    }
}

/// Handle to the periodic flush task.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) stops
/// the loop at its next wakeup but skips the final flush.
pub struct FlushScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    targets: Vec<Arc<dyn Flushable>>,
}

impl FlushScheduler {
    /// Spawns the flush loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        targets: Vec<Arc<dyn Flushable>>,
        period: Duration,
        min_interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let loop_targets = targets.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                period_secs = period.as_secs(),
                stores = loop_targets.len(),
                "Flush scheduler started"
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let targets = loop_targets.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            flush_dirty(&targets, min_interval);
                        })
                        .await;
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Flush task panicked");
                        }
                    }
                }
            }

            tracing::info!("Flush scheduler stopped");
        });

        Self {
            shutdown_tx,
            handle,
            targets,
        }
    }

    /// Stops the loop and flushes every store one last time.
    ///
    /// Returns the number of stores whose final flush failed.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Flush scheduler task failed");
        }

        let targets = self.targets;
        tokio::task::spawn_blocking(move || flush_all_now(&targets))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Final flush panicked");
                1
            })
    }
}
