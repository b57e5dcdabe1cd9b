//! Polling worker pool for queued notifications.
//!
//! Each worker drains eligible notifications from the store, then sleeps until
//! the poll interval elapses or an enqueue wakes it. Shutdown cancels the
//! waits and joins the workers; an attempt already in progress finishes
//! first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{DEFAULT_POLL_INTERVAL, PushDispatcher};
use super::listener::EnqueueListener;
use crate::model::Notification;

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Fallback poll interval when no enqueue signal arrives.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Wakes one idle worker per enqueued notification.
struct Waker {
    notify: Arc<Notify>,
}

impl EnqueueListener for Waker {
    fn on_enqueued(&self, _notification: &Notification) {
        self.notify.notify_one();
    }
}

pub struct PollingWorkerPool {
    config: WorkerPoolConfig,
    dispatcher: Arc<PushDispatcher>,
    notify: Arc<Notify>,
    cancellation_token: CancellationToken,
    started: AtomicBool,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl PollingWorkerPool {
    pub fn new(dispatcher: Arc<PushDispatcher>, config: WorkerPoolConfig) -> Self {
        Self::with_cancellation_token(dispatcher, config, CancellationToken::new())
    }

    /// Pool stopped when `cancellation_token` is cancelled.
    pub fn with_cancellation_token(
        dispatcher: Arc<PushDispatcher>,
        config: WorkerPoolConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            dispatcher,
            notify: Arc::new(Notify::new()),
            cancellation_token,
            started: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Listener to register with the enqueue path.
    pub fn enqueue_listener(&self) -> Arc<dyn EnqueueListener> {
        Arc::new(Waker {
            notify: self.notify.clone(),
        })
    }

    /// Wake one idle worker.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancellation_token.is_cancelled()
    }

    /// Spawn the workers. Starting twice, or after shutdown, does nothing.
    pub fn start(&self) {
        if self.cancellation_token.is_cancelled() {
            warn!("Worker pool already shut down, not starting");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let poll_interval = self.config.poll_interval;
        info!(
            "Starting notification worker pool with {} workers (poll every {:?})",
            self.config.worker_count, poll_interval
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };

        for i in 0..self.config.worker_count {
            let dispatcher = self.dispatcher.clone();
            let notify = self.notify.clone();
            let cancellation_token = self.cancellation_token.clone();

            join_set.spawn(async move {
                debug!("Notification worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    match dispatcher.process_next().await {
                        // More may be due right away
                        Ok(Some(_)) => continue,
                        Ok(None) => {}
                        Err(e) => error!("Notification worker {} failed: {}", i, e),
                    }

                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }

                debug!("Notification worker {} shutting down", i);
            });
        }
    }

    /// Stop the workers and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Stopping notification worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    error!("Notification worker panicked: {}", e);
                }
            }
        }

        info!("Notification worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(180));
    }
}
