//! Dispatch engine: fan-out, retry state machine, per-notification locking
//! and the worker pool that drives queued delivery.

mod dispatcher;
mod fanout;
mod listener;
mod lock;
mod retry;
mod worker_pool;

pub use dispatcher::{
    DEFAULT_POLL_INTERVAL, DispatchConfig, ProcessOutcome, PushDispatcher, PushDispatcherBuilder,
};
pub use fanout::{ChannelReport, FanOut, PushOutcome, PushResult};
pub use listener::{EnqueueListener, ErrorListener};
pub(crate) use listener::report_enqueued;
pub use lock::{KeyGuard, KeyLock};
pub use retry::{
    BackoffTable, DEFAULT_BACKOFF_SECS, DEFAULT_MAX_ERROR_COUNT, RetryPolicy, record_push_attempt,
};
pub use worker_pool::{PollingWorkerPool, WorkerPoolConfig};
