//! Retry and backoff state machine.
//!
//! `QUEUED` is the only retryable state. A success moves a notification to
//! `PUSHED`; a persistent failure, or one failure too many, moves it to
//! `UNDELIVERABLE`. Everything else stays `QUEUED` and is rescheduled after
//! an escalating delay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fanout::{PushOutcome, PushResult};
use crate::model::{Notification, PushState};
use crate::{Error, Result};

/// Default number of failures tolerated before giving up.
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// Default delays in seconds for the 1st, 2nd, ... failure.
pub const DEFAULT_BACKOFF_SECS: [u64; 5] = [60, 15 * 60, 2 * 60 * 60, 24 * 60 * 60, 3 * 24 * 60 * 60];

/// Delay before the next attempt, indexed by error count.
///
/// `delay(0)` is zero, `delay(n)` is the n-th entry and counts past the end of
/// the table reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct BackoffTable {
    delays: Vec<Duration>,
}

impl BackoffTable {
    /// Build a table. It must be non-empty and non-decreasing.
    pub fn new(delays: Vec<Duration>) -> Result<Self> {
        if delays.is_empty() {
            return Err(Error::config("backoff table must not be empty"));
        }
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::config("backoff table must be non-decreasing"));
        }
        Ok(Self { delays })
    }

    pub fn from_secs(secs: &[u64]) -> Result<Self> {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn delay(&self, error_count: u32) -> Duration {
        if error_count == 0 {
            return Duration::ZERO;
        }
        let index = (error_count as usize - 1).min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn as_secs(&self) -> Vec<u64> {
        self.delays.iter().map(Duration::as_secs).collect()
    }
}

impl Default for BackoffTable {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

impl TryFrom<Vec<u64>> for BackoffTable {
    type Error = Error;

    fn try_from(secs: Vec<u64>) -> Result<Self> {
        Self::from_secs(&secs)
    }
}

impl From<BackoffTable> for Vec<u64> {
    fn from(table: BackoffTable) -> Self {
        table.as_secs()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_error_count")]
    pub max_error_count: u32,
    #[serde(default)]
    pub backoff: BackoffTable,
}

fn default_max_error_count() -> u32 {
    DEFAULT_MAX_ERROR_COUNT
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
            backoff: BackoffTable::default(),
        }
    }
}

impl RetryPolicy {
    /// State reached from `error_count` after an attempt ending in `result`.
    pub fn next_state(&self, error_count: u32, result: PushResult) -> PushState {
        match result {
            PushResult::Success => PushState::Pushed,
            PushResult::PersistentError => PushState::Undeliverable,
            PushResult::TemporaryError if error_count.saturating_add(1) > self.max_error_count => {
                PushState::Undeliverable
            }
            PushResult::TemporaryError => PushState::Queued,
        }
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Apply the outcome of one push attempt to `notification`.
///
/// Returns the new state. Terminal notifications are rejected with
/// [`Error::InvalidStateTransition`] and left untouched.
pub fn record_push_attempt(
    notification: &mut Notification,
    outcome: &PushOutcome,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<PushState> {
    let current = notification.push_state();
    let next = policy.next_state(notification.push_error_count(), outcome.result);
    if current.is_terminal() {
        return Err(Error::InvalidStateTransition {
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    if outcome.result == PushResult::Success {
        let status = notification.push_status_mut();
        status.state = PushState::Pushed;
        status.date = now;
        status.error_message = None;
        return Ok(PushState::Pushed);
    }

    let message = outcome
        .message
        .clone()
        .unwrap_or_else(|| outcome.result.to_string());
    let count = notification.record_push_error(message);

    let status = notification.push_status_mut();
    status.state = next;
    status.date = match next {
        PushState::Queued => add_delay(now, policy.backoff.delay(count)),
        _ => now,
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PushStatus;

    fn queued_with_errors(count: u32) -> Notification {
        let mut n = Notification::new("john", "welcome");
        n.restore_push_status(PushStatus {
            state: PushState::Queued,
            date: Utc::now(),
            error_count: count,
            error_message: None,
        });
        n
    }

    #[test]
    fn test_default_backoff_table() {
        let table = BackoffTable::default();
        assert_eq!(table.delay(0), Duration::ZERO);
        assert_eq!(table.delay(1), Duration::from_secs(60));
        assert_eq!(table.delay(2), Duration::from_secs(15 * 60));
        assert_eq!(table.delay(3), Duration::from_secs(2 * 60 * 60));
        assert_eq!(table.delay(4), Duration::from_secs(24 * 60 * 60));
        assert_eq!(table.delay(5), Duration::from_secs(3 * 24 * 60 * 60));
        assert_eq!(table.delay(50), Duration::from_secs(3 * 24 * 60 * 60));
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let table = BackoffTable::default();
        for n in 0..20 {
            assert!(table.delay(n) <= table.delay(n + 1), "delay({n}) > delay({})", n + 1);
        }
    }

    #[test]
    fn test_backoff_validation() {
        assert!(BackoffTable::from_secs(&[]).is_err());
        assert!(BackoffTable::from_secs(&[10, 5]).is_err());
        assert!(BackoffTable::from_secs(&[5, 5, 10]).is_ok());
    }

    #[test]
    fn test_backoff_serde_as_secs() {
        let json = serde_json::to_string(&BackoffTable::default()).unwrap();
        assert_eq!(json, "[60,900,7200,86400,259200]");
        assert!(serde_json::from_str::<BackoffTable>("[3,1]").is_err());
    }

    #[test]
    fn test_success_marks_pushed() {
        let mut n = queued_with_errors(2);
        let now = Utc::now();
        let state = record_push_attempt(
            &mut n,
            &PushOutcome::success(),
            &RetryPolicy::default(),
            now,
        )
        .unwrap();

        assert_eq!(state, PushState::Pushed);
        assert_eq!(n.push_date(), now);
        assert_eq!(n.push_error_count(), 2);
        assert!(n.push_error_message().is_none());
    }

    #[test]
    fn test_temporary_error_reschedules() {
        let mut n = queued_with_errors(2);
        let now = Utc::now();
        let state = record_push_attempt(
            &mut n,
            &PushOutcome::temporary("smtp down"),
            &RetryPolicy::default(),
            now,
        )
        .unwrap();

        assert_eq!(state, PushState::Queued);
        assert_eq!(n.push_error_count(), 3);
        assert_eq!((n.push_date() - now).num_milliseconds(), 7_200_000);
        assert_eq!(n.push_error_message(), Some("smtp down"));
    }

    #[test]
    fn test_too_many_errors_is_undeliverable() {
        let mut n = queued_with_errors(3);
        let now = Utc::now();
        let state = record_push_attempt(
            &mut n,
            &PushOutcome::temporary("smtp down"),
            &RetryPolicy::default(),
            now,
        )
        .unwrap();

        assert_eq!(state, PushState::Undeliverable);
        assert_eq!(n.push_error_count(), 4);
        assert_eq!(n.push_date(), now);
    }

    #[test]
    fn test_persistent_error_is_undeliverable_immediately() {
        let mut n = queued_with_errors(0);
        let state = record_push_attempt(
            &mut n,
            &PushOutcome::persistent("unknown user john"),
            &RetryPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(state, PushState::Undeliverable);
        assert_eq!(n.push_error_count(), 1);
    }

    #[test]
    fn test_terminal_is_never_requeued() {
        let mut n = queued_with_errors(0);
        let policy = RetryPolicy::default();
        record_push_attempt(&mut n, &PushOutcome::success(), &policy, Utc::now()).unwrap();

        let before = n.clone();
        let err = record_push_attempt(&mut n, &PushOutcome::temporary("x"), &policy, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(n, before);
    }

    #[test]
    fn test_error_count_non_decreasing_until_terminal() {
        let mut n = queued_with_errors(0);
        let policy = RetryPolicy::default();
        let mut last = 0;
        while n.push_state() == PushState::Queued {
            record_push_attempt(&mut n, &PushOutcome::temporary("x"), &policy, Utc::now())
                .unwrap();
            assert!(n.push_error_count() >= last);
            last = n.push_error_count();
        }
        assert_eq!(n.push_state(), PushState::Undeliverable);
        assert_eq!(last, policy.max_error_count + 1);
    }
}
