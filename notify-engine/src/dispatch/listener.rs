//! Dispatch observers.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, info};

use crate::channel::{PushChannel, PushError};
use crate::model::Notification;
use crate::registry::Registry;

/// Observes failed channel attempts.
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, notification: &Notification, channel: &dyn PushChannel, error: &PushError);
}

/// Observes notifications entering the queue.
pub trait EnqueueListener: Send + Sync {
    fn on_enqueued(&self, notification: &Notification);
}

impl<F> ErrorListener for F
where
    F: Fn(&Notification, &dyn PushChannel, &PushError) + Send + Sync,
{
    fn on_error(&self, notification: &Notification, channel: &dyn PushChannel, error: &PushError) {
        self(notification, channel, error)
    }
}

impl<F> EnqueueListener for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_enqueued(&self, notification: &Notification) {
        self(notification)
    }
}

/// Report a channel failure to every error listener, or log it when there
/// are none. A panicking listener is logged and skipped; this relies on the
/// workspace release profile unwinding.
pub(crate) fn report_error(
    listeners: &Registry<dyn ErrorListener>,
    notification: &Notification,
    channel: &dyn PushChannel,
    err: &PushError,
) {
    let listeners = listeners.snapshot();
    if listeners.is_empty() {
        info!(
            notification_id = ?notification.id(),
            user_id = notification.user_id(),
            channel = channel.id(),
            temporary = err.is_temporary(),
            "Channel push failed: {}",
            err
        );
        return;
    }

    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| {
            listener.on_error(notification, channel, err)
        }))
        .is_err()
        {
            error!(
                notification_id = ?notification.id(),
                channel = channel.id(),
                "Error listener panicked"
            );
        }
    }
}

/// Tell every enqueue listener about `notification`.
pub(crate) fn report_enqueued(listeners: &Registry<dyn EnqueueListener>, notification: &Notification) {
    for listener in listeners.snapshot() {
        if catch_unwind(AssertUnwindSafe(|| listener.on_enqueued(notification))).is_err() {
            error!(
                notification_id = ?notification.id(),
                "Enqueue listener panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry: Registry<dyn EnqueueListener> = Registry::new();
        let calls = Arc::new(AtomicU32::new(0));

        registry.add(Arc::new(|_: &Notification| -> () { panic!("boom") }));
        let counter = calls.clone();
        registry.add(Arc::new(move |_: &Notification| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        report_enqueued(&registry, &Notification::new("john", "welcome"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_error_listener_is_isolated() {
        use crate::channel::{MailChannel, PushError, TracingMailClient};

        let registry: Registry<dyn ErrorListener> = Registry::new();
        let calls = Arc::new(AtomicU32::new(0));

        registry.add(Arc::new(
            |_: &Notification, _: &dyn PushChannel, _: &PushError| -> () { panic!("boom") },
        ));
        let counter = calls.clone();
        registry.add(Arc::new(
            move |_: &Notification, _: &dyn PushChannel, _: &PushError| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let channel = MailChannel::new(Arc::new(TracingMailClient));
        report_error(
            &registry,
            &Notification::new("john", "welcome"),
            &channel,
            &PushError::temporary("down"),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_profile_unwinds() {
        let manifest = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../Cargo.toml"));
        let release = manifest
            .split("[profile.release]")
            .nth(1)
            .unwrap()
            .split("\n[")
            .next()
            .unwrap();
        assert!(!release.contains("panic = \"abort\""));
    }
}
