//! Channel fan-out for one notification.
//!
//! Every candidate push channel is tried in turn. Each failure is classified
//! as temporary or persistent and reported to the error listeners; the
//! per-channel results are then folded into one [`PushResult`]. A single
//! successful channel makes the whole attempt a success.

use std::sync::Arc;

use tracing::{debug, error};

use super::listener::{ErrorListener, report_error};
use crate::channel::{PushChannel, PushError, PushErrorKind};
use crate::model::{Frequency, Notification, Preferences};
use crate::registry::Registry;
use crate::render::ContentProducer;

/// Aggregated result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PushResult {
    Success,
    TemporaryError,
    PersistentError,
}

/// Per-channel results of one attempt, in channel order.
#[derive(Debug, Clone, Default)]
pub struct ChannelReport {
    pub succeeded: Vec<String>,
    pub temporary: Vec<(String, PushError)>,
    pub persistent: Vec<(String, PushError)>,
}

impl ChannelReport {
    fn record(&mut self, channel_id: &str, err: PushError) {
        if err.is_temporary() {
            self.temporary.push((channel_id.to_string(), err));
        } else {
            self.persistent.push((channel_id.to_string(), err));
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub result: PushResult,
    pub message: Option<String>,
    pub report: ChannelReport,
}

impl PushOutcome {
    pub fn success() -> Self {
        Self {
            result: PushResult::Success,
            message: None,
            report: ChannelReport::default(),
        }
    }

    pub fn temporary(message: impl Into<String>) -> Self {
        Self {
            result: PushResult::TemporaryError,
            message: Some(message.into()),
            report: ChannelReport::default(),
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            result: PushResult::PersistentError,
            message: Some(message.into()),
            report: ChannelReport::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == PushResult::Success
    }

    /// Fold a channel report into one outcome.
    pub fn from_report(report: ChannelReport) -> Self {
        let (result, message) = if !report.succeeded.is_empty() {
            (PushResult::Success, None)
        } else if !report.temporary.is_empty() {
            (PushResult::TemporaryError, Some(summarize(&report.temporary)))
        } else if !report.persistent.is_empty() {
            (PushResult::PersistentError, Some(summarize(&report.persistent)))
        } else {
            (
                PushResult::TemporaryError,
                Some("no allowed channels available".to_string()),
            )
        };
        Self {
            result,
            message,
            report,
        }
    }
}

fn summarize(errors: &[(String, PushError)]) -> String {
    errors
        .iter()
        .map(|(channel, err)| format!("{channel}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything a fan-out needs besides the notification.
pub struct FanOut<'a> {
    pub channels: &'a Registry<dyn PushChannel>,
    pub producer: &'a dyn ContentProducer,
    pub listeners: &'a Registry<dyn ErrorListener>,
}

impl FanOut<'_> {
    fn candidates(&self, notification: &Notification) -> Vec<Arc<dyn PushChannel>> {
        match notification.forced_channel() {
            Some(forced) => self
                .channels
                .find(|c| c.id() == forced)
                .into_iter()
                .collect(),
            None => self.channels.snapshot(),
        }
    }

    /// Try every candidate channel for `notification`.
    ///
    /// `ignore_frequency` bypasses the digest routing of non-instant
    /// frequencies.
    pub async fn run(
        &self,
        notification: &Notification,
        prefs: &Preferences,
        ignore_frequency: bool,
    ) -> PushOutcome {
        let mut report = ChannelReport::default();

        for channel in self.candidates(notification) {
            let id = channel.id();

            let Some(channel_prefs) = prefs
                .channel(id)
                .cloned()
                .or_else(|| channel.new_default_preferences())
            else {
                self.reject(
                    &mut report,
                    notification,
                    channel.as_ref(),
                    PushError::configuration("channel not configured for user"),
                );
                continue;
            };

            if !channel.accepts(notification.notification_type()) {
                self.reject(
                    &mut report,
                    notification,
                    channel.as_ref(),
                    PushError::new(
                        PushErrorKind::NotApplicable,
                        format!(
                            "channel does not accept {} notifications",
                            notification.notification_type()
                        ),
                    ),
                );
                continue;
            }

            let dispatch = match self
                .producer
                .produce(notification, prefs, &channel_prefs.channel)
                .await
            {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    error!(
                        notification_id = ?notification.id(),
                        channel = id,
                        error = %e,
                        "Failed to render notification"
                    );
                    report.record(id, PushError::new(PushErrorKind::Render, e.to_string()));
                    continue;
                }
            };

            if !channel.is_configured(&dispatch.params) {
                self.reject(
                    &mut report,
                    notification,
                    channel.as_ref(),
                    PushError::configuration("channel not configured for user"),
                );
                continue;
            }

            if !ignore_frequency && channel_prefs.frequency != Frequency::Instant {
                self.reject(
                    &mut report,
                    notification,
                    channel.as_ref(),
                    PushError::new(
                        PushErrorKind::FrequencyMismatch,
                        format!("frequency is {}", channel_prefs.frequency),
                    ),
                );
                continue;
            }

            match channel.push(notification, &dispatch).await {
                Ok(()) => {
                    debug!(notification_id = ?notification.id(), channel = id, "Pushed");
                    report.succeeded.push(id.to_string());
                }
                Err(e) => self.reject(&mut report, notification, channel.as_ref(), e),
            }
        }

        PushOutcome::from_report(report)
    }

    fn reject(
        &self,
        report: &mut ChannelReport,
        notification: &Notification,
        channel: &dyn PushChannel,
        err: PushError,
    ) {
        report_error(self.listeners, notification, channel, &err);
        report.record(channel.id(), err);
    }
}
