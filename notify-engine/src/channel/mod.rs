//! Delivery channels.
//!
//! Channels come in two flavours:
//! - push channels deliver a rendered [`Dispatch`] proactively (mail, webhook)
//! - pull channels serve content when the user asks for it (feed)
//!
//! Push failures are returned as [`PushError`] values carrying a
//! [`PushErrorKind`]; the kind decides whether the failure is temporary.

mod feed;
mod mail;
mod webhook;

pub use feed::{AMOUNT, DEFAULT_AMOUNT, FeedChannel, MAX_AMOUNT, SECRET};
pub use mail::{
    Mail, MailChannel, MailClient, MailError, RECIPIENT, RoundRobinMailClient, TracingMailClient,
};
pub use webhook::{WEBHOOK_URL, WebhookChannel, WebhookConfig};

use async_trait::async_trait;
use notify_params::Params;
use thiserror::Error;

use crate::model::{
    ChannelPreferences, Dispatch, Notification, NotificationType, PushChannelPreferences,
};

/// Shared channel contract.
pub trait Channel: Send + Sync {
    /// Stable channel identifier, also the key of the channel's preferences.
    fn id(&self) -> &str;

    /// Notification types this channel accepts.
    fn notification_types(&self) -> &[NotificationType];

    /// Whether `params` hold enough configuration to attempt delivery.
    fn is_configured(&self, params: &Params) -> bool;

    fn accepts(&self, notification_type: NotificationType) -> bool {
        self.notification_types().contains(&notification_type)
    }
}

/// A channel that delivers notifications proactively.
#[async_trait]
pub trait PushChannel: Channel {
    /// Fresh default preferences for a new user, or `None` when the channel
    /// needs explicit configuration.
    fn new_default_preferences(&self) -> Option<PushChannelPreferences>;

    /// Deliver one rendered notification.
    async fn push(&self, notification: &Notification, dispatch: &Dispatch)
    -> Result<(), PushError>;
}

/// A channel that serves content on request.
#[async_trait]
pub trait PullChannel: Channel {
    fn new_default_preferences(&self) -> Option<ChannelPreferences>;

    /// Render the content served to `user_id`. `params` are the request
    /// parameters.
    async fn pull(&self, user_id: &str, params: &Params) -> Result<String, PullError>;

    /// Check request credentials for transports without authentication.
    async fn is_authorized(&self, user_id: &str, params: &Params) -> Result<bool, PullError>;
}

/// Classification of a per-channel push failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PushErrorKind {
    /// Content could not be produced for this channel.
    Render,
    /// The user's channel configuration is missing or invalid.
    Configuration,
    /// The channel does not accept this notification type.
    NotApplicable,
    /// The user's frequency routes this notification to digest delivery.
    FrequencyMismatch,
    /// Network or remote failure that may succeed later.
    Transient,
    /// The remote end refused the notification for good.
    Rejected,
}

impl PushErrorKind {
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Self::Render | Self::FrequencyMismatch | Self::Transient
        )
    }
}

/// A per-channel push failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PushError {
    pub kind: PushErrorKind,
    pub message: String,
}

impl PushError {
    pub fn new(kind: PushErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn temporary(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::Transient, message)
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::Rejected, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::Configuration, message)
    }

    pub fn is_temporary(&self) -> bool {
        self.kind.is_temporary()
    }
}

/// A pull channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PullError {
    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("unknown pull channel: {0}")]
    UnknownChannel(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("no content available for user {0}")]
    Empty(String),

    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("pull failed: {0}")]
    Failed(String),
}

impl From<crate::Error> for PullError {
    fn from(err: crate::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(PushErrorKind::Render.is_temporary());
        assert!(PushErrorKind::FrequencyMismatch.is_temporary());
        assert!(PushErrorKind::Transient.is_temporary());
        assert!(!PushErrorKind::Configuration.is_temporary());
        assert!(!PushErrorKind::NotApplicable.is_temporary());
        assert!(!PushErrorKind::Rejected.is_temporary());
    }

    #[test]
    fn test_push_error_display() {
        let err = PushError::temporary("connection reset");
        assert!(err.is_temporary());
        assert_eq!(err.to_string(), "transient: connection reset");
        assert!(!PushError::persistent("gone").is_temporary());
    }
}
