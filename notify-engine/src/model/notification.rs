//! Notification model and push-tracking state.

use std::fmt;

use chrono::{DateTime, Utc};
use notify_params::{Param, ParamType, Params};
use serde::{Deserialize, Serialize};

/// Store-assigned notification identifier.
pub type NotificationId = i64;

/// Reserved parameter carrying the targeted-send marker.
pub const FORCE_CHANNEL: Param<String> = Param::new("notify_force_channel");

/// Visibility of a notification. Channels declare which types they accept.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Public,
    Private,
}

impl NotificationType {
    pub const ALL: &'static [NotificationType] = &[NotificationType::Public, NotificationType::Private];
    pub const PUBLIC: &'static [NotificationType] = &[NotificationType::Public];
    pub const PRIVATE: &'static [NotificationType] = &[NotificationType::Private];
}

/// Delivery state of a notification.
///
/// `Queued` is the only non-terminal state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushState {
    Queued,
    Pushed,
    Undeliverable,
}

impl PushState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PushState::Queued)
    }
}

/// Confirmation request attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Opaque key handed out to the user.
    pub key: String,
    /// Last time the confirmation was touched.
    pub touched: DateTime<Utc>,
}

impl Confirmation {
    pub fn new() -> Self {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            touched: Utc::now(),
        }
    }
}

impl Default for Confirmation {
    fn default() -> Self {
        Self::new()
    }
}

/// Push-tracking fields of a notification.
///
/// `date` is the last attempt for terminal states and the next eligible
/// attempt while queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStatus {
    pub state: PushState,
    pub date: DateTime<Utc>,
    pub error_count: u32,
    pub error_message: Option<String>,
}

impl PushStatus {
    pub fn queued(date: DateTime<Utc>) -> Self {
        Self {
            state: PushState::Queued,
            date,
            error_count: 0,
            error_message: None,
        }
    }
}

/// An application-level notification addressed to a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    id: Option<NotificationId>,
    user_id: String,
    template_key: String,
    notification_type: NotificationType,
    created_at: DateTime<Utc>,
    params: Params,
    confirmation: Option<Confirmation>,
    push: PushStatus,
}

impl Notification {
    /// Create a queued, private notification due immediately.
    pub fn new(user_id: impl Into<String>, template_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id: user_id.into(),
            template_key: template_key.into(),
            notification_type: NotificationType::Private,
            created_at: now,
            params: Params::new(),
            confirmation: None,
            push: PushStatus::queued(now),
        }
    }

    pub fn with_type(mut self, notification_type: NotificationType) -> Self {
        self.notification_type = notification_type;
        self
    }

    pub fn with_param<T: ParamType>(mut self, param: Param<T>, value: T) -> Self {
        self.params.set(param, value);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Restrict delivery to exactly one push channel.
    ///
    /// A forced notification is also deliverable to users without stored
    /// preferences.
    pub fn force_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.params.set(FORCE_CHANNEL, channel_id.into());
        self
    }

    pub fn forced_channel(&self) -> Option<String> {
        self.params.get(FORCE_CHANNEL)
    }

    pub fn id(&self) -> Option<NotificationId> {
        self.id
    }

    /// Assign the store identifier. Intended for store implementations.
    pub fn set_id(&mut self, id: NotificationId) {
        self.id = Some(id);
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn template_key(&self) -> &str {
        &self.template_key
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        self.confirmation.as_ref()
    }

    pub fn set_confirmation(&mut self, confirmation: Option<Confirmation>) {
        self.confirmation = confirmation;
    }

    pub fn push_status(&self) -> &PushStatus {
        &self.push
    }

    /// Replace the push-tracking fields with persisted values.
    /// Intended for store implementations loading a record.
    pub fn restore_push_status(&mut self, status: PushStatus) {
        self.push = status;
    }

    pub(crate) fn push_status_mut(&mut self) -> &mut PushStatus {
        &mut self.push
    }

    pub fn push_state(&self) -> PushState {
        self.push.state
    }

    pub fn push_date(&self) -> DateTime<Utc> {
        self.push.date
    }

    pub fn push_error_count(&self) -> u32 {
        self.push.error_count
    }

    pub fn push_error_message(&self) -> Option<&str> {
        self.push.error_message.as_deref()
    }

    /// Count one more failed push attempt and remember its message.
    /// Returns the new error count.
    pub fn record_push_error(&mut self, message: impl Into<String>) -> u32 {
        self.push.error_count = self.push.error_count.saturating_add(1);
        self.push.error_message = Some(message.into());
        self.push.error_count
    }

    /// Whether a worker may attempt this notification at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.push.state == PushState::Queued && self.push.date <= now
    }

    /// Reset the push fields for a fresh enqueue.
    pub(crate) fn reset_queued(&mut self, now: DateTime<Utc>) {
        self.push = PushStatus::queued(now);
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Notification [id={}, user_id={}, key={}, type={}, created_at={}]",
            self.id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.user_id,
            self.template_key,
            self.notification_type,
            self.created_at.to_rfc3339()
        )
    }
}
