//! Push dispatcher: fan-out, retry bookkeeping and per-notification locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::fanout::{FanOut, PushOutcome, PushResult};
use super::listener::ErrorListener;
use super::lock::KeyLock;
use super::retry::{RetryPolicy, record_push_attempt};
use crate::channel::PushChannel;
use crate::model::{Notification, NotificationId, PushChannelPreferences, PushState, Preferences};
use crate::registry::Registry;
use crate::render::ContentProducer;
use crate::store::{NotificationStore, PreferencesStore};
use crate::{Error, Result};

/// Default fallback poll interval of the worker pool.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Result of processing one queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// An attempt was made and recorded.
    Processed(PushResult),
    /// The notification was gone, terminal or not yet due.
    Skipped,
}

/// Delivers notifications through the registered push channels.
pub struct PushDispatcher {
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferencesStore>,
    producer: Arc<dyn ContentProducer>,
    channels: Registry<dyn PushChannel>,
    error_listeners: Registry<dyn ErrorListener>,
    locks: KeyLock<NotificationId>,
    config: DispatchConfig,
}

impl PushDispatcher {
    pub fn builder() -> PushDispatcherBuilder {
        PushDispatcherBuilder::default()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn notification_store(&self) -> &Arc<dyn NotificationStore> {
        &self.notifications
    }

    pub fn preferences_store(&self) -> &Arc<dyn PreferencesStore> {
        &self.preferences
    }

    pub fn push_channels(&self) -> Vec<Arc<dyn PushChannel>> {
        self.channels.snapshot()
    }

    /// Register a push channel, replacing one with the same id.
    pub fn add_push_channel(&self, channel: Arc<dyn PushChannel>) {
        let id = channel.id().to_string();
        if self.channels.remove_where(|c| c.id() == id) > 0 {
            info!(channel = %id, "Replacing push channel");
        }
        self.channels.add(channel);
    }

    pub fn remove_push_channel(&self, channel_id: &str) -> bool {
        self.channels.remove_where(|c| c.id() == channel_id) > 0
    }

    pub fn add_error_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.error_listeners.add(listener);
    }

    pub fn remove_error_listener(&self, listener: &Arc<dyn ErrorListener>) -> bool {
        self.error_listeners.remove(listener)
    }

    /// Default channel preferences of every push channel that has some.
    pub fn new_default_preferences(&self) -> BTreeMap<String, PushChannelPreferences> {
        self.channels
            .snapshot()
            .into_iter()
            .filter_map(|c| {
                c.new_default_preferences()
                    .map(|prefs| (c.id().to_string(), prefs))
            })
            .collect()
    }

    /// Preferences used for delivery. A forced send to a user without stored
    /// preferences gets fresh ones.
    async fn resolve_preferences(&self, notification: &Notification) -> Result<Option<Preferences>> {
        let user_id = notification.user_id();
        match self.preferences.get_preferences(user_id).await? {
            Some(prefs) => Ok(Some(prefs)),
            None if notification.forced_channel().is_some() => Ok(Some(Preferences::new(user_id))),
            None => Ok(None),
        }
    }

    /// One delivery attempt without any state bookkeeping.
    async fn attempt(
        &self,
        notification: &Notification,
        ignore_frequency: bool,
    ) -> Result<PushOutcome> {
        let prefs = match self.resolve_preferences(notification).await {
            Ok(prefs) => prefs,
            Err(e) => {
                // Counted as a failed attempt so the queue moves past this record
                warn!(
                    notification_id = ?notification.id(),
                    user_id = notification.user_id(),
                    error = %e,
                    "Failed to load preferences"
                );
                return Ok(PushOutcome::temporary(format!(
                    "cannot load preferences for {}: {}",
                    notification.user_id(),
                    e
                )));
            }
        };
        let Some(prefs) = prefs else {
            warn!(
                notification_id = ?notification.id(),
                user_id = notification.user_id(),
                "Unknown user, notification is undeliverable"
            );
            return Ok(PushOutcome::persistent(format!(
                "unknown user {}",
                notification.user_id()
            )));
        };

        let fan_out = FanOut {
            channels: &self.channels,
            producer: self.producer.as_ref(),
            listeners: &self.error_listeners,
        };
        Ok(fan_out.run(notification, &prefs, ignore_frequency).await)
    }

    fn dispatch_error(notification: &Notification, outcome: &PushOutcome) -> Error {
        Error::dispatch(format!(
            "{} for {}: {}",
            outcome.result,
            notification,
            outcome.message.as_deref().unwrap_or("no details")
        ))
    }

    /// Deliver immediately, ignoring frequencies.
    ///
    /// On success the notification is stored as `PUSHED` and returned. On
    /// failure nothing stays stored: a fresh notification is never saved and
    /// a stored queued one is deleted. A stored notification that is already
    /// `PUSHED` is returned as is; an `UNDELIVERABLE` one is an error.
    pub async fn dispatch_now(&self, mut notification: Notification) -> Result<Notification> {
        let Some(id) = notification.id() else {
            if notification.push_state().is_terminal() {
                return Err(Error::validation(format!(
                    "cannot dispatch a {} notification",
                    notification.push_state()
                )));
            }

            let outcome = self.attempt(&notification, true).await?;
            if !outcome.is_success() {
                return Err(Self::dispatch_error(&notification, &outcome));
            }
            record_push_attempt(&mut notification, &outcome, &self.config.retry, Utc::now())?;
            let id = self.notifications.save(&mut notification).await?;
            info!(notification_id = id, user_id = notification.user_id(), "Dispatched now");
            return Ok(notification);
        };

        let _guard = self.locks.lock(id).await;
        let mut current = self
            .notifications
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id.to_string()))?;

        match current.push_state() {
            PushState::Pushed => return Ok(current),
            PushState::Undeliverable => {
                return Err(Error::dispatch(format!("{current} is undeliverable")));
            }
            PushState::Queued => {}
        }

        let outcome = self.attempt(&current, true).await?;
        if !outcome.is_success() {
            self.notifications.delete(id).await?;
            return Err(Self::dispatch_error(&current, &outcome));
        }

        record_push_attempt(&mut current, &outcome, &self.config.retry, Utc::now())?;
        self.notifications.update(&current).await?;
        info!(notification_id = id, user_id = current.user_id(), "Dispatched now");
        Ok(current)
    }

    /// Process one queued notification under its lock.
    ///
    /// The stored record is re-read once the lock is held; it is skipped
    /// unless it is still queued and due, so a stale `notification` never
    /// causes a second delivery.
    pub async fn process_queued(&self, notification: &Notification) -> Result<ProcessOutcome> {
        let id = notification
            .id()
            .ok_or_else(|| Error::validation("cannot process an unsaved notification"))?;

        let _guard = self.locks.lock(id).await;
        let Some(mut current) = self.notifications.get(id).await? else {
            debug!(notification_id = id, "Notification vanished before processing");
            return Ok(ProcessOutcome::Skipped);
        };
        if !current.is_due(Utc::now()) {
            debug!(notification_id = id, state = %current.push_state(), "Notification not due");
            return Ok(ProcessOutcome::Skipped);
        }

        let outcome = self.attempt(&current, false).await?;
        let state = record_push_attempt(&mut current, &outcome, &self.config.retry, Utc::now())?;
        self.notifications.update(&current).await?;

        match state {
            PushState::Pushed => debug!(notification_id = id, "Notification pushed"),
            PushState::Queued => debug!(
                notification_id = id,
                error_count = current.push_error_count(),
                next_attempt = %current.push_date(),
                "Notification rescheduled: {}",
                current.push_error_message().unwrap_or_default()
            ),
            PushState::Undeliverable => warn!(
                notification_id = id,
                error_count = current.push_error_count(),
                "Notification undeliverable: {}",
                current.push_error_message().unwrap_or_default()
            ),
        }

        Ok(ProcessOutcome::Processed(outcome.result))
    }

    /// Fetch and process the next eligible notification, if any.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>> {
        match self.notifications.get_next(Utc::now()).await? {
            Some(notification) => Ok(Some(self.process_queued(&notification).await?)),
            None => Ok(None),
        }
    }
}

/// Builder for [`PushDispatcher`]. Missing collaborators are configuration
/// errors.
#[derive(Default)]
pub struct PushDispatcherBuilder {
    notifications: Option<Arc<dyn NotificationStore>>,
    preferences: Option<Arc<dyn PreferencesStore>>,
    producer: Option<Arc<dyn ContentProducer>>,
    channels: Vec<Arc<dyn PushChannel>>,
    error_listeners: Vec<Arc<dyn ErrorListener>>,
    config: DispatchConfig,
}

impl PushDispatcherBuilder {
    pub fn notification_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.notifications = Some(store);
        self
    }

    pub fn preferences_store(mut self, store: Arc<dyn PreferencesStore>) -> Self {
        self.preferences = Some(store);
        self
    }

    pub fn content_producer(mut self, producer: Arc<dyn ContentProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn push_channel(mut self, channel: Arc<dyn PushChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn error_listener(mut self, listener: Arc<dyn ErrorListener>) -> Self {
        self.error_listeners.push(listener);
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<PushDispatcher> {
        if self.channels.is_empty() {
            return Err(Error::config("no push channels registered"));
        }
        let notifications = self
            .notifications
            .ok_or_else(|| Error::config("no notification store configured"))?;
        let preferences = self
            .preferences
            .ok_or_else(|| Error::config("no preferences store configured"))?;
        let producer = self
            .producer
            .ok_or_else(|| Error::config("no content producer configured"))?;

        let dispatcher = PushDispatcher {
            notifications,
            preferences,
            producer,
            channels: Registry::new(),
            error_listeners: Registry::new(),
            locks: KeyLock::new(),
            config: self.config,
        };
        for channel in self.channels {
            dispatcher.add_push_channel(channel);
        }
        for listener in self.error_listeners {
            dispatcher.add_error_listener(listener);
        }
        Ok(dispatcher)
    }
}
