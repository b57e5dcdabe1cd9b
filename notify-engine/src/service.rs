//! Notification service facade.
//!
//! Applications create notifications and preferences through this type;
//! delivery is delegated to the [`PushDispatcher`].

use std::sync::Arc;

use chrono::Utc;
use notify_params::Params;
use tracing::debug;

use crate::channel::{PullChannel, PullError};
use crate::dispatch::{EnqueueListener, ErrorListener, PushDispatcher, report_enqueued};
use crate::model::{Confirmation, Notification, Preferences, PushChannelPreferences};
use crate::registry::Registry;
use crate::{Error, Result};

pub struct NotifyService {
    dispatcher: Arc<PushDispatcher>,
    pull_channels: Registry<dyn PullChannel>,
    enqueue_listeners: Registry<dyn EnqueueListener>,
    default_params: Params,
}

impl NotifyService {
    pub fn new(dispatcher: Arc<PushDispatcher>) -> Self {
        Self {
            dispatcher,
            pull_channels: Registry::new(),
            enqueue_listeners: Registry::new(),
            default_params: Params::new(),
        }
    }

    /// Params every new user starts with.
    pub fn with_default_params(mut self, params: Params) -> Self {
        self.default_params = params;
        self
    }

    pub fn dispatcher(&self) -> &Arc<PushDispatcher> {
        &self.dispatcher
    }

    /// Store `notification` as queued and due now, then tell the enqueue
    /// listeners.
    pub async fn enqueue(&self, mut notification: Notification) -> Result<Notification> {
        if let Some(id) = notification.id() {
            return Err(Error::validation(format!(
                "notification {id} is already stored"
            )));
        }

        notification.reset_queued(Utc::now());
        let id = self
            .dispatcher
            .notification_store()
            .save(&mut notification)
            .await?;
        debug!(
            notification_id = id,
            user_id = notification.user_id(),
            "Notification enqueued"
        );

        report_enqueued(&self.enqueue_listeners, &notification);
        Ok(notification)
    }

    /// Deliver synchronously. See [`PushDispatcher::dispatch_now`].
    pub async fn dispatch_now(&self, notification: Notification) -> Result<Notification> {
        self.dispatcher.dispatch_now(notification).await
    }

    /// Attach a fresh confirmation and enqueue.
    pub async fn confirm(&self, mut notification: Notification) -> Result<Notification> {
        notification.set_confirmation(Some(Confirmation::new()));
        self.enqueue(notification).await
    }

    /// Attach a fresh confirmation and deliver synchronously.
    pub async fn confirm_now(&self, mut notification: Notification) -> Result<Notification> {
        notification.set_confirmation(Some(Confirmation::new()));
        self.dispatch_now(notification).await
    }

    pub async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        self.dispatcher
            .preferences_store()
            .get_preferences(user_id)
            .await
    }

    /// Default preferences for a new user, covering every push and pull
    /// channel that has defaults. Nothing is stored.
    pub fn new_preferences(&self, user_id: impl Into<String>) -> Preferences {
        let mut channel_prefs = self.dispatcher.new_default_preferences();
        for channel in self.pull_channels.snapshot() {
            if let Some(prefs) = channel.new_default_preferences() {
                channel_prefs.insert(
                    channel.id().to_string(),
                    PushChannelPreferences {
                        channel: prefs,
                        frequency: Default::default(),
                    },
                );
            }
        }

        Preferences {
            user_id: user_id.into(),
            params: Params::with_defaults(&self.default_params),
            channel_prefs,
        }
    }

    pub async fn set_preferences(&self, prefs: &Preferences) -> Result<()> {
        if prefs.user_id.is_empty() {
            return Err(Error::validation("preferences need a user id"));
        }
        self.dispatcher
            .preferences_store()
            .save_preferences(prefs)
            .await
    }

    pub async fn remove_preferences(&self, user_id: &str) -> Result<()> {
        self.dispatcher
            .preferences_store()
            .remove_preferences(user_id)
            .await
    }

    /// Register a pull channel, replacing one with the same id.
    pub fn add_pull_channel(&self, channel: Arc<dyn PullChannel>) {
        let id = channel.id().to_string();
        self.pull_channels.remove_where(|c| c.id() == id);
        self.pull_channels.add(channel);
    }

    pub fn remove_pull_channel(&self, channel_id: &str) -> bool {
        self.pull_channels.remove_where(|c| c.id() == channel_id) > 0
    }

    pub fn pull_channel(&self, channel_id: &str) -> Option<Arc<dyn PullChannel>> {
        self.pull_channels.find(|c| c.id() == channel_id)
    }

    /// Serve pull content for `user_id` after checking the request
    /// credentials in `params`.
    pub async fn pull(
        &self,
        channel_id: &str,
        user_id: &str,
        params: &Params,
    ) -> std::result::Result<String, PullError> {
        let channel = self
            .pull_channel(channel_id)
            .ok_or_else(|| PullError::UnknownChannel(channel_id.to_string()))?;

        if !channel.is_authorized(user_id, params).await? {
            debug!(channel = channel_id, user_id, "Pull request not authorized");
            return Err(PullError::Unauthorized(user_id.to_string()));
        }
        channel.pull(user_id, params).await
    }

    pub fn add_enqueue_listener(&self, listener: Arc<dyn EnqueueListener>) {
        self.enqueue_listeners.add(listener);
    }

    pub fn remove_enqueue_listener(&self, listener: &Arc<dyn EnqueueListener>) -> bool {
        self.enqueue_listeners.remove(listener)
    }

    pub fn add_error_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.dispatcher.add_error_listener(listener);
    }

    pub fn remove_error_listener(&self, listener: &Arc<dyn ErrorListener>) -> bool {
        self.dispatcher.remove_error_listener(listener)
    }
}
