//! Feed pull channel.
//!
//! Serves a user's most recent notifications as a JSON document. Feed
//! readers usually cannot authenticate, so requests carry a `secret` that
//! must match the one stored in the user's feed preferences.

use std::sync::Arc;

use async_trait::async_trait;
use notify_params::{Param, Params};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Channel, PullChannel, PullError};
use crate::model::{ChannelPreferences, NotificationId, NotificationType, Preferences};
use crate::render::ContentProducer;
use crate::store::{NotificationStore, PreferencesStore};

/// Feed access secret.
pub const SECRET: Param<String> = Param::string("secret");
/// Number of entries served.
pub const AMOUNT: Param<i64> = Param::integer("amount");

pub const DEFAULT_AMOUNT: i64 = 25;
pub const MAX_AMOUNT: i64 = 100;

#[derive(Debug, Serialize)]
struct FeedEntry {
    id: Option<NotificationId>,
    template_key: String,
    created_at: String,
    subject: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct FeedDocument<'a> {
    channel: &'a str,
    user_id: &'a str,
    entries: Vec<FeedEntry>,
}

pub struct FeedChannel {
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferencesStore>,
    producer: Arc<dyn ContentProducer>,
    types: Vec<NotificationType>,
}

impl FeedChannel {
    pub const ID: &'static str = "feed";

    /// Feed of public notifications.
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferencesStore>,
        producer: Arc<dyn ContentProducer>,
    ) -> Self {
        Self {
            notifications,
            preferences,
            producer,
            types: NotificationType::PUBLIC.to_vec(),
        }
    }

    pub fn with_types(mut self, types: &[NotificationType]) -> Self {
        self.types = types.to_vec();
        self
    }

    fn channel_prefs(&self, prefs: &Preferences) -> ChannelPreferences {
        prefs
            .channel(Self::ID)
            .map(|p| p.channel.clone())
            .unwrap_or_else(|| {
                PullChannel::new_default_preferences(self).unwrap_or_default()
            })
    }

    /// Requested amount, else the stored one, else the default; capped.
    fn amount(request: &Params, stored: &Params) -> usize {
        let amount = request
            .get(AMOUNT)
            .or_else(|| stored.get(AMOUNT))
            .unwrap_or(DEFAULT_AMOUNT)
            .clamp(1, MAX_AMOUNT);
        usize::try_from(amount).unwrap_or(DEFAULT_AMOUNT as usize)
    }
}

impl Channel for FeedChannel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn notification_types(&self) -> &[NotificationType] {
        &self.types
    }

    fn is_configured(&self, params: &Params) -> bool {
        params.get(SECRET).is_some_and(|s| !s.is_empty())
    }
}

#[async_trait]
impl PullChannel for FeedChannel {
    fn new_default_preferences(&self) -> Option<ChannelPreferences> {
        let mut prefs = ChannelPreferences::new();
        prefs.params.set(AMOUNT, DEFAULT_AMOUNT);
        Some(prefs)
    }

    async fn pull(&self, user_id: &str, params: &Params) -> Result<String, PullError> {
        let prefs = self
            .preferences
            .get_preferences(user_id)
            .await?
            .ok_or_else(|| PullError::UnknownUser(user_id.to_string()))?;
        let channel_prefs = self.channel_prefs(&prefs);
        let amount = Self::amount(params, &channel_prefs.params);

        let recent = self
            .notifications
            .get_recent(user_id, &self.types, 0, amount)
            .await?;

        let mut entries = Vec::with_capacity(recent.len());
        for notification in &recent {
            match self
                .producer
                .produce(notification, &prefs, &channel_prefs)
                .await
            {
                Ok(dispatch) => entries.push(FeedEntry {
                    id: notification.id(),
                    template_key: notification.template_key().to_string(),
                    created_at: notification.created_at().to_rfc3339(),
                    subject: dispatch.message.subject,
                    body: dispatch.message.body,
                }),
                Err(e) => {
                    warn!(
                        notification_id = ?notification.id(),
                        user_id,
                        error = %e,
                        "Skipping feed entry that failed to render"
                    );
                }
            }
        }

        if entries.is_empty() {
            return Err(PullError::Empty(user_id.to_string()));
        }

        debug!(user_id, entries = entries.len(), "Feed rendered");
        serde_json::to_string(&FeedDocument {
            channel: Self::ID,
            user_id,
            entries,
        })
        .map_err(|e| PullError::Failed(e.to_string()))
    }

    async fn is_authorized(&self, user_id: &str, params: &Params) -> Result<bool, PullError> {
        let Some(requested) = params.get(SECRET).filter(|s| !s.is_empty()) else {
            return Ok(false);
        };
        let Some(prefs) = self.preferences.get_preferences(user_id).await? else {
            return Ok(false);
        };
        let stored = prefs
            .channel(Self::ID)
            .and_then(|p| p.params().get(SECRET));
        Ok(stored.is_some_and(|secret| secret == requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageKind, Notification, PushChannelPreferences, Version};
    use crate::render::{MemoryTemplateRenderer, NotificationRenderService};
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, FeedChannel) {
        let store = Arc::new(MemoryStore::new());
        let renderer = MemoryTemplateRenderer::new();
        renderer.register(
            "news",
            Version::Long,
            MessageKind::Text,
            "Subject: News\n\nSomething happened.",
        );
        let producer = Arc::new(NotificationRenderService::new(Arc::new(renderer)));
        let channel = FeedChannel::new(store.clone(), store.clone(), producer);

        store
            .save_preferences(&Preferences::new("john").with_channel(
                FeedChannel::ID,
                PushChannelPreferences::new()
                    .with_params(Params::new().with(SECRET, "s3cret".to_string())),
            ))
            .await
            .unwrap();
        (store, channel)
    }

    #[tokio::test]
    async fn test_pull_renders_recent_public() {
        let (store, channel) = setup().await;
        for _ in 0..3 {
            let mut n = Notification::new("john", "news").with_type(NotificationType::Public);
            store.save(&mut n).await.unwrap();
        }
        let mut private = Notification::new("john", "news");
        store.save(&mut private).await.unwrap();

        let body = channel
            .pull("john", &Params::new().with(AMOUNT, 2))
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["entries"].as_array().unwrap().len(), 2);
        assert_eq!(doc["entries"][0]["subject"], "News");
    }

    #[tokio::test]
    async fn test_empty_feed_is_error() {
        let (_store, channel) = setup().await;
        assert_eq!(
            channel.pull("john", &Params::new()).await.unwrap_err(),
            PullError::Empty("john".to_string())
        );
        assert!(matches!(
            channel.pull("nobody", &Params::new()).await,
            Err(PullError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_is_authorized() {
        let (_store, channel) = setup().await;
        let ok = Params::new().with(SECRET, "s3cret".to_string());
        let bad = Params::new().with(SECRET, "guess".to_string());

        assert!(channel.is_authorized("john", &ok).await.unwrap());
        assert!(!channel.is_authorized("john", &bad).await.unwrap());
        assert!(!channel.is_authorized("john", &Params::new()).await.unwrap());
        assert!(!channel.is_authorized("nobody", &ok).await.unwrap());
    }

    #[test]
    fn test_amount_bounds() {
        let none = Params::new();
        assert_eq!(FeedChannel::amount(&none, &none), 25);
        assert_eq!(
            FeedChannel::amount(&Params::new().with(AMOUNT, 500), &none),
            100
        );
        assert_eq!(
            FeedChannel::amount(&none, &Params::new().with(AMOUNT, 10)),
            10
        );
        assert_eq!(FeedChannel::amount(&Params::new().with(AMOUNT, 0), &none), 1);
    }
}
