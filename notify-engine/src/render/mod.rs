//! Content production.
//!
//! [`NotificationRenderService`] merges the parameters of a user, a channel,
//! the notification and any registered [`ParamsFactory`] (later sources win)
//! and renders the notification's template with them.

mod memory;

pub use memory::MemoryTemplateRenderer;

use std::sync::Arc;

use async_trait::async_trait;
use notify_params::Params;
use thiserror::Error;
use tracing::trace;

use crate::model::{ChannelPreferences, Dispatch, Message, Notification, Preferences, Version};
use crate::registry::Registry;

/// Content could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("missing parameter: {0}")]
    MissingParam(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("params factory failed: {0}")]
    Factory(String),
}

/// Turns a notification into a channel-agnostic payload.
#[async_trait]
pub trait ContentProducer: Send + Sync {
    async fn produce(
        &self,
        notification: &Notification,
        prefs: &Preferences,
        channel_prefs: &ChannelPreferences,
    ) -> Result<Dispatch, RenderError>;
}

/// Renders a template with merged params.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template_key: &str,
        version: Version,
        params: &Params,
    ) -> Result<Message, RenderError>;
}

/// Contributes extra render parameters.
#[async_trait]
pub trait ParamsFactory: Send + Sync {
    async fn params(
        &self,
        notification: &Notification,
        prefs: &Preferences,
    ) -> Result<Params, RenderError>;
}

pub struct NotificationRenderService {
    renderer: Arc<dyn TemplateRenderer>,
    factories: Registry<dyn ParamsFactory>,
}

impl NotificationRenderService {
    pub fn new(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            renderer,
            factories: Registry::new(),
        }
    }

    pub fn add_params_factory(&self, factory: Arc<dyn ParamsFactory>) {
        self.factories.add(factory);
    }

    pub fn remove_params_factory(&self, factory: &Arc<dyn ParamsFactory>) -> bool {
        self.factories.remove(factory)
    }

    /// Merge every parameter source for one notification.
    pub async fn merge_params(
        &self,
        notification: &Notification,
        prefs: &Preferences,
        channel_prefs: &ChannelPreferences,
    ) -> Result<Params, RenderError> {
        let mut params = Params::new();
        params.merge(&prefs.params);
        params.merge(&channel_prefs.params);
        params.merge(notification.params());
        for factory in self.factories.snapshot() {
            params.merge(&factory.params(notification, prefs).await?);
        }
        Ok(params)
    }
}

#[async_trait]
impl ContentProducer for NotificationRenderService {
    async fn produce(
        &self,
        notification: &Notification,
        prefs: &Preferences,
        channel_prefs: &ChannelPreferences,
    ) -> Result<Dispatch, RenderError> {
        let params = self
            .merge_params(notification, prefs, channel_prefs)
            .await?;
        let message =
            self.renderer
                .render(notification.template_key(), channel_prefs.version, &params)?;

        trace!(
            notification_id = ?notification.id(),
            template = notification.template_key(),
            "Rendered notification"
        );
        Ok(Dispatch::new(message, params))
    }
}
