//! Webhook push channel (HTTP POST of a JSON document).

use std::time::Duration;

use async_trait::async_trait;
use notify_params::{Param, Params};
use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{Channel, PushChannel, PushError, PushErrorKind};
use crate::model::{Dispatch, Notification, NotificationType, PushChannelPreferences};

/// Endpoint URL configured by the user.
pub const WEBHOOK_URL: Param<String> = Param::string("webhook_url");

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Headers added to every request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            headers: Vec::new(),
        }
    }
}

/// Push channel posting notifications to a per-user webhook URL.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub const ID: &'static str = "webhook";

    pub fn new(config: WebhookConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| crate::Error::Other(format!("Failed to build reqwest client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }

    fn build_payload(&self, notification: &Notification, dispatch: &Dispatch) -> serde_json::Value {
        json!({
            "notification_id": notification.id(),
            "user_id": notification.user_id(),
            "template_key": notification.template_key(),
            "type": notification.notification_type().to_string(),
            "created_at": notification.created_at().to_rfc3339(),
            "kind": dispatch.message.kind.to_string(),
            "subject": dispatch.message.subject,
            "body": dispatch.message.body,
        })
    }
}

fn parse_endpoint(raw: &str) -> Option<url::Url> {
    url::Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Map a non-success status to a failure class.
fn classify_status(status: StatusCode) -> PushErrorKind {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        PushErrorKind::Transient
    } else {
        PushErrorKind::Rejected
    }
}

fn classify_request_error(err: &reqwest::Error) -> PushErrorKind {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        PushErrorKind::Transient
    } else {
        PushErrorKind::Rejected
    }
}

impl Channel for WebhookChannel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn notification_types(&self) -> &[NotificationType] {
        NotificationType::ALL
    }

    fn is_configured(&self, params: &Params) -> bool {
        params
            .get(WEBHOOK_URL)
            .is_some_and(|raw| parse_endpoint(&raw).is_some())
    }
}

#[async_trait]
impl PushChannel for WebhookChannel {
    fn new_default_preferences(&self) -> Option<PushChannelPreferences> {
        None
    }

    async fn push(
        &self,
        notification: &Notification,
        dispatch: &Dispatch,
    ) -> Result<(), PushError> {
        let endpoint = dispatch
            .params
            .get(WEBHOOK_URL)
            .and_then(|raw| parse_endpoint(&raw))
            .ok_or_else(|| PushError::configuration("no valid webhook url configured"))?;

        let payload = self.build_payload(notification, dispatch);

        let response = self
            .client
            .post(endpoint.as_str())
            .headers(self.build_headers())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                PushError::new(
                    classify_request_error(&e),
                    format!("webhook request failed: {e}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                notification_id = ?notification.id(),
                %status,
                "Webhook failed: {}",
                body
            );
            return Err(PushError::new(
                classify_status(status),
                format!("webhook failed: {status}"),
            ));
        }

        debug!(notification_id = ?notification.id(), url = %endpoint, "Webhook delivered");
        Ok(())
    }
}
