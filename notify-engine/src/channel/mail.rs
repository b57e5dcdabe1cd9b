//! Mail push channel.
//!
//! The channel only prepares mails; the transport is a [`MailClient`].

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use notify_params::{Param, Params};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Channel, PushChannel, PushError, PushErrorKind};
use crate::model::{
    Dispatch, MessageKind, Notification, NotificationType, PushChannelPreferences,
};

/// Recipient address of the user.
pub const RECIPIENT: Param<String> = Param::string("recipient");

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@<>()\[\],;:]+@[^\s@<>()\[\],;:]+$").unwrap());

/// A mail ready for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub kind: MessageKind,
}

/// Mail transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MailError {
    pub temporary: bool,
    pub message: String,
}

impl MailError {
    pub fn temporary(message: impl Into<String>) -> Self {
        Self {
            temporary: true,
            message: message.into(),
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            temporary: false,
            message: message.into(),
        }
    }
}

/// Mail transport.
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Mail channel for private notifications.
pub struct MailChannel {
    client: Arc<dyn MailClient>,
}

impl MailChannel {
    pub const ID: &'static str = "mail";

    pub fn new(client: Arc<dyn MailClient>) -> Self {
        Self { client }
    }

    fn build_mail(&self, dispatch: &Dispatch) -> Result<Mail, PushError> {
        let recipient = dispatch
            .params
            .get(RECIPIENT)
            .ok_or_else(|| PushError::configuration("no recipient configured"))?;
        let recipient = recipient.trim().to_string();
        if !ADDRESS_RE.is_match(&recipient) {
            return Err(PushError::configuration(format!(
                "invalid recipient address: {recipient}"
            )));
        }

        Ok(Mail {
            recipient,
            subject: dispatch.message.subject.clone(),
            body: dispatch.message.body.clone(),
            kind: dispatch.message.kind,
        })
    }
}

impl Channel for MailChannel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn notification_types(&self) -> &[NotificationType] {
        NotificationType::PRIVATE
    }

    fn is_configured(&self, params: &Params) -> bool {
        params.contains_all(&[RECIPIENT.name()])
    }
}

#[async_trait]
impl PushChannel for MailChannel {
    fn new_default_preferences(&self) -> Option<PushChannelPreferences> {
        Some(PushChannelPreferences::new())
    }

    async fn push(
        &self,
        notification: &Notification,
        dispatch: &Dispatch,
    ) -> Result<(), PushError> {
        let mail = self.build_mail(dispatch)?;

        self.client.send(&mail).await.map_err(|e| {
            let kind = if e.temporary {
                PushErrorKind::Transient
            } else {
                PushErrorKind::Rejected
            };
            PushError::new(kind, e.message)
        })?;

        debug!(
            notification_id = ?notification.id(),
            recipient = %mail.recipient,
            "Mail sent"
        );
        Ok(())
    }
}

/// Rotates across several mail clients.
///
/// Each send starts at the next client in turn and tries every client once
/// before giving up.
pub struct RoundRobinMailClient {
    clients: Vec<Arc<dyn MailClient>>,
    next: AtomicUsize,
}

impl RoundRobinMailClient {
    pub fn new(clients: Vec<Arc<dyn MailClient>>) -> Self {
        Self {
            clients,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl MailClient for RoundRobinMailClient {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        let count = self.clients.len();
        if count == 0 {
            return Err(MailError::persistent("no mail clients configured"));
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;
        let mut temporary = false;
        let mut last_message = String::new();

        for offset in 0..count {
            let index = (start + offset) % count;
            match self.clients[index].send(mail).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(client = index, error = %e, "Mail client failed, trying next");
                    temporary |= e.temporary;
                    last_message = e.message;
                }
            }
        }

        Err(MailError {
            temporary,
            message: format!("all {count} mail clients failed, last error: {last_message}"),
        })
    }
}

/// Mail client that logs mails instead of sending them.
#[derive(Debug, Default)]
pub struct TracingMailClient;

#[async_trait]
impl MailClient for TracingMailClient {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        info!(
            recipient = %mail.recipient,
            subject = %mail.subject,
            kind = %mail.kind,
            "Mail (not sent): {}",
            mail.body
        );
        Ok(())
    }
}
