//! Notification and preferences persistence.
//!
//! The dispatcher only relies on the contracts below: a consistent
//! "next eligible" read and idempotent update by id. No store-level
//! transactions are assumed.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::model::{Notification, NotificationId, NotificationType, Preferences};

/// Notification store contract.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert the notification and assign its id.
    async fn save(&self, notification: &mut Notification) -> Result<NotificationId>;

    /// Overwrite the stored record with the same id.
    async fn update(&self, notification: &Notification) -> Result<()>;

    /// Delete by id. Deleting a missing record is not an error.
    async fn delete(&self, id: NotificationId) -> Result<()>;

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>>;

    /// The earliest-scheduled queued notification due at `now`.
    async fn get_next(&self, now: DateTime<Utc>) -> Result<Option<Notification>>;

    /// Most recent notifications of a user restricted to `types`, newest first.
    async fn get_recent(
        &self,
        user_id: &str,
        types: &[NotificationType],
        offset: usize,
        count: usize,
    ) -> Result<Vec<Notification>>;
}

/// Preferences store contract.
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>>;

    /// Insert or replace the preferences of `prefs.user_id`.
    async fn save_preferences(&self, prefs: &Preferences) -> Result<()>;

    async fn remove_preferences(&self, user_id: &str) -> Result<()>;
}
