//! SQLx implementation of the stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::warn;

use super::{NotificationStore, PreferencesStore};
use crate::database::DbPool;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::model::{
    Confirmation, Notification, NotificationId, NotificationType, Preferences, PushState,
    PushStatus,
};
use crate::{Error, Result};

/// Notification database row.
#[derive(Debug, Clone, FromRow)]
struct NotificationRow {
    id: i64,
    user_id: String,
    template_key: String,
    kind: String,
    created_at: i64,
    /// JSON params bag
    params: String,
    confirmation_key: Option<String>,
    confirmation_touched: Option<i64>,
    push_state: String,
    push_date: i64,
    push_error_count: i64,
    push_error_message: Option<String>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        let kind: NotificationType = row
            .kind
            .parse()
            .map_err(|_| Error::validation(format!("invalid notification type: {}", row.kind)))?;
        let state: PushState = row
            .push_state
            .parse()
            .map_err(|_| Error::validation(format!("invalid push state: {}", row.push_state)))?;

        let mut notification = Notification::new(row.user_id, row.template_key)
            .with_type(kind)
            .with_created_at(ms_to_datetime(row.created_at))
            .with_params(serde_json::from_str(&row.params)?);
        notification.set_id(row.id);
        notification.set_confirmation(row.confirmation_key.map(|key| Confirmation {
            key,
            touched: ms_to_datetime(row.confirmation_touched.unwrap_or(row.created_at)),
        }));
        notification.restore_push_status(PushStatus {
            state,
            date: ms_to_datetime(row.push_date),
            error_count: u32::try_from(row.push_error_count).unwrap_or(u32::MAX),
            error_message: row.push_error_message,
        });
        Ok(notification)
    }
}

#[derive(Debug, Clone, FromRow)]
struct PreferencesRow {
    user_id: String,
    params: String,
    channel_prefs: String,
}

impl TryFrom<PreferencesRow> for Preferences {
    type Error = Error;

    fn try_from(row: PreferencesRow) -> Result<Self> {
        Ok(Preferences {
            user_id: row.user_id,
            params: serde_json::from_str(&row.params)?,
            channel_prefs: serde_json::from_str(&row.channel_prefs)?,
        })
    }
}

/// SQLite-backed notification and preferences store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn save(&self, notification: &mut Notification) -> Result<NotificationId> {
        let status = notification.push_status();
        let confirmation = notification.confirmation();
        let result = sqlx::query(
            r#"
            INSERT INTO notification (
                user_id, template_key, kind, created_at, params,
                confirmation_key, confirmation_touched,
                push_state, push_date, push_error_count, push_error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.user_id())
        .bind(notification.template_key())
        .bind(notification.notification_type().to_string())
        .bind(datetime_to_ms(notification.created_at()))
        .bind(serde_json::to_string(notification.params())?)
        .bind(confirmation.map(|c| c.key.clone()))
        .bind(confirmation.map(|c| datetime_to_ms(c.touched)))
        .bind(status.state.to_string())
        .bind(datetime_to_ms(status.date))
        .bind(i64::from(status.error_count))
        .bind(status.error_message.clone())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        notification.set_id(id);
        Ok(id)
    }

    async fn update(&self, notification: &Notification) -> Result<()> {
        let id = notification
            .id()
            .ok_or_else(|| Error::validation("cannot update an unsaved notification"))?;
        let status = notification.push_status();
        let confirmation = notification.confirmation();

        let result = sqlx::query(
            r#"
            UPDATE notification SET
                user_id = ?,
                template_key = ?,
                kind = ?,
                params = ?,
                confirmation_key = ?,
                confirmation_touched = ?,
                push_state = ?,
                push_date = ?,
                push_error_count = ?,
                push_error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(notification.user_id())
        .bind(notification.template_key())
        .bind(notification.notification_type().to_string())
        .bind(serde_json::to_string(notification.params())?)
        .bind(confirmation.map(|c| c.key.clone()))
        .bind(confirmation.map(|c| datetime_to_ms(c.touched)))
        .bind(status.state.to_string())
        .bind(datetime_to_ms(status.date))
        .bind(i64::from(status.error_count))
        .bind(status.error_message.clone())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Notification", id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: NotificationId) -> Result<()> {
        sqlx::query("DELETE FROM notification WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        sqlx::query_as::<_, NotificationRow>("SELECT * FROM notification WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    async fn get_next(&self, now: DateTime<Utc>) -> Result<Option<Notification>> {
        loop {
            let Some(row) = sqlx::query_as::<_, NotificationRow>(
                r#"
                SELECT * FROM notification
                WHERE push_state = 'QUEUED' AND push_date <= ?
                ORDER BY push_date, id
                LIMIT 1
                "#,
            )
            .bind(datetime_to_ms(now))
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let id = row.id;
            match Notification::try_from(row) {
                Ok(notification) => return Ok(Some(notification)),
                Err(e) => {
                    // A row that cannot be decoded would otherwise stay at the head of the queue
                    warn!(
                        notification_id = id,
                        error = %e,
                        "Undecodable notification, marking undeliverable"
                    );
                    sqlx::query(
                        r#"
                        UPDATE notification
                        SET push_state = 'UNDELIVERABLE', push_date = ?, push_error_message = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(datetime_to_ms(now))
                    .bind(format!("cannot decode notification: {e}"))
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }
    }

    async fn get_recent(
        &self,
        user_id: &str,
        types: &[NotificationType],
        offset: usize,
        count: usize,
    ) -> Result<Vec<Notification>> {
        if types.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM notification WHERE user_id = ");
        query.push_bind(user_id).push(" AND kind IN (");
        let mut separated = query.separated(", ");
        for kind in types {
            separated.push_bind(kind.to_string());
        }
        separated.push_unseparated(") ORDER BY created_at DESC, id DESC LIMIT ");
        query
            .push_bind(i64::try_from(count).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));

        let rows = query
            .build_query_as::<NotificationRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }
}

#[async_trait]
impl PreferencesStore for SqliteStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        sqlx::query_as::<_, PreferencesRow>("SELECT * FROM preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Preferences::try_from)
            .transpose()
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, params, channel_prefs)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                params = excluded.params,
                channel_prefs = excluded.channel_prefs
            "#,
        )
        .bind(&prefs.user_id)
        .bind(serde_json::to_string(&prefs.params)?)
        .bind(serde_json::to_string(&prefs.channel_prefs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_preferences(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM preferences WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
