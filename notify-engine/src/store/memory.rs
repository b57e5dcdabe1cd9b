//! In-process store for tests and embedding.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{NotificationStore, PreferencesStore};
use crate::model::{Notification, NotificationId, NotificationType, Preferences, PushState};
use crate::{Error, Result};

#[derive(Default)]
struct MemoryState {
    last_id: NotificationId,
    notifications: BTreeMap<NotificationId, Notification>,
    preferences: HashMap<String, Preferences>,
}

/// Store keeping everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn save(&self, notification: &mut Notification) -> Result<NotificationId> {
        let mut state = self.state.lock();
        state.last_id += 1;
        let id = state.last_id;
        notification.set_id(id);
        state.notifications.insert(id, notification.clone());
        Ok(id)
    }

    async fn update(&self, notification: &Notification) -> Result<()> {
        let id = notification
            .id()
            .ok_or_else(|| Error::validation("cannot update an unsaved notification"))?;
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(stored) => {
                *stored = notification.clone();
                Ok(())
            }
            None => Err(Error::not_found("Notification", id.to_string())),
        }
    }

    async fn delete(&self, id: NotificationId) -> Result<()> {
        self.state.lock().notifications.remove(&id);
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        Ok(self.state.lock().notifications.get(&id).cloned())
    }

    async fn get_next(&self, now: DateTime<Utc>) -> Result<Option<Notification>> {
        let state = self.state.lock();
        Ok(state
            .notifications
            .values()
            .filter(|n| n.push_state() == PushState::Queued && n.push_date() <= now)
            .min_by_key(|n| (n.push_date(), n.id()))
            .cloned())
    }

    async fn get_recent(
        &self,
        user_id: &str,
        types: &[NotificationType],
        offset: usize,
        count: usize,
    ) -> Result<Vec<Notification>> {
        let state = self.state.lock();
        let mut matching: Vec<&Notification> = state
            .notifications
            .values()
            .filter(|n| n.user_id() == user_id && types.contains(&n.notification_type()))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PreferencesStore for MemoryStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        Ok(self.state.lock().preferences.get(user_id).cloned())
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.state
            .lock()
            .preferences
            .insert(prefs.user_id.clone(), prefs.clone());
        Ok(())
    }

    async fn remove_preferences(&self, user_id: &str) -> Result<()> {
        self.state.lock().preferences.remove(user_id);
        Ok(())
    }
}
