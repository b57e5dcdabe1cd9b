//! Domain model: notifications, preferences and rendered payloads.

mod message;
mod notification;
mod preferences;

pub use message::{Dispatch, Message, MessageKind};
pub use notification::{
    Confirmation, FORCE_CHANNEL, Notification, NotificationId, NotificationType, PushState,
    PushStatus,
};
pub use preferences::{ChannelPreferences, Frequency, PushChannelPreferences, Preferences, Version};
