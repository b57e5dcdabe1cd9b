//! User and per-channel preferences.

use std::collections::BTreeMap;

use notify_params::Params;
use serde::{Deserialize, Serialize};

/// Content length hint handed to the renderer.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Version {
    #[default]
    Long,
    Short,
}

/// How often a push channel delivers to a user.
///
/// Only `Instant` is handled by the dispatcher; the other frequencies belong
/// to digest delivery.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    #[default]
    Instant,
    Daily,
    Weekly,
    Monthly,
}

/// Preferences of one user for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub params: Params,
}

impl ChannelPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: &Params) -> Self {
        Self {
            version: Version::default(),
            params: Params::with_defaults(defaults),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

/// Channel preferences of a push channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushChannelPreferences {
    #[serde(flatten)]
    pub channel: ChannelPreferences,
    #[serde(default)]
    pub frequency: Frequency,
}

impl PushChannelPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.channel.params = params;
        self
    }

    pub fn params(&self) -> &Params {
        &self.channel.params
    }
}

/// All preferences of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: String,
    #[serde(default)]
    pub params: Params,
    /// Per push channel preferences, keyed by channel id.
    #[serde(default)]
    pub channel_prefs: BTreeMap<String, PushChannelPreferences>,
}

impl Preferences {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(
        mut self,
        channel_id: impl Into<String>,
        prefs: PushChannelPreferences,
    ) -> Self {
        self.channel_prefs.insert(channel_id.into(), prefs);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn channel(&self, channel_id: &str) -> Option<&PushChannelPreferences> {
        self.channel_prefs.get(channel_id)
    }
}
