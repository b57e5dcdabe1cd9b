//! Logging setup with a reloadable filter.
//!
//! The filter directive can be changed at runtime through [`LoggingHandle`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "notify_engine=info,notifyd=info,sqlx=warn";

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Runtime access to the active filter.
pub struct LoggingHandle {
    handle: FilterHandle,
}

impl LoggingHandle {
    pub fn new(handle: FilterHandle) -> Self {
        Self { handle }
    }

    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. "notify_engine=debug,sqlx=warn").
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

fn initial_filter(settings: &LoggingSettings) -> crate::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = settings.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    EnvFilter::try_new(directive)
        .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))
}

/// Install the global subscriber.
pub fn init_logging(settings: &LoggingSettings) -> crate::Result<Arc<LoggingHandle>> {
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter(settings)?);

    let (json_layer, text_layer) = if settings.json {
        (Some(fmt::layer().json().with_current_span(false)), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(Arc::new(LoggingHandle::new(filter_handle)))
}
