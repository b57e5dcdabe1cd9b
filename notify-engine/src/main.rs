use std::path::Path;
use std::sync::Arc;

use notify_engine::channel::{
    MailChannel, PushChannel, TracingMailClient, WebhookChannel, WebhookConfig,
};
use notify_engine::config::EngineConfig;
use notify_engine::logging;
use notify_engine::model::{MessageKind, Version};
use notify_engine::render::{MemoryTemplateRenderer, NotificationRenderService};
use notify_engine::services::ServiceContainer;
use tracing::{info, warn};

/// Directory of `<key>.<long|short>.<txt|html>` template files.
const ENV_TEMPLATE_DIR: &str = "NOTIFY_TEMPLATE_DIR";

fn load_templates(renderer: &MemoryTemplateRenderer, dir: &Path) -> anyhow::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let parts: Vec<&str> = name.split('.').collect();
        let [key, version, ext] = parts.as_slice() else {
            warn!("Skipping template file with unexpected name: {}", name);
            continue;
        };
        let version = match *version {
            "long" => Version::Long,
            "short" => Version::Short,
            _ => {
                warn!("Skipping template with unknown version: {}", name);
                continue;
            }
        };
        let kind = match *ext {
            "html" => MessageKind::Html,
            _ => MessageKind::Text,
        };

        renderer.register(*key, version, kind, std::fs::read_to_string(&path)?);
        count += 1;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env()?;
    let _logging = logging::init_logging(&config.logging())?;

    let renderer = Arc::new(MemoryTemplateRenderer::new());
    if let Ok(dir) = std::env::var(ENV_TEMPLATE_DIR) {
        let count = load_templates(&renderer, Path::new(&dir))?;
        info!("Loaded {} templates from {}", count, dir);
    } else {
        warn!("{} not set, no templates loaded", ENV_TEMPLATE_DIR);
    }
    let producer = Arc::new(NotificationRenderService::new(renderer));

    let channels: Vec<Arc<dyn PushChannel>> = vec![
        Arc::new(MailChannel::new(Arc::new(TracingMailClient))),
        Arc::new(WebhookChannel::new(WebhookConfig::default())?),
    ];

    let container = ServiceContainer::with_sqlite(config, producer, channels).await?;
    container.start();
    info!("notifyd started");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    container.shutdown().await?;
    Ok(())
}
