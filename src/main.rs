//! GloriaMundo model service - HTTP Server Entry Point
//!
//! Starts the catalog auto-updater and the HTTP API.

use gloriamundo::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gloriamundo=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        base_url = %config.base_url,
        database = %config.database_path.display(),
        markup = config.price_markup,
        default_model = %config.default_model,
        sync_enabled = config.sync.enabled,
        sync_interval_secs = config.sync.interval.as_secs(),
        "Loaded configuration"
    );

    info!("Starting server on {}:{}", config.host, config.port);
    api::serve(config).await?;

    Ok(())
}
