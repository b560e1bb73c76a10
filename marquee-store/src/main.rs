use anyhow::Context;
use marquee_store::app_config::Config;
use marquee_store::Services;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let services = Services::connect(&config)
        .await
        .context("failed to connect backends")?;
    services.db.migrate().await.context("failed to run migrations")?;
    services.ping().await.context("backend health check failed")?;

    tracing::info!(
        namespace = %config.cache.namespace,
        catalog_ttl_seconds = config.cache.catalog_ttl_seconds,
        "Marquee store ready"
    );
    Ok(())
}
