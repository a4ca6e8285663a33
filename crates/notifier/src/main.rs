use anyhow::Context;

use ticketing_infra::{NotifierConfig, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ticketing_observability::init();

    let config = NotifierConfig::from_env().context("invalid notifier configuration")?;
    let store = RedisStore::new(&config.redis_url).context("invalid REDIS_URL")?;
    let handle = ticketing_notifier::start(store, &config)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; finishing in-flight jobs");

    // Joining worker threads blocks.
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("shutdown task failed")?;

    tracing::info!("notifier stopped");
    Ok(())
}
