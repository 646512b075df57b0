//! manaserv-store - storage core bootstrap.
//!
//! Opens the store, restores public channels and guilds, flushes cached
//! state periodically and once more on shutdown.

use manaserv_store::Storage;
use manaserv_store::config::Config;
use manaserv_store::state::{ChannelRegistry, GuildDirectory};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "manaserv.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path, error = %e, "Failed to load config");
            e
        })?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        Config::default()
    };

    info!(database = %config.database.path, "Starting manaserv-store");

    // Table creation failure is fatal.
    let storage = Arc::new(
        Storage::open_sqlite(&config.database.path, config.limits.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to open storage");
                e
            })?,
    );

    let channels = Arc::new(ChannelRegistry::new());
    channels.restore(storage.get_channel_list().await?);

    let guilds = GuildDirectory::new(Arc::clone(&storage), Arc::clone(&channels));
    guilds.load().await?;
    info!(
        channels = channels.len(),
        guilds = guilds.len(),
        "Storage core ready"
    );

    if let Some(period) = config.chat.flush_interval() {
        let storage = Arc::clone(&storage);
        let channels = Arc::clone(&channels);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                persist(&storage, &channels).await;
            }
        });
        info!(interval_secs = period.as_secs(), "Periodic flush task started");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, flushing");

    persist(&storage, &channels).await;
    storage.close().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Flush modified accounts and sync the public channel table. Failures are
/// logged; the next run retries.
async fn persist(storage: &Storage, channels: &ChannelRegistry) {
    if let Err(e) = storage.flush_all().await {
        warn!(error = %e, "Account flush incomplete");
    }

    match storage.update_channels(&channels.persistent_snapshot()).await {
        Ok(report) if !report.is_noop() => info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Channel table saved"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Channel table sync failed"),
    }
}
