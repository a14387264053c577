use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use faceseek_store::{CacheStore, SqliteBackend};

mod config;
mod dbus_interface;
mod fetch;
mod provider;
mod service;

use config::Config;
use dbus_interface::FaceSeekService;
use fetch::ImageFetcher;
use provider::CommandAnalyzer;
use service::FaceSeek;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceseekd starting");

    let config = Config::from_env();

    let backend = SqliteBackend::open(&config.db_path).await?;
    let store = CacheStore::new(Arc::new(backend));

    // Upgrade any legacy-schema entries before serving requests.
    let migrated = store.migrate().await?;
    if migrated.upgraded > 0 {
        tracing::info!(upgraded = migrated.upgraded, "migrated cache entries");
    }

    let analyzer = CommandAnalyzer::new(
        &config.analyzer_cmd,
        Duration::from_secs(config.analyzer_timeout_secs),
    )?;
    let fetcher = ImageFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?;

    let service = Arc::new(FaceSeek::new(
        store,
        Arc::new(analyzer),
        Arc::new(fetcher),
        config.similarity_threshold,
        config.max_results,
    ));

    let _conn = zbus::connection::Builder::session()?
        .name("org.faceseek.FaceSeek1")?
        .serve_at("/org/faceseek/FaceSeek1", FaceSeekService::new(service))?
        .build()
        .await?;

    tracing::info!("faceseekd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceseekd shutting down");

    Ok(())
}
