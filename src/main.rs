//! plate-watch CLI entry point
//!
//! Loads configuration, wires the gateways, runs one crawl to completion
//! (driving pause/resume cycles), then reconciles the accumulated records
//! against the stored snapshot and logs the summary.

use std::sync::Arc;
use tracing::info;

use plate_watch::application::CrawlEngine;
use plate_watch::infrastructure::extractor::{ExtractorConfig, ListingExtractor};
use plate_watch::infrastructure::http_source::HttpSourceGateway;
use plate_watch::infrastructure::session_store::InMemorySessionStore;
use plate_watch::infrastructure::sqlite_storage::SqliteStorageGateway;
use plate_watch::infrastructure::sync::SyncPolicy;
use plate_watch::infrastructure::{config::AppConfig, logging};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // Logging may not be initialized yet when config loading fails
        eprintln!("plate-watch: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "plate-watch".to_string());
    let config = AppConfig::from_file(&config_path)?;
    logging::init_logging(&config.logging)?;
    info!(config = %config_path, "starting plate-watch");

    let storage = Arc::new(SqliteStorageGateway::connect(&config.storage.database_url).await?);
    let source = Arc::new(HttpSourceGateway::new(config.source.clone())?);
    let store = Arc::new(InMemorySessionStore::new());
    let extractor = ListingExtractor::new(ExtractorConfig {
        min_price: config.crawl.min_price,
        max_price: config.crawl.max_price,
        source_url: config.source.base_url.clone(),
        ..Default::default()
    });

    let engine = Arc::new(CrawlEngine::new(source, storage, store, extractor));
    let session_id = engine.start_run(config.crawl_params()).await?;

    // Ctrl-C pauses at the next iteration boundary; the checkpoint stays
    // resumable.
    {
        let engine = engine.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.request_stop(&session_id).await;
            }
        });
    }

    let result = engine.run_to_completion(&session_id).await?;
    info!(
        session_id = %session_id,
        completed = result.completed,
        paused = result.paused,
        count = result.count,
        "crawl finished"
    );
    if let Some(err) = &result.error {
        anyhow::bail!("crawl failed: {err}");
    }

    let summary = engine.reconcile(&session_id, SyncPolicy::Differential).await?;
    info!(
        new = summary.report.new.len(),
        changed = summary.report.change_price.len(),
        unchanged = summary.report.unchanged_count,
        inserted = summary.inserted,
        updated = summary.updated,
        failures = summary.persistence_failures,
        "sync finished"
    );
    Ok(())
}
