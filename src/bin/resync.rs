//! Bulk-resync every active catalog product into the vector index.
//!
//! Usage: `resync [market]` where market is KG, US or ALL. Without an
//! argument every market is resynced. Safe to re-run: upserts overwrite.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marque_assistant::config::Config;
use marque_assistant::ml::HuggingFaceEmbedder;
use marque_assistant::models::Market;
use marque_assistant::services::catalog::CatalogStore;
use marque_assistant::services::sync::SyncReport;
use marque_assistant::services::{CatalogSyncService, PgCatalogStore, PineconeIndex};

const BATCH_SIZE: usize = 25;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resync=info,marque_assistant=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let market = match std::env::args().nth(1) {
        Some(raw) => Some(
            raw.parse::<Market>()
                .map_err(|e| anyhow::anyhow!("{} (expected KG, US or ALL)", e))?,
        ),
        None => None,
    };

    let config = Config::from_env()?;

    let catalog = PgCatalogStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the catalog database")?;
    let embedder = HuggingFaceEmbedder::new(
        &config.huggingface_api_key,
        &config.huggingface_base_url,
        &config.huggingface_model,
    )
    .context("Failed to initialize sentence encoder")?;
    let index = PineconeIndex::new(&config.pinecone_api_key, &config.pinecone_host)
        .context("Failed to initialize vector index client")?;
    let sync = CatalogSyncService::new(embedder, index);

    println!("{}", style("VECTOR INDEX RESYNC").green().bold());
    match market {
        Some(market) => println!("Market filter: {}", style(market).cyan()),
        None => println!("Market filter: {}", style("all markets").cyan()),
    }

    info!("Listing active products...");
    let items = catalog
        .list_active(market)
        .await
        .context("Failed to list active products")?;

    if items.is_empty() {
        println!("{}", style("No active products found, nothing to sync").yellow());
        return Ok(());
    }

    println!("Products to sync: {}", items.len());

    let progress = ProgressBar::new(items.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );

    let mut report = SyncReport::default();
    for batch in items.chunks(BATCH_SIZE) {
        let batch_report = sync.bulk_resync(batch).await;
        report.synced += batch_report.synced;
        report.skipped += batch_report.skipped;
        report.failed += batch_report.failed;
        progress.inc(batch.len() as u64);
    }
    progress.finish_with_message("done");

    println!();
    println!("{}", style("RESYNC COMPLETE").green().bold());
    println!("Synced:  {}", style(report.synced).green());
    println!("Skipped: {}", style(report.skipped).yellow());
    if report.failed > 0 {
        println!("Failed:  {}", style(report.failed).red());
    }

    Ok(())
}
