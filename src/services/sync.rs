use log::{error, info, warn};
use thiserror::Error;

use crate::ml::{EmbedError, Embedder};
use crate::models::{Market, Product};
use crate::services::vector_index::{EmbeddingMetadata, EmbeddingRecord, IndexError, VectorIndex};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("product has no text to embed")]
    EmptyText,

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Outcome of a bulk resync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl From<&Product> for EmbeddingMetadata {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id,
            market: product.market,
            audience: product.audience,
            active: product.is_active,
            price: product.price,
            rating: product.rating,
            in_stock: product.in_stock,
        }
    }
}

/// Keeps the vector index an eventually-consistent projection of active
/// catalog products. Runs on catalog mutations, independently of
/// recommendation requests; a request racing a sync may see the old or the
/// new vector for that one item.
pub struct CatalogSyncService<E, V> {
    embedder: E,
    index: V,
}

impl<E: Embedder, V: VectorIndex> CatalogSyncService<E, V> {
    pub fn new(embedder: E, index: V) -> Self {
        Self { embedder, index }
    }

    /// Hook for catalog create/update events. Errors are logged, never
    /// propagated: an index or encoder outage must not fail the catalog
    /// write that triggered the sync.
    pub async fn on_item_saved(&self, product: &Product) {
        if !product.is_active {
            self.on_item_deactivated(product.id, product.market).await;
            return;
        }

        match self.upsert_item(product).await {
            Ok(()) => info!(
                "Synced product {} ({}) into namespace {}",
                product.id, product.name, product.market
            ),
            Err(e) => error!("Failed to sync product {}: {}", product.id, e),
        }
    }

    /// Hook for deactivate/delete events. Clears the product's market
    /// namespace and the shared ALL namespace; absent ids are no-ops.
    pub async fn on_item_deactivated(&self, id: i64, market: Market) {
        for namespace in delete_namespaces(market) {
            if let Err(e) = self.index.delete(namespace, id).await {
                error!(
                    "Failed to delete product {} from namespace {}: {}",
                    id, namespace, e
                );
            }
        }
    }

    /// Re-upsert every active item in `items`. Safe to re-run: upserts
    /// overwrite, never duplicate. Per-item failures are isolated and
    /// counted instead of aborting the batch.
    pub async fn bulk_resync(&self, items: &[Product]) -> SyncReport {
        let mut report = SyncReport::default();

        for product in items {
            if !product.is_active {
                report.skipped += 1;
                continue;
            }

            match self.upsert_item(product).await {
                Ok(()) => report.synced += 1,
                Err(SyncError::EmptyText) => {
                    warn!("Skipping product {}: nothing to embed", product.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to resync product {}: {}", product.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Resync complete: {} synced, {} skipped, {} failed",
            report.synced, report.skipped, report.failed
        );
        report
    }

    async fn upsert_item(&self, product: &Product) -> Result<(), SyncError> {
        let text = product.searchable_text();
        if text.is_empty() {
            return Err(SyncError::EmptyText);
        }

        let vector = self.embedder.embed(&text).await?;
        let record = EmbeddingRecord {
            id: product.id,
            vector,
            metadata: EmbeddingMetadata::from(product),
        };

        self.index.upsert(product.market.as_str(), &record).await?;
        Ok(())
    }
}

/// Namespaces to clear when an item disappears. Covers the shared ALL
/// namespace so all-markets items are fully removed.
fn delete_namespaces(market: Market) -> Vec<&'static str> {
    match market {
        Market::All => vec![Market::All.as_str()],
        other => vec![other.as_str(), Market::All.as_str()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::test_product;
    use crate::models::Audience;
    use crate::services::vector_index::MetadataFilter;
    use crate::testing::{FakeEmbedder, MemoryIndex};

    fn service() -> CatalogSyncService<FakeEmbedder, MemoryIndex> {
        CatalogSyncService::new(FakeEmbedder::default(), MemoryIndex::default())
    }

    fn query_filter() -> MetadataFilter {
        MetadataFilter {
            audience: Audience::Unisex,
        }
    }

    #[tokio::test]
    async fn upserting_twice_leaves_one_record() {
        let sync = service();
        let product = test_product(7, "Party Shirt");

        sync.on_item_saved(&product).await;
        sync.on_item_saved(&product).await;

        assert_eq!(sync.index.count("KG"), 1);
    }

    #[tokio::test]
    async fn deactivation_removes_the_record() {
        let sync = service();
        let mut product = test_product(7, "Party Shirt");

        sync.on_item_saved(&product).await;
        assert_eq!(sync.index.count("KG"), 1);

        product.is_active = false;
        sync.on_item_saved(&product).await;

        assert_eq!(sync.index.count("KG"), 0);
        let hits = sync
            .index
            .query("KG", &[1.0, 0.0], 10, &query_filter())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let sync = service();
        let mut kg_product = test_product(1, "KG Jacket");
        kg_product.market = Market::Kg;
        let mut us_product = test_product(2, "US Jacket");
        us_product.market = Market::Us;
        let mut shared_product = test_product(3, "Everywhere Jacket");
        shared_product.market = Market::All;

        sync.on_item_saved(&kg_product).await;
        sync.on_item_saved(&us_product).await;
        sync.on_item_saved(&shared_product).await;

        let us_hits = sync
            .index
            .query("US", &[1.0, 0.0], 10, &query_filter())
            .await
            .unwrap();
        let us_ids: Vec<i64> = us_hits.iter().map(|h| h.id).collect();
        assert!(us_ids.contains(&2));
        assert!(!us_ids.contains(&1));

        let all_hits = sync
            .index
            .query("ALL", &[1.0, 0.0], 10, &query_filter())
            .await
            .unwrap();
        assert_eq!(all_hits.len(), 1);
        assert_eq!(all_hits[0].id, 3);
    }

    #[tokio::test]
    async fn resync_is_idempotent_and_isolates_failures() {
        let embedder = FakeEmbedder::default().failing_on("Broken Belt");
        let sync = CatalogSyncService::new(embedder, MemoryIndex::default());

        let mut empty = test_product(3, "");
        empty.brand = None;
        empty.description = None;

        let items = vec![
            test_product(1, "Party Shirt"),
            test_product(2, "Broken Belt"),
            empty,
        ];

        let report = sync.bulk_resync(&items).await;
        assert_eq!(
            report,
            SyncReport {
                synced: 1,
                skipped: 1,
                failed: 1
            }
        );

        // Re-running converges to the same index state
        let report = sync.bulk_resync(&items).await;
        assert_eq!(report.synced, 1);
        assert_eq!(sync.index.count("KG"), 1);
    }

    #[tokio::test]
    async fn inactive_items_are_skipped_by_resync() {
        let sync = service();
        let mut product = test_product(5, "Retired Coat");
        product.is_active = false;

        let report = sync.bulk_resync(&[product]).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(sync.index.count("KG"), 0);
    }
}
