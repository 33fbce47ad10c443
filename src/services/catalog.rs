use chrono::{DateTime, Utc};
use log::warn;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::future::Future;
use thiserror::Error;

use crate::models::{Audience, Market, Product, RequirementFilter};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog store error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::Database(err.to_string())
    }
}

/// Read-only access to the external product catalog. The surrounding CRUD
/// system owns writes; this subsystem only resolves candidates, runs the
/// attribute fallback search and feeds bulk resync.
pub trait CatalogStore: Send + Sync {
    /// Resolve ids to active, in-stock products. Order of the result is
    /// unspecified; callers re-order by their own score ordering.
    fn fetch_active_by_ids(
        &self,
        ids: &[i64],
    ) -> impl Future<Output = Result<Vec<Product>, CatalogError>> + Send;

    /// Attribute-filter search used when the vector index is unavailable
    /// or empty: tag overlap per requirement category, market/audience and
    /// stock constraints, price bounds, ordered by rating then recency.
    /// An empty filter degrades to the most popular active items.
    fn search_by_attributes(
        &self,
        filter: &RequirementFilter,
        market: Market,
        audience: Audience,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Product>, CatalogError>> + Send;

    /// Every active item visible in `market` (or all markets), for resync.
    fn list_active(
        &self,
        market: Option<Market>,
    ) -> impl Future<Output = Result<Vec<Product>, CatalogError>> + Send;
}

const PRODUCT_COLUMNS: &str = "id, name, brand, description, market, audience, price, rating, \
     image, in_stock, is_active, occasion_tags, style_tags, season_tags, color_tags, \
     material_tags, age_group_tags, activity_tags, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    brand: Option<String>,
    description: Option<String>,
    market: String,
    audience: String,
    price: f64,
    rating: f32,
    image: Option<String>,
    in_stock: bool,
    is_active: bool,
    occasion_tags: Vec<String>,
    style_tags: Vec<String>,
    season_tags: Vec<String>,
    color_tags: Vec<String>,
    material_tags: Vec<String>,
    age_group_tags: Vec<String>,
    activity_tags: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = String;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id,
            name: row.name,
            brand: row.brand,
            description: row.description,
            market: row.market.parse()?,
            audience: row.audience.parse()?,
            price: row.price,
            rating: row.rating,
            image: row.image,
            in_stock: row.in_stock,
            is_active: row.is_active,
            occasion_tags: row.occasion_tags,
            style_tags: row.style_tags,
            season_tags: row.season_tags,
            color_tags: row.color_tags,
            material_tags: row.material_tags,
            age_group_tags: row.age_group_tags,
            activity_tags: row.activity_tags,
            created_at: row.created_at,
        })
    }
}

fn into_products(rows: Vec<ProductRow>) -> Vec<Product> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match Product::try_from(row) {
                Ok(product) => Some(product),
                Err(e) => {
                    warn!("Skipping catalog row {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

/// Build the dynamic attribute search. Categories present in the filter
/// are ANDed together; within a category any tag overlap matches.
fn attribute_search_builder<'a>(
    filter: &RequirementFilter,
    market: Market,
    audience: Audience,
    limit: i64,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {} FROM products WHERE is_active AND in_stock",
        PRODUCT_COLUMNS
    ));

    builder
        .push(" AND (market = ")
        .push_bind(market.as_str())
        .push(" OR market = 'ALL')");
    builder
        .push(" AND (audience = ")
        .push_bind(audience.as_str())
        .push(" OR audience = 'U')");

    for (column, tags) in [
        ("occasion_tags", &filter.occasion),
        ("style_tags", &filter.style),
        ("season_tags", &filter.season),
        ("color_tags", &filter.colors),
    ] {
        if !tags.is_empty() {
            builder
                .push(format!(" AND {} && ", column))
                .push_bind(tags.clone());
        }
    }

    if let Some(min) = filter.price_min {
        builder.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.price_max {
        builder.push(" AND price <= ").push_bind(max);
    }

    builder
        .push(" ORDER BY rating DESC, created_at DESC LIMIT ")
        .push_bind(limit);

    builder
}

/// Postgres-backed catalog access.
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

impl CatalogStore for PgCatalogStore {
    async fn fetch_active_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {} FROM products WHERE id = ANY($1) AND is_active AND in_stock",
            PRODUCT_COLUMNS
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(into_products(rows))
    }

    async fn search_by_attributes(
        &self,
        filter: &RequirementFilter,
        market: Market,
        audience: Audience,
        limit: i64,
    ) -> Result<Vec<Product>, CatalogError> {
        let mut builder = attribute_search_builder(filter, market, audience, limit);
        let rows: Vec<ProductRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(into_products(rows))
    }

    async fn list_active(&self, market: Option<Market>) -> Result<Vec<Product>, CatalogError> {
        let rows: Vec<ProductRow> = match market {
            Some(market) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM products WHERE is_active AND (market = $1 OR market = 'ALL') \
                     ORDER BY id",
                    PRODUCT_COLUMNS
                ))
                .bind(market.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM products WHERE is_active ORDER BY id",
                    PRODUCT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(into_products(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_search_applies_tag_overlap_per_category() {
        let filter = RequirementFilter {
            occasion: vec!["party".to_string()],
            style: vec!["trendy".to_string()],
            ..Default::default()
        };
        let builder = attribute_search_builder(&filter, Market::Kg, Audience::Men, 20);
        let sql = builder.sql();

        assert!(sql.contains("occasion_tags && "));
        assert!(sql.contains("style_tags && "));
        assert!(!sql.contains("season_tags"));
        assert!(sql.contains("ORDER BY rating DESC, created_at DESC"));
    }

    #[test]
    fn empty_filter_degrades_to_popularity_query() {
        let filter = RequirementFilter::default();
        let builder = attribute_search_builder(&filter, Market::Us, Audience::Women, 20);
        let sql = builder.sql();

        assert!(!sql.contains("&&"));
        assert!(!sql.contains("price"));
        assert!(sql.contains("is_active AND in_stock"));
        assert!(sql.contains("ORDER BY rating DESC"));
    }

    #[test]
    fn price_bounds_are_applied_when_present() {
        let filter = RequirementFilter {
            price_min: Some(500.0),
            price_max: Some(2500.0),
            ..Default::default()
        };
        let builder = attribute_search_builder(&filter, Market::Kg, Audience::Unisex, 20);
        let sql = builder.sql();

        assert!(sql.contains("price >= "));
        assert!(sql.contains("price <= "));
    }
}
