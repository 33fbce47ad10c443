use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

/// Market a product is sold in. `ALL` means the product is available in
/// every market and lives in the shared index namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Market {
    #[serde(rename = "KG")]
    Kg,
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "ALL")]
    All,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kg => "KG",
            Market::Us => "US",
            Market::All => "ALL",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KG" => Ok(Market::Kg),
            "US" => Ok(Market::Us),
            "ALL" => Ok(Market::All),
            other => Err(format!("unknown market: {}", other)),
        }
    }
}

/// Target audience of a product. Unisex products match every requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Audience {
    #[serde(rename = "M")]
    Men,
    #[serde(rename = "W")]
    Women,
    #[serde(rename = "U")]
    Unisex,
    #[serde(rename = "K")]
    Kids,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Men => "M",
            Audience::Women => "W",
            Audience::Unisex => "U",
            Audience::Kids => "K",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Audience::Men),
            "W" => Ok(Audience::Women),
            "U" => Ok(Audience::Unisex),
            "K" => Ok(Audience::Kids),
            other => Err(format!("unknown audience: {}", other)),
        }
    }
}

/// Read-only view of a catalog product. The catalog service owns the data;
/// this subsystem only reads it for search, ranking and index sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub market: Market,
    pub audience: Audience,
    pub price: f64,
    pub rating: f32,
    pub image: Option<String>,
    pub in_stock: bool,
    pub is_active: bool,
    pub occasion_tags: Vec<String>,
    pub style_tags: Vec<String>,
    pub season_tags: Vec<String>,
    pub color_tags: Vec<String>,
    pub material_tags: Vec<String>,
    pub age_group_tags: Vec<String>,
    pub activity_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Build the text blob that gets embedded for this product.
    ///
    /// Name, brand, description and all tag groups are flattened into one
    /// pipe-separated string. Indexing and query encoding must both go
    /// through the same encoder for cosine similarity to be meaningful, so
    /// this is the only place item text is assembled.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::new();

        if !self.name.trim().is_empty() {
            parts.push(format!("Product: {}", self.name.trim()));
        }
        if let Some(brand) = self.brand.as_deref().filter(|b| !b.trim().is_empty()) {
            parts.push(format!("Brand: {}", brand.trim()));
        }
        if let Some(desc) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            parts.push(format!("Description: {}", desc.trim()));
        }
        parts.push(format!("Audience: {}", self.audience));

        for (label, tags) in [
            ("Style", &self.style_tags),
            ("Occasions", &self.occasion_tags),
            ("Seasons", &self.season_tags),
            ("Colors", &self.color_tags),
            ("Materials", &self.material_tags),
            ("Age groups", &self.age_group_tags),
            ("Activities", &self.activity_tags),
        ] {
            if !tags.is_empty() {
                parts.push(format!("{}: {}", label, tags.join(", ")));
            }
        }

        // A product with no name, description or tags has nothing to embed
        if parts.len() <= 1 {
            return String::new();
        }

        normalize_text(&parts.join(" | "))
    }
}

lazy_static::lazy_static! {
    static ref WHITESPACE: regex::Regex = regex::Regex::new(r"\s+").unwrap();
}

/// NFKC-normalize and collapse whitespace so equal-looking inputs produce
/// the same embedding cache key.
pub fn normalize_text(text: &str) -> String {
    let normalized: String = text.trim().nfkc().collect();
    WHITESPACE.replace_all(&normalized, " ").into_owned()
}

/// A product returned by the search stage, eligible for ranking. Carries
/// the similarity score when it came from the vector index; attribute
/// fallback results have no score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub product: Product,
    pub score: Option<f32>,
}

#[cfg(test)]
pub(crate) fn test_product(id: i64, name: &str) -> Product {
    Product {
        id,
        name: name.to_string(),
        brand: Some("Acme".to_string()),
        description: Some("A test product".to_string()),
        market: Market::Kg,
        audience: Audience::Unisex,
        price: 1000.0,
        rating: 4.0,
        image: None,
        in_stock: true,
        is_active: true,
        occasion_tags: vec![],
        style_tags: vec![],
        season_tags: vec![],
        color_tags: vec![],
        material_tags: vec![],
        age_group_tags: vec![],
        activity_tags: vec![],
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searchable_text_includes_tags() {
        let mut product = test_product(1, "Slim Fit Party Shirt");
        product.occasion_tags = vec!["party".to_string(), "night_out".to_string()];
        product.style_tags = vec!["trendy".to_string()];

        let text = product.searchable_text();
        assert!(text.contains("Product: Slim Fit Party Shirt"));
        assert!(text.contains("Occasions: party, night_out"));
        assert!(text.contains("Style: trendy"));
    }

    #[test]
    fn searchable_text_empty_for_bare_product() {
        let mut product = test_product(1, "");
        product.brand = None;
        product.description = None;

        assert!(product.searchable_text().is_empty());
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  black\t\tdress\n shirt "), "black dress shirt");
    }

    #[test]
    fn market_round_trips_as_str() {
        for market in [Market::Kg, Market::Us, Market::All] {
            assert_eq!(market.as_str().parse::<Market>().unwrap(), market);
        }
    }
}
