use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

/// Recognized occasion values. Extraction output outside this list is
/// dropped so downstream filters never see arbitrary model output.
pub const OCCASION_VALUES: &[&str] = &[
    "party", "work", "wedding", "casual", "date", "gym", "beach", "night_out", "clubbing",
];

/// Recognized style values.
pub const STYLE_VALUES: &[&str] = &[
    "casual", "formal", "sporty", "elegant", "trendy", "classic", "modern",
];

/// Recognized season values.
pub const SEASON_VALUES: &[&str] = &["summer", "winter", "spring", "fall", "all-season"];

static OCCASIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| OCCASION_VALUES.iter().copied().collect());
static STYLES: Lazy<HashSet<&'static str>> = Lazy::new(|| STYLE_VALUES.iter().copied().collect());
static SEASONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| SEASON_VALUES.iter().copied().collect());

/// Structured shopping intent extracted from the conversation.
///
/// Every field is optional: an empty filter is valid and means a broad
/// search over the most popular active items in the market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequirementFilter {
    #[serde(default)]
    pub occasion: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub season: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
}

impl RequirementFilter {
    /// True when no field constrains the search.
    pub fn is_empty(&self) -> bool {
        self.occasion.is_empty()
            && self.style.is_empty()
            && self.season.is_empty()
            && self.colors.is_empty()
            && self.price_min.is_none()
            && self.price_max.is_none()
    }

    /// Clean up raw model output into a filter that honors the pinned
    /// vocabulary and price invariants.
    ///
    /// Tag values are lowercased, deduplicated and checked against the
    /// recognized vocabulary; unrecognized values are dropped, not errors.
    /// Colors are free-form and only normalized. Negative prices are
    /// discarded and a reversed min/max pair is swapped.
    pub fn sanitized(self) -> Self {
        let mut filter = Self {
            occasion: retain_known(self.occasion, &OCCASIONS),
            style: retain_known(self.style, &STYLES),
            season: retain_known(self.season, &SEASONS),
            colors: dedup_normalized(self.colors),
            price_min: self.price_min.filter(|p| *p >= 0.0),
            price_max: self.price_max.filter(|p| *p >= 0.0),
        };

        if let (Some(min), Some(max)) = (filter.price_min, filter.price_max) {
            if min > max {
                filter.price_min = Some(max);
                filter.price_max = Some(min);
            }
        }

        filter
    }
}

fn dedup_normalized(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

fn retain_known(values: Vec<String>, vocabulary: &HashSet<&'static str>) -> Vec<String> {
    dedup_normalized(values)
        .into_iter()
        .filter(|v| vocabulary.contains(v.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_unknown_values() {
        let filter = RequirementFilter {
            occasion: vec!["party".to_string(), "space_travel".to_string()],
            style: vec!["Trendy".to_string(), "baroque".to_string()],
            season: vec!["summer".to_string()],
            ..Default::default()
        }
        .sanitized();

        assert_eq!(filter.occasion, vec!["party"]);
        assert_eq!(filter.style, vec!["trendy"]);
        assert_eq!(filter.season, vec!["summer"]);
    }

    #[test]
    fn sanitize_deduplicates_preserving_order() {
        let filter = RequirementFilter {
            occasion: vec![
                "party".to_string(),
                "PARTY".to_string(),
                "night_out".to_string(),
            ],
            ..Default::default()
        }
        .sanitized();

        assert_eq!(filter.occasion, vec!["party", "night_out"]);
    }

    #[test]
    fn sanitize_swaps_reversed_price_bounds() {
        let filter = RequirementFilter {
            price_min: Some(5000.0),
            price_max: Some(1000.0),
            ..Default::default()
        }
        .sanitized();

        assert_eq!(filter.price_min, Some(1000.0));
        assert_eq!(filter.price_max, Some(5000.0));
    }

    #[test]
    fn sanitize_discards_negative_prices() {
        let filter = RequirementFilter {
            price_min: Some(-10.0),
            price_max: Some(2000.0),
            ..Default::default()
        }
        .sanitized();

        assert_eq!(filter.price_min, None);
        assert_eq!(filter.price_max, Some(2000.0));
    }

    #[test]
    fn empty_filter_is_valid() {
        let filter = RequirementFilter::default().sanitized();
        assert!(filter.is_empty());
    }
}
