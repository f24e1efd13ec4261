//! Altitude and category exclusions applied before clipping.

use airspace_core::{AirspacePolygon, IcaoClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the renderer does not want drawn.
///
/// Excluded airspace is removed before clipping, so a hidden layer never
/// cuts holes in a visible one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayFilter {
    /// Hide airspace whose floor is above this altitude.
    #[serde(default)]
    pub max_floor_ft: Option<f64>,
    /// Category labels, compared case-insensitively.
    #[serde(default)]
    pub excluded_categories: BTreeSet<String>,
    #[serde(default)]
    pub excluded_classes: BTreeSet<IcaoClass>,
}

impl OverlayFilter {
    /// Canonical form: upper-cased categories, whole-foot altitude.
    pub fn normalized(&self) -> Self {
        Self {
            max_floor_ft: self
                .max_floor_ft
                .filter(|value| value.is_finite())
                .map(f64::round),
            excluded_categories: self
                .excluded_categories
                .iter()
                .map(|category| category.trim().to_ascii_uppercase())
                .filter(|category| !category.is_empty())
                .collect(),
            excluded_classes: self.excluded_classes.clone(),
        }
    }

    /// Expects a filter that went through [`OverlayFilter::normalized`].
    pub fn admits(&self, polygon: &AirspacePolygon) -> bool {
        if let Some(max_floor) = self.max_floor_ft {
            if polygon.lower_ft() > max_floor {
                return false;
            }
        }
        if self.excluded_classes.contains(&polygon.icao_class) {
            return false;
        }
        !self
            .excluded_categories
            .contains(&polygon.category.to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.max_floor_ft.is_none()
            && self.excluded_categories.is_empty()
            && self.excluded_classes.is_empty()
    }

    /// Parse comma-separated query values such as `DANGER,RESTRICTED`.
    pub fn from_lists(
        max_floor_ft: Option<f64>,
        categories: Option<&str>,
        classes: Option<&str>,
    ) -> Result<Self, String> {
        let excluded_categories = split_list(categories).map(str::to_string).collect();
        let mut excluded_classes = BTreeSet::new();
        for value in split_list(classes) {
            let class = IcaoClass::parse(value).ok_or_else(|| format!("unknown ICAO class '{value}'"))?;
            excluded_classes.insert(class);
        }
        Ok(Self {
            max_floor_ft,
            excluded_categories,
            excluded_classes,
        }
        .normalized())
    }
}

fn split_list(value: Option<&str>) -> impl Iterator<Item = &str> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
}
