use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

pub const LATITUDE_BOUNDS: RangeInclusive<f64> = 44.0..=52.5;
pub const LONGITUDE_BOUNDS: RangeInclusive<f64> = 22.0..=40.5;
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the point lies inside the covered country's bounding box.
    pub fn in_bounds(&self) -> bool {
        LATITUDE_BOUNDS.contains(&self.latitude) && LONGITUDE_BOUNDS.contains(&self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalityFact {
    pub id: i64,
    pub name: String,
    pub region: String,
    pub coordinates: Coordinates,
    pub confidence: f64,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionFact {
    pub id: i64,
    pub region: String,
    pub coordinates: Coordinates,
    pub confidence: f64,
    pub origin: String,
}

/// Result of a write that passed through bounding-box validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    AlreadyPresent,
    Rejected,
}

impl PutOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, PutOutcome::Rejected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_localities: i64,
    pub distinct_regions: i64,
    pub total_region_facts: i64,
    pub origin_histogram: BTreeMap<String, i64>,
}

pub(super) type LocalityRow = (i64, String, String, f64, f64, Option<f64>, Option<String>);
pub(super) type RegionRow = (i64, String, f64, f64, Option<f64>, Option<String>);

impl From<LocalityRow> for LocalityFact {
    fn from(row: LocalityRow) -> Self {
        let (id, name, region, latitude, longitude, confidence, origin) = row;
        Self {
            id,
            name,
            region,
            coordinates: Coordinates::new(latitude, longitude),
            confidence: confidence.unwrap_or(DEFAULT_CONFIDENCE),
            origin: origin.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

impl From<RegionRow> for RegionFact {
    fn from(row: RegionRow) -> Self {
        let (id, region, latitude, longitude, confidence, origin) = row;
        Self {
            id,
            region,
            coordinates: Coordinates::new(latitude, longitude),
            confidence: confidence.unwrap_or(DEFAULT_CONFIDENCE),
            origin: origin.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_edges_are_inclusive() {
        assert!(Coordinates::new(44.0, 22.0).in_bounds());
        assert!(Coordinates::new(52.5, 40.5).in_bounds());
        assert!(Coordinates::new(50.45, 30.52).in_bounds());
        assert!(!Coordinates::new(60.0, 30.0).in_bounds());
        assert!(!Coordinates::new(50.0, 41.0).in_bounds());
        assert!(!Coordinates::new(f64::NAN, 30.0).in_bounds());
    }
}
