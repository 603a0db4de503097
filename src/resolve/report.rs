use crate::bulletin::extract::Event;
use crate::db::fact::{CacheStats, Coordinates, LocalityFact};
use crate::error::{FailureKind, ResolveError};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Cache,
    Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTarget {
    pub locality: String,
    pub category: String,
    pub count: u32,
    #[serde(flatten)]
    pub coordinates: Coordinates,
    pub confidence: f64,
    pub origin: Origin,
}

impl ResolvedTarget {
    pub fn from_fact(event: &Event, fact: &LocalityFact, origin: Origin) -> Self {
        Self::new(event, fact.coordinates, fact.confidence, origin)
    }

    pub fn new(event: &Event, coordinates: Coordinates, confidence: f64, origin: Origin) -> Self {
        Self {
            locality: event.locality.clone(),
            category: event.category.clone(),
            count: event.count,
            coordinates,
            confidence,
            origin,
        }
    }
}

/// A fact the enrichment service returned that failed bounding-box validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedFact {
    pub name: String,
    #[serde(flatten)]
    pub coordinates: Coordinates,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionResolution {
    pub region: String,
    pub region_coordinates: Option<Coordinates>,
    pub targets: Vec<ResolvedTarget>,
    pub unresolved: Vec<String>,
    pub rejected: Vec<RejectedFact>,
    pub unit_count: u64,
    pub categories: BTreeSet<String>,
}

impl RegionResolution {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            region_coordinates: None,
            targets: Vec::new(),
            unresolved: Vec::new(),
            rejected: Vec::new(),
            unit_count: 0,
            categories: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, target: ResolvedTarget) {
        self.unit_count = self.unit_count.saturating_add(u64::from(target.count));
        self.categories.insert(target.category.clone());
        self.targets.push(target);
    }

    pub fn reject(&mut self, name: &str, coordinates: Coordinates) {
        self.rejected.push(RejectedFact {
            name: name.to_string(),
            coordinates,
            kind: FailureKind::Validation,
        });
    }
}

/// A region whose resolution failed. `partial` holds whatever was resolved
/// before the failure.
#[derive(Debug, Error)]
#[error("region {} failed: {error}", .partial.region)]
pub struct RegionFailure {
    pub error: ResolveError,
    pub partial: RegionResolution,
}

impl RegionFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    Resolved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionReport {
    pub status: RegionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub resolution: RegionResolution,
}

impl RegionReport {
    /// Report for a region whose task ended without producing a result.
    pub fn aborted(region: &str, message: String) -> Self {
        Self {
            status: RegionStatus::Failed,
            failure: Some(FailureKind::Aborted),
            error: Some(message),
            resolution: RegionResolution::new(region),
        }
    }
}

impl From<Result<RegionResolution, RegionFailure>> for RegionReport {
    fn from(outcome: Result<RegionResolution, RegionFailure>) -> Self {
        match outcome {
            Ok(resolution) => Self {
                status: RegionStatus::Resolved,
                failure: None,
                error: None,
                resolution,
            },
            Err(failure) => Self {
                status: RegionStatus::Failed,
                failure: Some(failure.kind()),
                error: Some(failure.error.to_string()),
                resolution: failure.partial,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub generated_at: String,
    pub processing_mode: String,
    pub regions: Vec<RegionReport>,
    pub total_regions: usize,
    pub failed_regions: usize,
    pub total_targets: usize,
    pub categories: BTreeSet<String>,
    pub total_units: u64,
    pub peak_in_flight: usize,
    pub cache_stats: Option<CacheStats>,
}

impl RunResult {
    /// Totals count resolved regions only; failed regions are listed but excluded.
    pub fn aggregate(
        regions: Vec<RegionReport>,
        concurrency: usize,
        peak_in_flight: usize,
        cache_stats: Option<CacheStats>,
    ) -> Self {
        let resolved = || {
            regions
                .iter()
                .filter(|report| report.status == RegionStatus::Resolved)
                .map(|report| &report.resolution)
        };

        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            processing_mode: match concurrency {
                0 | 1 => "sequential".to_string(),
                _ => "parallel".to_string(),
            },
            total_regions: resolved().count(),
            failed_regions: regions.len() - resolved().count(),
            total_targets: resolved().map(|r| r.targets.len()).sum(),
            categories: resolved().flat_map(|r| r.categories.iter().cloned()).collect(),
            total_units: resolved().fold(0u64, |sum, r| sum.saturating_add(r.unit_count)),
            peak_in_flight,
            cache_stats,
            regions,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RegionReport> {
        self.regions
            .iter()
            .filter(|report| report.status == RegionStatus::Failed)
    }
}
