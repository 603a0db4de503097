use super::report::{
    Origin, RegionFailure, RegionReport, RegionResolution, ResolvedTarget, RunResult,
};
use crate::bulletin::extract::{Event, RegionEvents};
use crate::db::coordinate_cache::CoordinateCache;
use crate::db::fact::{PutOutcome, DEFAULT_CONFIDENCE};
use crate::enrich::client::RateLimitedClient;
use crate::enrich::reply::{parse_reply, EnrichmentReply};
use crate::error::ResolveError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Provenance stored with facts obtained from the enrichment service.
pub const ENRICHMENT_ORIGIN: &str = "enrichment";

pub struct Orchestrator {
    cache: CoordinateCache,
    client: Arc<RateLimitedClient>,
}

impl Orchestrator {
    pub fn new(cache: CoordinateCache, client: Arc<RateLimitedClient>) -> Self {
        Self { cache, client }
    }

    /// Resolves one region: cache lookups first, then a single enrichment call
    /// covering only the localities the cache could not answer.
    pub async fn resolve(
        &self,
        region: &str,
        events: &[Event],
    ) -> Result<RegionResolution, RegionFailure> {
        let mut resolution = RegionResolution::new(region);
        match self.resolve_into(region, events, &mut resolution).await {
            Ok(()) => Ok(resolution),
            Err(error) => Err(RegionFailure {
                error,
                partial: resolution,
            }),
        }
    }

    async fn resolve_into(
        &self,
        region: &str,
        events: &[Event],
        resolution: &mut RegionResolution,
    ) -> Result<(), ResolveError> {
        let region_fact = self.cache.get_region(region).await?;
        resolution.region_coordinates = region_fact.as_ref().map(|fact| fact.coordinates);

        let mut unresolved = Vec::new();
        for event in events {
            match self.cache.get_locality(&event.locality, region).await? {
                Some(fact) => resolution.push(ResolvedTarget::from_fact(event, &fact, Origin::Cache)),
                None => unresolved.push(event.clone()),
            }
        }

        if unresolved.is_empty() && region_fact.is_some() {
            tracing::debug!("{} fully resolved from cache", region);
            return Ok(());
        }

        let cleaned = self.client.enrich(region, &unresolved).await?;
        let reply = match parse_reply(&cleaned) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Unparseable reply for {}: {}", region, cleaned);
                return Err(e);
            }
        };
        if region_fact.is_none() {
            self.merge_region(region, &reply, resolution).await?;
        }
        self.merge_targets(region, reply, &unresolved, resolution).await
    }

    async fn merge_region(
        &self,
        region: &str,
        reply: &EnrichmentReply,
        resolution: &mut RegionResolution,
    ) -> Result<(), ResolveError> {
        let Some(coordinates) = reply.region_coordinates else {
            return Ok(());
        };
        let confidence = reply.region_confidence.unwrap_or(DEFAULT_CONFIDENCE);

        match self
            .cache
            .put_region(region, coordinates, confidence, ENRICHMENT_ORIGIN)
            .await?
        {
            PutOutcome::Rejected => resolution.reject(region, coordinates),
            PutOutcome::Stored => resolution.region_coordinates = Some(coordinates),
            PutOutcome::AlreadyPresent => {
                // another worker stored this region first; report what is persisted
                resolution.region_coordinates = self
                    .cache
                    .get_region(region)
                    .await?
                    .map(|fact| fact.coordinates);
            }
        }

        Ok(())
    }

    /// Persists every valid returned locality that was asked for and joins it
    /// with the events that named it. Localities are stored under the event's
    /// spelling so the next lookup for that event hits the cache. Localities the
    /// reply volunteers are dropped so they never overwrite known facts.
    async fn merge_targets(
        &self,
        region: &str,
        reply: EnrichmentReply,
        unresolved: &[Event],
        resolution: &mut RegionResolution,
    ) -> Result<(), ResolveError> {
        let mut covered = vec![false; unresolved.len()];

        for target in reply.targets {
            let city = target.city.trim();
            let matching: Vec<usize> = unresolved
                .iter()
                .enumerate()
                .filter(|(i, event)| !covered[*i] && same_locality(&event.locality, city))
                .map(|(i, _)| i)
                .collect();
            let Some(&first) = matching.first() else {
                tracing::debug!(
                    "Ignoring unrequested locality {} ({} x{}) in {}",
                    city,
                    target.weapon_type,
                    target.count,
                    region
                );
                continue;
            };
            let name = unresolved[first].locality.as_str();
            let confidence = target.confidence.unwrap_or(DEFAULT_CONFIDENCE);

            let outcome = self
                .cache
                .put_locality(name, region, target.coordinates, confidence, ENRICHMENT_ORIGIN)
                .await?;
            if outcome.is_rejected() {
                resolution.reject(name, target.coordinates);
                continue;
            }

            for i in matching {
                covered[i] = true;
                resolution.push(ResolvedTarget::new(
                    &unresolved[i],
                    target.coordinates,
                    confidence,
                    Origin::Enrichment,
                ));
            }
        }

        resolution.unresolved = unresolved
            .iter()
            .zip(&covered)
            .filter(|(_, covered)| !**covered)
            .map(|(event, _)| event.locality.clone())
            .collect();
        if !resolution.unresolved.is_empty() {
            tracing::warn!(
                "No coordinates for {:?} in {}",
                resolution.unresolved,
                region
            );
        }

        Ok(())
    }

    /// Resolves every region with at most `concurrency` regions in flight.
    /// A failing region never aborts the others; a region whose task panics
    /// is reported as failed with kind `aborted`.
    pub async fn resolve_all(self: &Arc<Self>, regions: RegionEvents, concurrency: usize) -> RunResult {
        let width = concurrency.max(1);
        tracing::info!("Processing {} regions with width {}", regions.len(), width);

        let permits = Arc::new(Semaphore::new(width));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(regions.len());
        for (region, events) in regions {
            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let name = region.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let _slot = InFlight::enter(&in_flight, &peak);
                orchestrator.resolve(&region, &events).await
            });
            handles.push((name, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (region, handle) in handles {
            let report = match handle.await {
                Ok(Ok(resolution)) => {
                    tracing::info!("Resolved region: {}", resolution.region);
                    RegionReport::from(Ok(resolution))
                }
                Ok(Err(failure)) => {
                    tracing::error!("Failed region: {}", failure);
                    RegionReport::from(Err(failure))
                }
                Err(e) => {
                    tracing::error!("Region task for {} aborted: {}", region, e);
                    RegionReport::aborted(&region, format!("region task aborted: {}", e))
                }
            };
            reports.push(report);
        }

        let cache_stats = match self.cache.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!("Could not read cache statistics: {}", e);
                None
            }
        };

        RunResult::aggregate(reports, width, peak.load(Ordering::SeqCst), cache_stats)
    }
}

/// Counts a region as in flight until dropped, including on panic.
struct InFlight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn same_locality(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
