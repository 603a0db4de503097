use super::var_service::Settings;
use crate::bulletin::extract::BulletinParser;
use crate::bulletin::merge::{merge_latest, split_messages};
use crate::db::coordinate_cache::CoordinateCache;
use crate::db::region_name::CorrectionTable;
use crate::enrich::client::{RateLimitedClient, RetryPolicy, DEFAULT_INSTRUCTIONS};
use crate::enrich::clock::TokioClock;
use crate::enrich::gemini::GeminiService;
use crate::prelude::*;
use crate::resolve::orchestrator::Orchestrator;
use crate::resolve::report::RunResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::interval;

pub async fn build_orchestrator(settings: &Settings) -> Result<Arc<Orchestrator>> {
    if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let cache = CoordinateCache::open(
        &settings.db_path,
        settings.pool_size,
        Arc::new(CorrectionTable::default()),
    )
    .await?;
    cache.reconcile_region_duplicates().await?;

    let instructions = match &settings.instructions_path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => DEFAULT_INSTRUCTIONS.to_string(),
    };
    let service = GeminiService::new(
        settings.gemini_api_key.clone(),
        settings.gemini_model.clone(),
        settings.gemini_timeout,
    )?;
    let client = RateLimitedClient::new(
        Arc::new(service),
        Arc::new(TokioClock),
        RetryPolicy {
            max_attempts: settings.max_retries,
            throttle_delay: settings.api_delay,
        },
        instructions,
    );

    Ok(Arc::new(Orchestrator::new(cache, Arc::new(client))))
}

pub async fn schedule_resolution(
    settings: &Settings,
    orchestrator: &Arc<Orchestrator>,
    period: Duration,
) -> Result<()> {
    let mut interval = interval(period);

    loop {
        interval.tick().await;
        if let Err(e) = run_resolution(settings, orchestrator).await {
            tracing::error!("Resolution run failed: {:?}", e);
        }
    }
}

pub async fn run_resolution(settings: &Settings, orchestrator: &Arc<Orchestrator>) -> Result<RunResult> {
    let text = read_bulletin(settings).await?;
    let result = resolve_text(orchestrator, &text, settings.max_workers).await?;
    write_result(settings, &result).await?;

    tracing::info!(
        "Resolved {} targets in {} regions ({} failed), {} units",
        result.total_targets,
        result.total_regions,
        result.failed_regions,
        result.total_units
    );
    for report in result.failures() {
        tracing::warn!(
            "Region {} not resolved: {}",
            report.resolution.region,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(result)
}

/// Merges multi-message input, extracts events and resolves every region.
pub async fn resolve_text(
    orchestrator: &Arc<Orchestrator>,
    text: &str,
    max_workers: usize,
) -> Result<RunResult> {
    let messages = split_messages(text);
    let bulletin = match messages.len() {
        0 | 1 => text.to_string(),
        _ => merge_latest(&messages.into_iter().enumerate().collect::<Vec<_>>()),
    };

    let regions = BulletinParser::new()?.extract(&bulletin);
    Ok(orchestrator.resolve_all(regions, max_workers).await)
}

async fn read_bulletin(settings: &Settings) -> Result<String> {
    match &settings.bulletin_path {
        Some(path) => Ok(tokio::fs::read_to_string(path).await?),
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

async fn write_result(settings: &Settings, result: &RunResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    match &settings.output_path {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{}", json),
    }

    Ok(())
}
