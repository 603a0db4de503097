use crate::prelude::*;
use anyhow::anyhow;
use std::env::var;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_timeout: Duration,
    pub db_path: PathBuf,
    pub pool_size: u32,
    pub api_delay: Duration,
    pub max_retries: u32,
    pub max_workers: usize,
    pub instructions_path: Option<PathBuf>,
    pub bulletin_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub run_interval: Option<Duration>,
}

pub async fn load_settings() -> Result<Settings> {
    let bulletin_path = match std::env::args().nth(1) {
        Some(path) => Some(PathBuf::from(path)),
        None => get_optional("BULLETIN_PATH")?,
    };
    let run_interval = get_run_interval(
        get_optional::<u64>("RUN_INTERVAL_SECS")?.map(Duration::from_secs),
        bulletin_path.as_deref(),
    )?;

    Ok(Settings {
        gemini_api_key: get_gemini_api_key().await?,
        gemini_model: get_or("GEMINI_MODEL", "gemini-2.0-flash-lite".to_string())?,
        gemini_timeout: Duration::from_secs(get_or("GEMINI_TIMEOUT_SECS", 60)?),
        db_path: get_or("COORDINATES_DB_PATH", PathBuf::from("db/cities_coordinates.db"))?,
        pool_size: get_pool_size().await?,
        api_delay: get_api_delay().await?,
        max_retries: get_or("API_MAX_RETRIES", 3)?,
        max_workers: get_or("MAX_WORKERS", 2)?,
        instructions_path: get_optional("MODEL_INSTRUCTIONS_PATH")?,
        bulletin_path,
        output_path: get_optional("OUTPUT_PATH")?,
        run_interval,
    })
}

/// Scheduled runs re-read their input every tick, which stdin cannot provide.
pub fn get_run_interval(
    run_interval: Option<Duration>,
    bulletin_path: Option<&Path>,
) -> Result<Option<Duration>> {
    match (run_interval, bulletin_path) {
        (Some(_), None) => {
            let err = "RUN_INTERVAL_SECS requires BULLETIN_PATH or a bulletin file argument";
            tracing::error!(err);
            Err(anyhow!(err))
        }
        _ => Ok(run_interval),
    }
}

pub async fn get_gemini_api_key() -> Result<String> {
    match var("GEMINI_API_KEY") {
        Ok(api_key) => match api_key.is_empty() {
            true => {
                let err = "GEMINI_API_KEY is empty";
                tracing::error!(err);
                Err(anyhow!(err))
            }
            false => Ok(api_key),
        },
        Err(e) => {
            let err = format!("GEMINI_API_KEY not found in environment: {:?}", e);
            tracing::error!(err);
            Err(anyhow!(err))
        }
    }
}

pub async fn get_pool_size() -> Result<u32> {
    match get_or("DB_POOL_SIZE", 5u32)? {
        0 => {
            let err = "DB_POOL_SIZE must be at least 1";
            tracing::error!(err);
            Err(anyhow!(err))
        }
        size => Ok(size),
    }
}

pub async fn get_api_delay() -> Result<Duration> {
    let seconds: f64 = get_or("API_DELAY_SECS", 2.0)?;
    match Duration::try_from_secs_f64(seconds) {
        Ok(delay) => Ok(delay),
        Err(e) => {
            let err = format!("Invalid API_DELAY_SECS {}: {}", seconds, e);
            tracing::error!(err);
            Err(anyhow!(err))
        }
    }
}

fn get_optional<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                let err = format!("Failed to parse {}: {}", name, e);
                tracing::error!(err);
                Err(anyhow!(err))
            }
        },
        Err(_) => Ok(None),
    }
}

fn get_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    Ok(get_optional(name)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    // each test uses its own variable names; the process environment is shared
    #[test]
    fn missing_and_blank_values_fall_back() {
        std::env::remove_var("STRIKE_TEST_MISSING");
        std::env::set_var("STRIKE_TEST_BLANK", "  ");
        assert_eq!(get_or("STRIKE_TEST_MISSING", 7u32).unwrap(), 7);
        assert_eq!(get_or("STRIKE_TEST_BLANK", 7u32).unwrap(), 7);
    }

    #[test]
    fn values_are_parsed() {
        std::env::set_var("STRIKE_TEST_WORKERS", " 4 ");
        std::env::set_var("STRIKE_TEST_BAD", "four");
        assert_eq!(get_or("STRIKE_TEST_WORKERS", 2usize).unwrap(), 4);
        assert!(get_or("STRIKE_TEST_BAD", 2usize).is_err());
    }

    #[test]
    fn scheduled_runs_need_a_bulletin_file() {
        let every_minute = Some(Duration::from_secs(60));
        let bulletin = PathBuf::from("bulletin.txt");

        assert!(get_run_interval(every_minute, None).is_err());
        assert_eq!(
            get_run_interval(every_minute, Some(&bulletin)).unwrap(),
            every_minute
        );
        assert_eq!(get_run_interval(None, None).unwrap(), None);
    }
}
