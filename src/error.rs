use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a region (or a single fact) could not be resolved. `Validation` only
/// ever applies to single facts and never fails a region. `Aborted` marks a
/// region whose worker task panicked or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Quota,
    RateLimited,
    Transient,
    Parse,
    Validation,
    Store,
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Quota => "quota",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Parse => "parse",
            FailureKind::Validation => "validation",
            FailureKind::Store => "store",
            FailureKind::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("enrichment quota exhausted after {attempts} attempts: {message}")]
    Quota { attempts: u32, message: String },
    #[error("enrichment rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },
    #[error("enrichment failed after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    #[error("could not parse enrichment reply: {0}")]
    Parse(String),
    #[error("coordinate store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ResolveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResolveError::Quota { .. } => FailureKind::Quota,
            ResolveError::RateLimited { .. } => FailureKind::RateLimited,
            ResolveError::Transient { .. } => FailureKind::Transient,
            ResolveError::Parse(_) => FailureKind::Parse,
            ResolveError::Store(_) => FailureKind::Store,
        }
    }
}
