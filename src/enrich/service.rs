use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("quota exhausted: {0}")]
    Quota(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Other(String),
    #[error("empty reply")]
    Empty,
}

impl ServiceError {
    /// Sorts a raw error message into the retry classes the client knows about.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("quota") || lower.contains("429") || lower.contains("resource_exhausted")
        {
            ServiceError::Quota(message)
        } else if lower.contains("rate limit") {
            ServiceError::RateLimited(message)
        } else {
            ServiceError::Other(message)
        }
    }
}

/// External text-generation service asked for coordinates.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_known_messages() {
        assert!(matches!(
            ServiceError::classify("HTTP 429: Too Many Requests"),
            ServiceError::Quota(_)
        ));
        assert!(matches!(
            ServiceError::classify("You exceeded your current Quota"),
            ServiceError::Quota(_)
        ));
        assert!(matches!(
            ServiceError::classify("Rate limit reached for model"),
            ServiceError::RateLimited(_)
        ));
        assert!(matches!(
            ServiceError::classify("HTTP 503: overloaded"),
            ServiceError::Other(_)
        ));
    }
}
