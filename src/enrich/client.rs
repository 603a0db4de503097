use super::clock::Clock;
use super::reply::clean_reply;
use super::service::{EnrichmentService, ServiceError};
use crate::bulletin::extract::Event;
use crate::error::ResolveError;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_INSTRUCTIONS: &str = include_str!("../../data/model_instructions.md");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub throttle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            throttle_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Sleep before the attempt following `attempt` (zero-based) failed with `error`.
    pub fn backoff(&self, error: &ServiceError, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        let factor = 2u32.saturating_pow(attempt);
        match error {
            ServiceError::Quota(_) => {
                Duration::from_secs(10) * factor + Duration::from_secs_f64(rng.gen_range(1.0..=5.0))
            }
            ServiceError::RateLimited(_) => {
                self.throttle_delay * factor + Duration::from_secs_f64(rng.gen_range(1.0..=3.0))
            }
            ServiceError::Other(_) | ServiceError::Empty => {
                Duration::from_secs_f64(1.0 + rng.gen_range(0.5..=1.5))
            }
        }
    }
}

/// Serialises every call to the enrichment service behind one throttle.
///
/// The lock around the last-call timestamp is held for the whole attempt loop,
/// so at most one request is in flight no matter how many regions are being
/// resolved. Consecutive attempts are always at least `throttle_delay` apart.
pub struct RateLimitedClient {
    service: Arc<dyn EnrichmentService>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    instructions: String,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(
        service: Arc<dyn EnrichmentService>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        instructions: String,
    ) -> Self {
        Self {
            service,
            clock,
            policy,
            instructions,
            last_call: Mutex::new(None),
        }
    }

    /// Asks the service for coordinates of `unresolved` localities in `region`.
    /// Returns the reply with fences and surrounding prose removed.
    pub async fn enrich(&self, region: &str, unresolved: &[Event]) -> Result<String, ResolveError> {
        tracing::info!("Enrichment request for {} localities in {}", unresolved.len(), region);
        let prompt = self.build_prompt(region, unresolved);
        let raw = self.call(&prompt).await?;

        Ok(clean_reply(&raw))
    }

    fn build_prompt(&self, region: &str, unresolved: &[Event]) -> String {
        let weapons: Vec<_> = unresolved
            .iter()
            .map(|event| {
                json!({
                    "weapon_type": event.category,
                    "count": event.count,
                    "target_city": event.locality,
                })
            })
            .collect();
        let input = json!({ "region": region, "weapons": weapons });

        format!(
            "{}\n\nINPUT:\n{}\n\nRETURN ONLY JSON:",
            self.instructions.trim(),
            input
        )
    }

    async fn call(&self, prompt: &str) -> Result<String, ResolveError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_call = self.last_call.lock().await;
        let mut last_error = ServiceError::Empty;

        for attempt in 0..max_attempts {
            if let Some(previous) = *last_call {
                let elapsed = self.clock.now().saturating_duration_since(previous);
                if elapsed < self.policy.throttle_delay {
                    let wait = self.policy.throttle_delay - elapsed;
                    tracing::info!("Rate limiting: sleeping for {:.2} seconds", wait.as_secs_f64());
                    self.clock.sleep(wait).await;
                }
            }

            tracing::info!("Making API call (attempt {}/{})", attempt + 1, max_attempts);
            let result = self.service.generate(prompt).await;
            *last_call = Some(self.clock.now());

            let error = match result {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => ServiceError::Empty,
                Err(error) => error,
            };
            tracing::warn!("Enrichment error (attempt {}): {}", attempt + 1, error);

            if attempt + 1 < max_attempts {
                let backoff = self.policy.backoff(&error, attempt);
                tracing::info!("Retrying in {:.2} seconds", backoff.as_secs_f64());
                self.clock.sleep(backoff).await;
            }
            last_error = error;
        }

        tracing::error!("All {} enrichment attempts failed", max_attempts);
        Err(match last_error {
            ServiceError::Quota(message) => ResolveError::Quota {
                attempts: max_attempts,
                message,
            },
            ServiceError::RateLimited(message) => ResolveError::RateLimited {
                attempts: max_attempts,
                message,
            },
            error => ResolveError::Transient {
                attempts: max_attempts,
                message: error.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::testing::{FakeClock, ScriptedService};
    use crate::error::FailureKind;

    fn event(locality: &str) -> Event {
        Event {
            region: "Київщина".to_string(),
            locality: locality.to_string(),
            category: "БпЛА".to_string(),
            count: 2,
        }
    }

    fn client(service: Arc<ScriptedService>, clock: Arc<FakeClock>) -> RateLimitedClient {
        RateLimitedClient::new(
            service,
            clock,
            RetryPolicy::default(),
            "Return coordinates.".to_string(),
        )
    }

    #[tokio::test]
    async fn prompt_carries_only_given_localities() {
        let service = Arc::new(ScriptedService::replying("{\"targets\": []}"));
        let client = client(service.clone(), Arc::new(FakeClock::new()));

        client.enrich("Київщина", &[event("Бровари")]).await.unwrap();

        let prompts = service.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Return coordinates.\n\nINPUT:\n"));
        assert!(prompts[0].ends_with("RETURN ONLY JSON:"));
        let input = prompts[0]
            .split("INPUT:\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\nRETURN").next())
            .unwrap();
        let input: serde_json::Value = serde_json::from_str(input).unwrap();
        assert_eq!(input["region"], "Київщина");
        assert_eq!(input["weapons"][0]["target_city"], "Бровари");
        assert_eq!(input["weapons"][0]["count"], 2);
        assert_eq!(input["weapons"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reply_is_cleaned() {
        let service = Arc::new(ScriptedService::replying("```json\n{\"targets\": []}\n```"));
        let client = client(service, Arc::new(FakeClock::new()));

        let reply = client.enrich("Київщина", &[]).await.unwrap();
        assert_eq!(reply, "{\"targets\": []}");
    }

    #[tokio::test]
    async fn back_to_back_calls_respect_throttle() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::timed("{}", clock.clone()));
        let client = client(service.clone(), clock.clone());

        client.enrich("Київщина", &[event("Бровари")]).await.unwrap();
        client.enrich("Сумщина", &[event("Суми")]).await.unwrap();

        let calls = service.call_times();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(2));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn throttle_only_waits_the_remainder() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::timed("{}", clock.clone()));
        let client = client(service.clone(), clock.clone());

        client.enrich("Київщина", &[]).await.unwrap();
        clock.advance(Duration::from_millis(1500));
        client.enrich("Київщина", &[]).await.unwrap();
        clock.advance(Duration::from_secs(5));
        client.enrich("Київщина", &[]).await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[tokio::test]
    async fn quota_errors_back_off_exponentially() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::failing(ServiceError::Quota("429".to_string())));
        let client = client(service.clone(), clock.clone());

        let err = client.enrich("Київщина", &[event("Бровари")]).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Quota);
        assert_eq!(service.calls(), 3);

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] >= Duration::from_secs(11) && sleeps[0] <= Duration::from_secs(15));
        assert!(sleeps[1] >= Duration::from_secs(21) && sleeps[1] <= Duration::from_secs(25));
    }

    #[tokio::test]
    async fn rate_limit_errors_scale_with_throttle_delay() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::failing(ServiceError::RateLimited(
            "rate limit".to_string(),
        )));
        let client = client(service, clock.clone());

        let err = client.enrich("Київщина", &[]).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RateLimited);

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] >= Duration::from_secs(3) && sleeps[0] <= Duration::from_secs(5));
        assert!(sleeps[1] >= Duration::from_secs(5) && sleeps[1] <= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn empty_replies_are_retried_then_transient() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::replying("   "));
        let client = client(service.clone(), clock.clone());

        let err = client.enrich("Київщина", &[]).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(service.calls(), 3);
        for pause in clock.sleeps() {
            assert!(pause <= Duration::from_millis(2500));
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let clock = Arc::new(FakeClock::new());
        let service = Arc::new(ScriptedService::sequence(vec![
            Err(ServiceError::Other("HTTP 503".to_string())),
            Ok("{\"targets\": []}".to_string()),
        ]));
        let client = client(service.clone(), clock.clone());

        assert!(client.enrich("Київщина", &[]).await.is_ok());
        assert_eq!(service.calls(), 2);
        // backoff (1.5..=2.5s) plus whatever remains of the 2s throttle
        let total: Duration = clock.sleeps().into_iter().sum();
        assert!(total >= Duration::from_secs(2));
    }
}
