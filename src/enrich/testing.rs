use super::clock::Clock;
use super::service::{EnrichmentService, ServiceError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Virtual clock: `sleep` records the duration and advances time instantly.
pub struct FakeClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

type Script = Box<dyn Fn(usize, &str) -> Result<String, ServiceError> + Send + Sync>;

/// Enrichment service answering from a script and recording every prompt.
pub struct ScriptedService {
    script: Script,
    clock: Option<Arc<FakeClock>>,
    calls: Mutex<Vec<(String, Option<Instant>)>>,
}

impl ScriptedService {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &str) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            clock: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn failing(error: ServiceError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Answers in order; the last answer repeats.
    pub fn sequence(answers: Vec<Result<String, ServiceError>>) -> Self {
        Self::new(move |call, _| {
            let index = call.min(answers.len().saturating_sub(1));
            answers[index].clone()
        })
    }

    pub fn timed(reply: &str, clock: Arc<FakeClock>) -> Self {
        Self::replying(reply).with_clock(clock)
    }

    pub fn with_clock(mut self, clock: Arc<FakeClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(prompt, _)| prompt.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl EnrichmentService for ScriptedService {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let at = self.clock.as_ref().map(|clock| clock.now());
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((prompt.to_string(), at));
            calls.len() - 1
        };

        (self.script)(call, prompt)
    }
}
