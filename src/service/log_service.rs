use crate::prelude::*;
use sentry::{release_name, ClientInitGuard, ClientOptions};
use sentry_tracing::EventFilter;
use std::env::var;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the tracing subscriber. Logs go to stderr so stdout stays free for
/// the JSON result. ERROR events are forwarded to Sentry when `SENTRY_DSN` is set;
/// the returned guard must live until shutdown.
pub fn set_logging() -> Result<Option<ClientInitGuard>> {
    let guard = match var("SENTRY_DSN") {
        Ok(dsn) if !dsn.is_empty() => Some(sentry::init((
            dsn,
            ClientOptions {
                release: release_name!(),
                ..Default::default()
            },
        ))),
        _ => None,
    };

    let sentry_layer = guard.as_ref().map(|_| {
        sentry_tracing::layer().event_filter(|md| match md.level() {
            &tracing::Level::ERROR => EventFilter::Event,
            _ => EventFilter::Ignore,
        })
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .try_init()?;

    if guard.is_none() {
        tracing::info!("SENTRY_DSN not set, error reporting disabled");
    }

    Ok(guard)
}
