//! Tracing subscriber setup.
//!
//! Library code logs through `log` and opens `tracing` spans. `init_tracing`
//! routes both into a single `tracing-subscriber` pipeline.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        let subscriber = registry.with(fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = registry.with(fmt::layer().with_target(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        // Route `log` records into the subscriber.
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!("log bridge already installed: {}", e);
        }
    }

    installed
}
