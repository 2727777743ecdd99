use std::env::var;

use thiserror::Error;
use tracing::warn;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing::level_filters::LevelFilter;

/// Output layout of emitted log lines, selected through `RUST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    /// Unknown values fall back to the compact layout.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        let raw = var("RUST_LOG_FORMAT")
            .inspect_err(|error| {
                // No subscriber is installed yet, so this only shows up on a re-init.
                warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
            })
            .unwrap_or_default();
        Self::parse(&raw)
    }
}

#[derive(Debug, Error)]
#[error("global tracing subscriber already installed: {0}")]
pub struct InitError(String);

/// Install the global subscriber, panicking if one is already set.
pub fn init(default_level: LevelFilter) {
    if let Err(error) = try_init(default_level) {
        panic!("{error}");
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn try_init(default_level: LevelFilter) -> Result<(), InitError> {
    let env_filter =
        EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

    let log_layer = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => {
            tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed()
        }
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(log_layer)
        .try_init()
        .map_err(|error| InitError(error.to_string()))
}
