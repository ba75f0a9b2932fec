//! Tracing subscriber setup keyed by deployment environment.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Environment;

/// Initialise the global tracing subscriber.
///
/// `local` gets human-readable output at DEBUG; `dev` structured JSON at
/// DEBUG; `prod` structured JSON at INFO. `RUST_LOG` overrides the default
/// filter in every environment.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_telemetry(environment: Environment) -> Result<()> {
    let default_level = match environment {
        Environment::Local | Environment::Dev => "debug",
        Environment::Prod => "info",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match environment {
        Environment::Local => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        Environment::Dev | Environment::Prod => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("failed to initialise tracing subscriber")?;

    Ok(())
}
