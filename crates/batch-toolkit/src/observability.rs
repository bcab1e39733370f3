//! # Observability
//!
//! Installs the global tracing subscriber for `batch-toolkit`.
//!
//! The executor emits `tracing` spans (`batch_execute`, `wave`, `operation`)
//! and events; validation and formatting log through the `log` facade, which
//! is bridged into the same subscriber.

use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Configuration for initializing the observability system.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// The maximum level captured for this crate.
    pub level: Level,
    /// Where formatted events are written.
    pub target: LogTarget,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: LogTarget::default(),
        }
    }
}

impl ObservabilityConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }
}

/// Defines the output target for logs.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    /// Log to the console (stdout).
    #[default]
    Console,
    /// Log to a file, truncating it first.
    File(PathBuf),
}

/// Builds the filter: `RUST_LOG` directives plus `batch_toolkit=<level>`.
pub fn build_filter(level: Level) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    Ok(EnvFilter::from_default_env().add_directive(format!("batch_toolkit={}", level).parse()?))
}

/// Initializes the global tracing subscriber and the `log` bridge.
///
/// Call once at the start of the application.
///
/// # Errors
///
/// Fails if a global subscriber or logger is already installed, or if the
/// log file cannot be created.
pub fn init(config: ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::registry().with(build_filter(config.level)?);

    match config.target {
        LogTarget::Console => {
            let layer = fmt::layer().with_writer(std::io::stdout);
            tracing::subscriber::set_global_default(subscriber.with(layer))?;
        }
        LogTarget::File(path) => {
            let file = std::fs::File::create(path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(file);
            tracing::subscriber::set_global_default(subscriber.with(layer))?;
        }
    };

    tracing_log::LogTracer::init()?;
    Ok(())
}
