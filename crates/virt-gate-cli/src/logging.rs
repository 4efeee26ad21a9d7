// crates/virt-gate-cli/src/logging.rs
// ============================================================================
// Module: CLI Logging
// Description: Tracing subscriber installation for the Virt Gate binary.
// Purpose: Route structured logs to stderr or a log file, never stdout.
// Dependencies: tracing-subscriber, virt-gate-config
// ============================================================================

//! ## Overview
//! Installs the global `tracing` subscriber from the `[logging]` section.
//! Stdout carries the stdio transport, so logs go to stderr unless a log file
//! is configured. `RUST_LOG` overrides the configured level when set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use virt_gate_config::LogFormat;
use virt_gate_config::LoggingConfig;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    File {
        /// Configured log file path.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Builds the level filter, preferring `RUST_LOG` over the configured level.
pub fn build_filter(config: &LoggingConfig, env_directive: Option<&str>) -> EnvFilter {
    env_directive
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(config.level.as_str()))
}

/// Opens the log file in append mode.
fn open_log_file(path: &str) -> Result<File, LoggingError> {
    OpenOptions::new().create(true).append(true).open(Path::new(path)).map_err(|source| LoggingError::File {
        path: path.to_string(),
        source,
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when the log file cannot be opened or a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(config, env_directive.as_deref());
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|err| LoggingError::Install(err.to_string()))
}
