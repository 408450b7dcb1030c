//! Structured logging via `tracing`.
//!
//! CLI modes log to stderr so stdout stays machine-readable; the TUI logs to a
//! file in the data root so the alternate screen is not corrupted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding a filter directive (e.g. `promptdeck=debug`).
pub const LOG_ENV: &str = "PROMPTDECK_LOG";

#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    fn default_level(&self) -> &'static str {
        match self {
            LogTarget::Stderr => "warn",
            LogTarget::File(_) => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive; falls back to a per-target default when unset.
    pub level: Option<String>,
    pub json: bool,
    pub target: LogTarget,
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(opts: &LogOptions) -> Result<()> {
    let filter = build_env_filter(opts)?;

    let (writer, ansi) = match &opts.target {
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
    };

    let base = Registry::default().with(filter);
    // try_init fails only when a subscriber is already installed; keep the first one.
    let _ = if opts.json {
        base.with(fmt::layer().json().with_target(true).with_writer(writer))
            .try_init()
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .try_init()
    };
    Ok(())
}

fn build_env_filter(opts: &LogOptions) -> Result<EnvFilter> {
    let level = opts
        .level
        .as_deref()
        .unwrap_or_else(|| opts.target.default_level());
    EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))
}
