//! Observability infrastructure for tilecheck.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization and the span constructors every probe unit and
//! page batch runs under, so log lines can be filtered by collection or page.

use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {other} (expected json or pretty)")),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tilecheck_flow=debug`)
///
/// # Example
///
/// ```rust
/// use tilecheck_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init: a test harness or host may already own the global subscriber.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber_fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(subscriber_fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates the span a single classify+probe unit runs under.
///
/// # Example
///
/// ```rust
/// use tilecheck_core::observability::probe_span;
///
/// let span = probe_span("C1234-PROV", 3);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn probe_span(concept_id: &str, page_index: usize) -> Span {
    tracing::info_span!("probe", concept_id = concept_id, page = page_index)
}

/// Creates the span one page batch runs under.
#[must_use]
pub fn batch_span(operation: &str, page_index: usize, page_size: usize) -> Span {
    tracing::info_span!(
        "batch",
        op = operation,
        page = page_index,
        page_size = page_size,
    )
}

/// Wrapper that hides a secret from `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a secret value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns the wrapped value.
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
