//! Run configuration.
//!
//! Values come from defaults, then `TILECHECK_*` environment variables, then
//! command-line flags. [`RunConfig::validate`] runs after all layers apply.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::cmr::{DEFAULT_CMR_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::classify::ClassifierOptions;
use crate::error::{Error, Result};
use crate::executor::ExecutorOptions;
use crate::model::AccessMode;
use crate::probe::titiler::DEFAULT_TITILER_ENDPOINT;

/// Default collections per catalog page.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Default worker slots.
pub const DEFAULT_CONCURRENCY: usize = 8;
/// Default units per fabric batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default per-unit deadline.
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(180);
/// Default dataset open deadline.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(120);
/// Default store key prefix.
pub const DEFAULT_STORE_PREFIX: &str = "collections";

/// Environment variable names.
pub mod env {
    /// Catalog base URL.
    pub const CATALOG_URL: &str = "TILECHECK_CATALOG_URL";
    /// Tiling service endpoint.
    pub const TILER_ENDPOINT: &str = "TILECHECK_TILER_ENDPOINT";
    /// Result store location (`s3://bucket`, `file://path`, `memory://`).
    pub const STORE: &str = "TILECHECK_STORE";
    /// Result store key prefix.
    pub const STORE_PREFIX: &str = "TILECHECK_STORE_PREFIX";
    /// Preferred link class (`direct` or `external`).
    pub const ACCESS_MODE: &str = "TILECHECK_ACCESS_MODE";
    /// Collections per catalog page.
    pub const PAGE_SIZE: &str = "TILECHECK_PAGE_SIZE";
    /// Cap on collections per run.
    pub const TOTAL: &str = "TILECHECK_TOTAL";
    /// Worker slots.
    pub const CONCURRENCY: &str = "TILECHECK_CONCURRENCY";
    /// Units per fabric batch.
    pub const BATCH_SIZE: &str = "TILECHECK_BATCH_SIZE";
    /// Per-unit deadline in seconds.
    pub const UNIT_TIMEOUT_SECS: &str = "TILECHECK_UNIT_TIMEOUT_SECS";
    /// Dataset open deadline in seconds.
    pub const OPEN_TIMEOUT_SECS: &str = "TILECHECK_OPEN_TIMEOUT_SECS";
    /// Catalog and tiler HTTP timeout in seconds.
    pub const REQUEST_TIMEOUT_SECS: &str = "TILECHECK_REQUEST_TIMEOUT_SECS";
    /// Abort a batch on the first tile generation failure.
    pub const STRICT: &str = "TILECHECK_STRICT";
    /// Report output path.
    pub const OUTPUT: &str = "TILECHECK_OUTPUT";
}

/// Settings for one tilecheck invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Catalog base URL.
    pub catalog_url: String,
    /// Tiling service endpoint.
    pub tiler_endpoint: String,
    /// Result store location.
    pub store_location: String,
    /// Result store key prefix.
    pub store_prefix: String,
    /// Preferred link class.
    pub access_mode: AccessMode,
    /// Collections per catalog page.
    pub page_size: usize,
    /// Optional cap on collections per run.
    pub total: Option<usize>,
    /// Worker slots.
    pub concurrency: usize,
    /// Units per fabric batch; credentials are acquired once per batch.
    pub batch_size: usize,
    /// Wall-clock deadline per unit.
    #[serde(with = "humantime_serde")]
    pub unit_timeout: Duration,
    /// Deadline for opening one dataset.
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
    /// HTTP timeout for catalog and tile requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Abort the batch on the first `tile_generation_failed`.
    pub strict: bool,
    /// Parquet report path.
    pub output: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CMR_URL.to_string(),
            tiler_endpoint: DEFAULT_TITILER_ENDPOINT.to_string(),
            store_location: "./tilecheck-store".to_string(),
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            access_mode: AccessMode::default(),
            page_size: DEFAULT_PAGE_SIZE,
            total: None,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            strict: false,
            output: PathBuf::from("tilecheck-report.parquet"),
        }
    }
}

impl RunConfig {
    /// Loads configuration from the process environment over defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration from a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let string = |name: &str| env_string(&get_env, name);

        if let Some(url) = string(env::CATALOG_URL) {
            config.catalog_url = url;
        }
        if let Some(endpoint) = string(env::TILER_ENDPOINT) {
            config.tiler_endpoint = endpoint;
        }
        if let Some(location) = string(env::STORE) {
            config.store_location = location;
        }
        if let Some(prefix) = string(env::STORE_PREFIX) {
            config.store_prefix = prefix;
        }
        if let Some(mode) = string(env::ACCESS_MODE) {
            config.access_mode = mode
                .parse()
                .map_err(|e| Error::config(format!("{}: {e}", env::ACCESS_MODE)))?;
        }
        if let Some(size) = env_usize(&get_env, env::PAGE_SIZE)? {
            config.page_size = size;
        }
        if let Some(total) = env_usize(&get_env, env::TOTAL)? {
            config.total = Some(total);
        }
        if let Some(concurrency) = env_usize(&get_env, env::CONCURRENCY)? {
            config.concurrency = concurrency;
        }
        if let Some(batch) = env_usize(&get_env, env::BATCH_SIZE)? {
            config.batch_size = batch;
        }
        if let Some(secs) = env_u64(&get_env, env::UNIT_TIMEOUT_SECS)? {
            config.unit_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64(&get_env, env::OPEN_TIMEOUT_SECS)? {
            config.open_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64(&get_env, env::REQUEST_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(strict) = env_bool(&get_env, env::STRICT)? {
            config.strict = strict;
        }
        if let Some(output) = string(env::OUTPUT) {
            config.output = PathBuf::from(output);
        }

        Ok(config)
    }

    /// Checks sizes and deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::config("page_size must be positive"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be positive"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be positive"));
        }
        if self.total == Some(0) {
            return Err(Error::config("total must be positive when set"));
        }
        if self.open_timeout.is_zero() || self.unit_timeout.is_zero() {
            return Err(Error::config("timeouts must be positive"));
        }
        if self.unit_timeout < self.open_timeout {
            return Err(Error::config(format!(
                "unit_timeout ({}s) must be at least open_timeout ({}s)",
                self.unit_timeout.as_secs(),
                self.open_timeout.as_secs()
            )));
        }
        if self.catalog_url.trim().is_empty() || self.tiler_endpoint.trim().is_empty() {
            return Err(Error::config("catalog_url and tiler_endpoint are required"));
        }
        Ok(())
    }

    /// Returns the classifier settings.
    #[must_use]
    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            access_mode: self.access_mode,
            open_timeout: self.open_timeout,
            tiler_endpoint: self.tiler_endpoint.clone(),
        }
    }

    /// Returns the executor settings.
    #[must_use]
    pub const fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            concurrency: self.concurrency,
            unit_timeout: self.unit_timeout,
        }
    }
}

fn env_string<F>(get_env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    get_env(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64<F>(get_env: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(v) = env_string(get_env, name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::config(format!("{name} must be a u64: {e}")))
}

fn env_usize<F>(get_env: &F, name: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(v) = env_string(get_env, name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::config(format!("{name} must be a usize: {e}")))
}

fn env_bool<F>(get_env: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(v) = env_string(get_env, name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}
