//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::{ResourceKnobs, ResourceQuantity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total cache pages owned by the kernel instance.
    pub cache_pages: u32,

    /// Size of one cache page; bounds how many tuple bytes fit in a buffer.
    pub page_size_bytes: usize,

    /// Share of `cache_pages` that the governor never hands out.
    pub cache_reserve_percentage: u32,

    /// Divisor for the per-graph allocation cap.
    pub expected_concurrent_statements: u32,

    /// Threads the governor may hand out.
    pub thread_count: u32,

    /// Per-`execute` tuple budget. `None` means unbounded.
    pub quantum_tuples: Option<u32>,

    /// Wrap every stream's scratch accessor with its granted quota.
    pub enforce_quotas: bool,

    /// Prefix for stream trace names (`<prefix>.<stream>`).
    pub trace_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_pages: 1024,
            page_size_bytes: 4096,
            cache_reserve_percentage: ResourceKnobs::DEFAULT_RESERVE_PERCENTAGE,
            expected_concurrent_statements: 4,
            thread_count: 4,
            quantum_tuples: None,
            enforce_quotas: true,
            trace_prefix: "xflow".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `XFLOW_CACHE_PAGES`: total cache pages
    /// - `XFLOW_PAGE_SIZE_BYTES`: bytes per page
    /// - `XFLOW_CACHE_RESERVE_PERCENTAGE`: reserved share of the cache
    /// - `XFLOW_EXPECTED_CONCURRENT_STATEMENTS`: per-graph cap divisor
    /// - `XFLOW_THREAD_COUNT`: threads available to the governor
    /// - `XFLOW_QUANTUM_TUPLES`: per-execute tuple budget
    /// - `XFLOW_ENFORCE_QUOTAS`: `true`/`false`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u32>("XFLOW_CACHE_PAGES") {
            cfg.cache_pages = v;
        }
        if let Some(v) = env_parse::<usize>("XFLOW_PAGE_SIZE_BYTES") {
            cfg.page_size_bytes = v;
        }
        if let Some(v) = env_parse::<u32>("XFLOW_CACHE_RESERVE_PERCENTAGE") {
            cfg.cache_reserve_percentage = v;
        }
        if let Some(v) = env_parse::<u32>("XFLOW_EXPECTED_CONCURRENT_STATEMENTS") {
            cfg.expected_concurrent_statements = v;
        }
        if let Some(v) = env_parse::<u32>("XFLOW_THREAD_COUNT") {
            cfg.thread_count = v;
        }
        if let Some(v) = env_parse::<u32>("XFLOW_QUANTUM_TUPLES") {
            cfg.quantum_tuples = Some(v);
        }
        if let Some(v) = env_parse::<bool>("XFLOW_ENFORCE_QUOTAS") {
            cfg.enforce_quotas = v;
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size_bytes == 0 {
            return Err(Error::Config("page_size_bytes must be positive".into()));
        }
        if self.expected_concurrent_statements == 0 {
            return Err(Error::Config(
                "expected_concurrent_statements must be positive".into(),
            ));
        }
        if self.cache_reserve_percentage > 100 {
            return Err(Error::Config(format!(
                "cache_reserve_percentage {} exceeds 100",
                self.cache_reserve_percentage
            )));
        }
        if self.quantum_tuples == Some(0) {
            return Err(Error::Config("quantum_tuples must be positive".into()));
        }
        Ok(())
    }

    /// Governor knobs derived from this config.
    pub fn knobs(&self) -> ResourceKnobs {
        ResourceKnobs {
            expected_concurrent_statements: self.expected_concurrent_statements,
            cache_reserve_percentage: self.cache_reserve_percentage,
        }
    }

    /// Total resources handed to the governor.
    pub fn availability(&self) -> ResourceQuantity {
        ResourceQuantity {
            threads: self.thread_count,
            cache_pages: self.cache_pages,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
