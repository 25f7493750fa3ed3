//! Bootstrap configuration for the runtime substrate.
//!
//! Loaded once at startup from a TOML file; every tunable the scheduler,
//! allocator and mixer need at construction time lives here so none of
//! them reach for environment variables at call sites.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_blocksize() -> usize {
    64 * 1024
}

fn default_priority_time_ms() -> u64 {
    50
}

fn default_priority_delay_ms() -> u64 {
    10
}

fn default_main_pool_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_temp_pool_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_read_requests() -> usize {
    64
}

fn default_max_file_handles() -> usize {
    32
}

fn default_resource_slots() -> usize {
    100
}

fn default_sample_rate() -> u32 {
    44_100
}

/// Top level configuration, deserialized directly from a TOML document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Size of one scheduler service slice, in bytes.
    #[serde(default = "default_blocksize")]
    pub blocksize: usize,

    /// Length of deadline-priority mode after a missed deadline is served.
    #[serde(default = "default_priority_time_ms")]
    pub priority_time_ms: u64,

    /// Sleep between deadline services while in deadline-priority mode.
    #[serde(default = "default_priority_delay_ms")]
    pub priority_delay_ms: u64,

    /// Size of the Main memory pool.
    #[serde(default = "default_main_pool_bytes")]
    pub main_pool_bytes: usize,

    /// Size of the Temp memory pool.
    #[serde(default = "default_temp_pool_bytes")]
    pub temp_pool_bytes: usize,

    /// Maximum concurrently outstanding read requests.
    #[serde(default = "default_max_read_requests")]
    pub max_read_requests: usize,

    /// Maximum concurrently open file handles.
    #[serde(default = "default_max_file_handles")]
    pub max_file_handles: usize,

    /// Default resource slot table size for a newly created manager.
    #[serde(default = "default_resource_slots")]
    pub resource_slots: usize,

    /// Mixer output sample rate.
    #[serde(default = "default_sample_rate")]
    pub output_sample_rate: u32,

    /// Search roots checked, in order, for a package archive before its
    /// raw-filesystem fallback is attempted.
    #[serde(default)]
    pub package_search_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            blocksize: default_blocksize(),
            priority_time_ms: default_priority_time_ms(),
            priority_delay_ms: default_priority_delay_ms(),
            main_pool_bytes: default_main_pool_bytes(),
            temp_pool_bytes: default_temp_pool_bytes(),
            max_read_requests: default_max_read_requests(),
            max_file_handles: default_max_file_handles(),
            resource_slots: default_resource_slots(),
            output_sample_rate: default_sample_rate(),
            package_search_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// their compiled defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse configuration from an in-memory TOML document (used by tests
    /// and by callers that already hold the file contents).
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.blocksize, 64 * 1024);
        assert!(cfg.temp_pool_bytes < cfg.main_pool_bytes);
    }

    #[test]
    fn parses_partial_overrides() {
        let cfg = Config::parse("blocksize = 8192\npriority_time_ms = 25\n").unwrap();
        assert_eq!(cfg.blocksize, 8192);
        assert_eq!(cfg.priority_time_ms, 25);
        assert_eq!(cfg.main_pool_bytes, default_main_pool_bytes());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(Config::parse("not = [valid").is_err());
    }
}
