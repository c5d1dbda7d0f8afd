//! Engine configuration.
//!
//! All tunables live here with defaults suitable for interactive use.
//! Every field can be overridden through a `VASCO_*` environment variable;
//! unparsable values fall back to the default with a warning, they never
//! abort startup.

use std::env;
use std::time::Duration;

/// Configuration for the dependency engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Indexer executable name or absolute path (VASCO_INDEXER)
    pub indexer_executable: String,

    /// Minimum supported indexer version, e.g. "17.0.0" (VASCO_MIN_INDEXER_VERSION)
    pub min_indexer_version: String,

    /// Maximum number of pooled indexer sessions (VASCO_POOL_MAX_SIZE)
    pub pool_max_size: usize,

    /// Idle sessions older than this are eligible for eviction (VASCO_POOL_IDLE_TIMEOUT_SECS)
    pub pool_idle_timeout_secs: u64,

    /// Hard ceiling on BFS traversal depth (VASCO_MAX_TRAVERSAL_DEPTH)
    pub max_traversal_depth: u32,

    /// Cap on nodes recorded per traversal level (VASCO_MAX_NODES_PER_LEVEL)
    pub max_nodes_per_level: usize,

    /// Deadline for one protocol request/response exchange (VASCO_PROTOCOL_TIMEOUT_SECS)
    pub protocol_timeout_secs: u64,

    /// Deadline for the bulk indexing pass (VASCO_INDEXING_TIMEOUT_SECS)
    pub indexing_timeout_secs: u64,

    /// Delay after spawn before the handshake is attempted (VASCO_STARTUP_DELAY_MS)
    pub startup_delay_ms: u64,

    /// Grace period between SIGTERM and SIGKILL at shutdown (VASCO_SHUTDOWN_GRACE_MS)
    pub shutdown_grace_ms: u64,

    /// Capacity of the session-scoped file read cache (VASCO_FILE_CACHE_CAPACITY)
    pub file_cache_capacity: usize,

    /// Worker thread count passed to the indexer at handshake (VASCO_INDEXER_THREADS)
    pub indexer_threads: usize,

    /// Collapse BFS nodes by symbol name alone instead of (file, name, position).
    /// Faster but under-counts same-named symbols across files. (VASCO_DEDUP_BY_NAME)
    pub dedup_by_name_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            indexer_executable: "clangd".to_string(),
            min_indexer_version: "17.0.0".to_string(),
            pool_max_size: 4,
            pool_idle_timeout_secs: 300,
            max_traversal_depth: 5,
            max_nodes_per_level: 50,
            protocol_timeout_secs: 15,
            indexing_timeout_secs: 600,
            startup_delay_ms: 300,
            shutdown_grace_ms: 2000,
            file_cache_capacity: 64,
            indexer_threads: 4,
            dedup_by_name_only: false,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        override_string(&mut config.indexer_executable, "VASCO_INDEXER");
        override_string(&mut config.min_indexer_version, "VASCO_MIN_INDEXER_VERSION");
        override_parse(&mut config.pool_max_size, "VASCO_POOL_MAX_SIZE");
        override_parse(
            &mut config.pool_idle_timeout_secs,
            "VASCO_POOL_IDLE_TIMEOUT_SECS",
        );
        override_parse(&mut config.max_traversal_depth, "VASCO_MAX_TRAVERSAL_DEPTH");
        override_parse(&mut config.max_nodes_per_level, "VASCO_MAX_NODES_PER_LEVEL");
        override_parse(
            &mut config.protocol_timeout_secs,
            "VASCO_PROTOCOL_TIMEOUT_SECS",
        );
        override_parse(
            &mut config.indexing_timeout_secs,
            "VASCO_INDEXING_TIMEOUT_SECS",
        );
        override_parse(&mut config.startup_delay_ms, "VASCO_STARTUP_DELAY_MS");
        override_parse(&mut config.shutdown_grace_ms, "VASCO_SHUTDOWN_GRACE_MS");
        override_parse(&mut config.file_cache_capacity, "VASCO_FILE_CACHE_CAPACITY");
        override_parse(&mut config.indexer_threads, "VASCO_INDEXER_THREADS");
        override_parse(&mut config.dedup_by_name_only, "VASCO_DEDUP_BY_NAME");

        config
    }

    /// Protocol call deadline as a Duration.
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_secs)
    }

    /// Indexing deadline as a Duration.
    pub fn indexing_timeout(&self) -> Duration {
        Duration::from_secs(self.indexing_timeout_secs)
    }

    /// Pool idle eviction threshold as a Duration.
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

fn override_string(target: &mut String, var: &str) {
    if let Ok(val) = env::var(var) {
        if !val.trim().is_empty() {
            *target = val;
        }
    }
}

fn override_parse<T: std::str::FromStr + std::fmt::Display>(target: &mut T, var: &str) {
    if let Ok(val) = env::var(var) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => {
                log::warn!("invalid {} value: {}, using default: {}", var, val, target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.indexer_executable, "clangd");
        assert_eq!(config.pool_max_size, 4);
        assert_eq!(config.max_traversal_depth, 5);
        assert_eq!(config.max_nodes_per_level, 50);
        assert!(!config.dedup_by_name_only);
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.protocol_timeout(), Duration::from_secs(15));
        assert_eq!(config.pool_idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_override_roundtrip() {
        // Serialized through a private env var to avoid cross-test interference
        std::env::set_var("VASCO_MAX_NODES_PER_LEVEL", "7");
        let config = Config::from_env();
        assert_eq!(config.max_nodes_per_level, 7);
        std::env::remove_var("VASCO_MAX_NODES_PER_LEVEL");
    }

    #[test]
    fn test_env_override_invalid_keeps_default() {
        std::env::set_var("VASCO_POOL_MAX_SIZE", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.pool_max_size, Config::default().pool_max_size);
        std::env::remove_var("VASCO_POOL_MAX_SIZE");
    }
}
