//! Vasco: dependency analysis for C/C++ codebases
//!
//! Vasco manages a pool of external indexer subprocesses (clangd-compatible),
//! speaks line-delimited JSON-RPC with them over stdio, and answers symbol
//! dependency queries by bounded breadth-first traversal over the indexer's
//! call hierarchy. Results are cached on disk and invalidated by source-file
//! fingerprints.
//!
//! # Position Conventions
//!
//! All positions follow the indexer protocol:
//! - **Line positions**: 0-indexed (line 0 is the first line)
//! - **Column positions**: 0-indexed (column 0 is the first character)
//!
//! # Layout
//!
//! One output directory per analyzed project holds the background index
//! (`index/`), cached artifacts (`cache/`), and the metadata table that maps
//! cache keys to artifacts and source fingerprints.

pub mod builder;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod protocol;
pub mod service;
pub mod session;

pub use builder::{CallGraphSource, GraphBuilder};
pub use cache::{CacheEntry, CacheStore, CacheValidity, Fingerprint};
pub use cleanup::{clean_output_dir, remove_generated_config, CleanupReport};
pub use config::Config;
pub use error::EngineError;
pub use fetcher::{DependencyProvider, Fetcher, PooledProvider};
pub use ingestion::{generate_config, run_indexing};
pub use metrics::{MetricsCollector, MetricsSnapshot, TimingStats};
pub use models::{
    DependencyNode, DependencyResult, EndpointType, FetchRequest, FetchResponse, HealthStatus,
    LevelMap, SymbolRef,
};
pub use pool::{IndexerSessionManager, PooledSession, PoolStats, SessionManager, SessionPool};
pub use protocol::{RequestError, Transport};
pub use service::DependencyService;
pub use session::{IndexerSession, SessionState};
