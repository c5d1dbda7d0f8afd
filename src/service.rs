//! Top-level service facade: validation, index gating, health, and cache
//! administration in front of the fetcher.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::fetcher::{DependencyProvider, Fetcher};
use crate::ingestion::{index_present, indexer_version, parse_version, version_at_least};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::models::{EndpointType, FetchRequest, FetchResponse, HealthStatus};
use crate::session::resolve_indexer;
use crate::session::tokenize::SnippetTokenizer;

pub const MSG_NOT_INDEXED: &str = "Project has not been indexed yet";

/// The public entry point of the engine.
pub struct DependencyService<P: DependencyProvider> {
    fetcher: Fetcher<P>,
    config: Config,
    metrics: Arc<MetricsCollector>,
}

impl<P: DependencyProvider> DependencyService<P> {
    pub fn new(provider: P, config: Config, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            fetcher: Fetcher::new(provider, Arc::clone(&metrics)),
            config,
            metrics,
        }
    }

    /// Run one fetch. All failures come back as responses, never panics:
    /// invalid input, missing index, and provider errors each produce a
    /// failure message with empty data.
    pub fn perform_fetch(&self, request: &FetchRequest) -> FetchResponse {
        if let Err(e) = request.validate() {
            return FetchResponse::failure(format!("Invalid request: {}", e));
        }
        if request.endpoint != EndpointType::HealthCheck && !index_present(&request.output_dir) {
            // Gate before any session is spawned.
            return FetchResponse::failure(MSG_NOT_INDEXED);
        }
        self.fetcher.fetch(request)
    }

    /// Aggregate a deep health report for one project and output directory.
    ///
    /// Unlike the health-check endpoint this inspects the environment:
    /// binary, version, index, cache writability, and tokenizer backend.
    pub fn health_status(&self, output_dir: &Path) -> HealthStatus {
        let indexer_available = resolve_indexer(&self.config.indexer_executable).is_ok();
        let indexer_version = if indexer_available {
            indexer_version(&self.config.indexer_executable).ok()
        } else {
            None
        };
        let version_ok = match indexer_version.as_deref().and_then(parse_version) {
            Some(found) => match parse_version(&self.config.min_indexer_version) {
                Some(minimum) => version_at_least(found, minimum),
                None => true,
            },
            None => false,
        };

        HealthStatus {
            indexer_available: indexer_available && version_ok,
            indexer_version,
            index_present: index_present(output_dir),
            cache_writable: cache_writable(output_dir),
            tokenizer_available: SnippetTokenizer::new().available(),
            stale_cache_entries: CacheStore::open(output_dir)
                .and_then(|store| store.stale_entries())
                .unwrap_or(0),
        }
    }

    /// Drop every cached artifact derived from one source file.
    pub fn invalidate_cache_for_file(&self, output_dir: &Path, file: &Path) -> Result<usize> {
        let store = CacheStore::open(output_dir)?;
        store.invalidate_for_source(file)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn cache_writable(output_dir: &Path) -> bool {
    if std::fs::create_dir_all(output_dir).is_err() {
        return false;
    }
    let probe = output_dir.join(".write_probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
