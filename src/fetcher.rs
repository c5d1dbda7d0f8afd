//! Cache-first dependency fetching.
//!
//! The fetcher owns the hit/stale/miss decision; actual graph computation
//! lives behind [`DependencyProvider`] so the flow is testable with scripted
//! providers.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::{CallGraphSource, GraphBuilder};
use crate::cache::{CacheStore, CacheValidity};
use crate::config::Config;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::models::{EndpointType, FetchRequest, FetchResponse};
use crate::pool::{IndexerSessionManager, SessionPool};

pub const MSG_FROM_CACHE: &str = "Dependencies fetched from cache";
pub const MSG_COMPUTED: &str = "Dependencies fetched successfully";
pub const MSG_EMPTY: &str = "No dependencies found";

/// Computes a dependency artifact for one request.
///
/// `Ok(None)` means the requested symbol could not be resolved; that is an
/// empty success, not an error.
pub trait DependencyProvider {
    fn build(&self, request: &FetchRequest) -> Result<Option<Value>, EngineError>;
}

/// Cache-first front door for dependency requests.
pub struct Fetcher<P: DependencyProvider> {
    provider: P,
    metrics: Arc<MetricsCollector>,
}

impl<P: DependencyProvider> Fetcher<P> {
    pub fn new(provider: P, metrics: Arc<MetricsCollector>) -> Self {
        Self { provider, metrics }
    }

    /// Serve one request, from cache when the fingerprint still validates.
    pub fn fetch(&self, request: &FetchRequest) -> FetchResponse {
        if request.endpoint == EndpointType::HealthCheck {
            // Liveness answer with fixed shape, never cached.
            return FetchResponse::ok("Service is healthy", json!({ "status": "ok" }));
        }

        let store = match CacheStore::open(&request.output_dir) {
            Ok(store) => store,
            Err(e) => {
                return FetchResponse::failure(format!("Failed to open cache: {}", e));
            }
        };
        let key = CacheStore::cache_key(request);

        match self.try_cache(&store, &key) {
            Ok(Some(data)) => {
                self.metrics.record_cache_hit();
                return FetchResponse::ok(MSG_FROM_CACHE, data);
            }
            Ok(None) => self.metrics.record_cache_miss(),
            Err(()) => {
                // Stale or corrupt; drop the entry and recompute.
                self.metrics.record_cache_stale();
                if let Err(e) = store.invalidate(&key) {
                    log::warn!("cache invalidation failed for {}: {}", key, e);
                }
            }
        }

        match self.provider.build(request) {
            Ok(Some(data)) => {
                if let Some(source_file) = request_source_file(request) {
                    if let Err(e) = store.store(&key, &source_file, &data) {
                        log::warn!("cannot cache result for {}: {}", key, e);
                    }
                }
                FetchResponse::ok(MSG_COMPUTED, data)
            }
            Ok(None) => FetchResponse::ok(MSG_EMPTY, json!({})),
            Err(e) => FetchResponse::failure(format!("Failed to fetch dependencies: {}", e)),
        }
    }

    /// `Ok(Some)` cache hit, `Ok(None)` no entry, `Err(())` entry unusable.
    fn try_cache(&self, store: &CacheStore, key: &str) -> Result<Option<Value>, ()> {
        let entry = match store.lookup(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::warn!("cache lookup failed for {}: {}", key, e);
                return Ok(None);
            }
        };
        match store.check_validity(&entry) {
            CacheValidity::Valid => {}
            CacheValidity::ValidTouched => {
                if let Err(e) = store.refresh_mtime(key) {
                    log::warn!("mtime refresh failed for {}: {}", key, e);
                }
            }
            CacheValidity::Stale | CacheValidity::Missing => return Err(()),
        }
        match store.load_artifact(&entry) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                log::warn!("{}", e);
                Err(())
            }
        }
    }
}

/// Absolute path of the source file a request is about.
fn request_source_file(request: &FetchRequest) -> Option<PathBuf> {
    let file = request.file.as_ref()?;
    if file.is_absolute() {
        Some(file.clone())
    } else {
        Some(request.project_root.join(file))
    }
}

/// Production provider: checks a session out of the pool, resolves the root
/// symbol, and runs the bounded traversal.
pub struct PooledProvider {
    pool: Arc<SessionPool<IndexerSessionManager>>,
    builder: GraphBuilder,
    max_range_symbols: usize,
}

impl PooledProvider {
    pub fn new(pool: Arc<SessionPool<IndexerSessionManager>>, config: &Config) -> Self {
        Self {
            pool,
            builder: GraphBuilder::new(config),
            max_range_symbols: config.max_nodes_per_level,
        }
    }
}

impl DependencyProvider for PooledProvider {
    fn build(&self, request: &FetchRequest) -> Result<Option<Value>, EngineError> {
        let cache_dir = indexer_cache_dir(&request.output_dir);
        let mut checkout = self.pool.acquire(&request.project_root, &cache_dir)?;
        let session = checkout.session();

        let file = request_source_file(request)
            .ok_or_else(|| EngineError::Validation("file is required".to_string()))?;

        let payload = match request.endpoint {
            EndpointType::FetchByComponent => {
                let name = request.function_name.as_deref().ok_or_else(|| {
                    EngineError::Validation("function_name is required".to_string())
                })?;
                match session.resolve_by_name(&file, name) {
                    Some(root) => {
                        let result = self.builder.build(session, &root, request.level);
                        Some(serde_json::to_value(result).map_err(|e| {
                            EngineError::Validation(format!("serialize result: {}", e))
                        })?)
                    }
                    None => None,
                }
            }
            EndpointType::FetchByLineCharacter => {
                let line = request
                    .line
                    .ok_or_else(|| EngineError::Validation("line is required".to_string()))?;
                let character = request.character.ok_or_else(|| {
                    EngineError::Validation("character is required".to_string())
                })?;
                match session.resolve_root(&file, line, character) {
                    Some(root) => {
                        let result = self.builder.build(session, &root, request.level);
                        Some(serde_json::to_value(result).map_err(|e| {
                            EngineError::Validation(format!("serialize result: {}", e))
                        })?)
                    }
                    None => None,
                }
            }
            EndpointType::FetchByFile => {
                let start = request
                    .start_line
                    .ok_or_else(|| EngineError::Validation("'start' is required".to_string()))?;
                let end = request
                    .end_line
                    .ok_or_else(|| EngineError::Validation("'end' is required".to_string()))?;

                let tokens = session.tokenize_range(&file, start, end);
                let mut seen = std::collections::HashSet::new();
                let mut results = Vec::new();
                for token in tokens {
                    if !seen.insert(token.text.clone()) {
                        continue;
                    }
                    if results.len() >= self.max_range_symbols {
                        break;
                    }
                    if let Some(root) = session.resolve_root(&file, token.line, token.character)
                    {
                        let result = self.builder.build(session, &root, request.level);
                        results.push(serde_json::to_value(result).map_err(|e| {
                            EngineError::Validation(format!("serialize result: {}", e))
                        })?);
                    }
                }
                if results.is_empty() {
                    None
                } else {
                    Some(json!({ "symbols": results }))
                }
            }
            EndpointType::HealthCheck => Some(json!({ "status": "ok" })),
        };
        Ok(payload)
    }
}

/// Indexer background-index location inside one output directory.
pub fn indexer_cache_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("index")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        calls: AtomicUsize,
        result: Option<Value>,
    }

    impl DependencyProvider for ScriptedProvider {
        fn build(&self, _request: &FetchRequest) -> Result<Option<Value>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    fn request_for(dir: &Path, source: &Path) -> FetchRequest {
        FetchRequest {
            project_root: dir.to_path_buf(),
            output_dir: dir.join("out"),
            project_id: "proj".to_string(),
            endpoint: EndpointType::FetchByComponent,
            file: Some(source.to_path_buf()),
            function_name: Some("main".to_string()),
            line: None,
            character: None,
            start_line: None,
            end_line: None,
            level: 1,
        }
    }

    #[test]
    fn test_health_check_is_fixed_and_uncached() {
        let provider = ScriptedProvider {
            calls: AtomicUsize::new(0),
            result: None,
        };
        let fetcher = Fetcher::new(provider, Arc::new(MetricsCollector::new()));
        let mut request = request_for(Path::new("/tmp"), Path::new("/tmp/x.c"));
        request.endpoint = EndpointType::HealthCheck;

        let response = fetcher.fetch(&request);
        assert_eq!(response.message, "Service is healthy");
        assert_eq!(response.data, json!({ "status": "ok" }));
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_fetch_hits_cache_without_provider_call() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.c");
        std::fs::write(&source, "int main() {}").unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let fetcher = Fetcher::new(
            ScriptedProvider {
                calls: AtomicUsize::new(0),
                result: Some(json!({ "name": "main" })),
            },
            Arc::clone(&metrics),
        );
        let request = request_for(dir.path(), &source);

        let first = fetcher.fetch(&request);
        assert_eq!(first.message, MSG_COMPUTED);
        let second = fetcher.fetch(&request);
        assert_eq!(second.message, MSG_FROM_CACHE);
        assert_eq!(second.data, first.data);
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.cache_hit_count(), 1);
        assert_eq!(metrics.cache_miss_count(), 1);
    }

    #[test]
    fn test_modified_source_triggers_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.c");
        std::fs::write(&source, "int main() {}").unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let fetcher = Fetcher::new(
            ScriptedProvider {
                calls: AtomicUsize::new(0),
                result: Some(json!({ "name": "main" })),
            },
            Arc::clone(&metrics),
        );
        let request = request_for(dir.path(), &source);

        fetcher.fetch(&request);
        std::fs::write(&source, "int main() { return 2; } /* edit */").unwrap();
        let response = fetcher.fetch(&request);
        assert_eq!(response.message, MSG_COMPUTED);
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.cache_stale_count(), 1);
    }

    #[test]
    fn test_unresolved_symbol_is_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.c");
        std::fs::write(&source, "int main() {}").unwrap();
        let fetcher = Fetcher::new(
            ScriptedProvider {
                calls: AtomicUsize::new(0),
                result: None,
            },
            Arc::new(MetricsCollector::new()),
        );

        let response = fetcher.fetch(&request_for(dir.path(), &source));
        assert_eq!(response.message, MSG_EMPTY);
        assert!(response.is_empty());
    }

    #[test]
    fn test_provider_error_becomes_failure_response() {
        struct FailingProvider;
        impl DependencyProvider for FailingProvider {
            fn build(&self, _request: &FetchRequest) -> Result<Option<Value>, EngineError> {
                Err(EngineError::PoolExhausted(4))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.c");
        std::fs::write(&source, "int main() {}").unwrap();
        let fetcher = Fetcher::new(FailingProvider, Arc::new(MetricsCollector::new()));

        let response = fetcher.fetch(&request_for(dir.path(), &source));
        assert!(response.message.contains("Failed"));
    }
}
