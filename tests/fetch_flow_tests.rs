//! End-to-end fetch flow: validation, index gate, traversal, caching.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vasco::builder::{CallGraphSource, GraphBuilder};
use vasco::config::Config;
use vasco::error::EngineError;
use vasco::fetcher::{DependencyProvider, MSG_COMPUTED, MSG_FROM_CACHE};
use vasco::metrics::MetricsCollector;
use vasco::models::{DependencyResult, EndpointType, FetchRequest, SymbolRef};
use vasco::service::DependencyService;

fn sym(name: &str, line: u32) -> SymbolRef {
    SymbolRef {
        name: name.to_string(),
        file: PathBuf::from("/proj/main.c"),
        line,
        character: 0,
        end_line: line + 2,
        kind: "function".to_string(),
    }
}

/// In-memory call graph standing in for a live indexer session.
struct ScriptedGraph {
    callees: HashMap<String, Vec<SymbolRef>>,
    callers: HashMap<String, Vec<SymbolRef>>,
}

impl CallGraphSource for ScriptedGraph {
    fn resolve_root(&mut self, _file: &Path, line: u32, _character: u32) -> Option<SymbolRef> {
        Some(sym("at_position", line))
    }

    fn resolve_by_name(&mut self, _file: &Path, name: &str) -> Option<SymbolRef> {
        if name == "missing" {
            None
        } else {
            Some(sym(name, 0))
        }
    }

    fn callees_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.callees.get(&symbol.name).cloned().unwrap_or_default()
    }

    fn callers_of(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.callers.get(&symbol.name).cloned().unwrap_or_default()
    }

    fn definition_text(&mut self, symbol: &SymbolRef) -> Option<String> {
        Some(format!("void {}(void);", symbol.name))
    }
}

/// Provider that drives the real builder over the scripted graph.
struct ScriptedProvider {
    graph: Mutex<ScriptedGraph>,
    builder: GraphBuilder,
    calls: Arc<AtomicUsize>,
}

impl DependencyProvider for ScriptedProvider {
    fn build(&self, request: &FetchRequest) -> Result<Option<Value>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut graph = self.graph.lock().unwrap();
        let name = request.function_name.as_deref().unwrap_or_default();
        let root = match graph.resolve_by_name(Path::new("/proj/main.c"), name) {
            Some(root) => root,
            None => return Ok(None),
        };
        let result = self.builder.build(&mut *graph, &root, request.level);
        serde_json::to_value(result)
            .map(Some)
            .map_err(|e| EngineError::Validation(e.to_string()))
    }
}

fn scripted_service(
    dir: &Path,
) -> (
    DependencyService<ScriptedProvider>,
    Arc<AtomicUsize>,
    Arc<MetricsCollector>,
) {
    let mut callees = HashMap::new();
    callees.insert("main".to_string(), vec![sym("parse", 10), sym("render", 20)]);
    callees.insert("parse".to_string(), vec![sym("lex", 30)]);
    let mut callers = HashMap::new();
    callers.insert("parse".to_string(), vec![sym("main", 0)]);

    std::fs::create_dir_all(dir.join("index")).unwrap();
    let config = Config::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::new(MetricsCollector::new());
    let provider = ScriptedProvider {
        graph: Mutex::new(ScriptedGraph { callees, callers }),
        builder: GraphBuilder::new(&config),
        calls: Arc::clone(&calls),
    };
    (
        DependencyService::new(provider, config, Arc::clone(&metrics)),
        calls,
        metrics,
    )
}

fn request(dir: &Path, source: &Path, function: &str, level: u32) -> FetchRequest {
    FetchRequest {
        project_root: dir.to_path_buf(),
        output_dir: dir.to_path_buf(),
        project_id: "proj".to_string(),
        endpoint: EndpointType::FetchByComponent,
        file: Some(source.to_path_buf()),
        function_name: Some(function.to_string()),
        line: None,
        character: None,
        start_line: None,
        end_line: None,
        level,
    }
}

#[test]
fn test_fetch_builds_level_maps_in_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, _calls, _metrics) = scripted_service(dir.path());

    let response = service.perform_fetch(&request(dir.path(), &source, "parse", 1));
    assert_eq!(response.message, MSG_COMPUTED);

    let result: DependencyResult = serde_json::from_value(response.data).unwrap();
    assert_eq!(result.name, "parse");
    assert_eq!(result.source, "void parse(void);");
    assert!(result.successors[&0].values().any(|n| n.name == "lex"));
    assert!(result.predecessors[&0].values().any(|n| n.name == "main"));
}

#[test]
fn test_requested_level_bounds_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, _calls, _metrics) = scripted_service(dir.path());

    let response = service.perform_fetch(&request(dir.path(), &source, "main", 1));
    let result: DependencyResult = serde_json::from_value(response.data).unwrap();
    // Level 0: parse + render, level 1: lex.
    assert_eq!(result.successors[&0].len(), 2);
    assert_eq!(result.successors[&1].len(), 1);
    assert!(result.successors[&1].values().any(|n| n.name == "lex"));
}

#[test]
fn test_second_fetch_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, calls, metrics) = scripted_service(dir.path());
    let req = request(dir.path(), &source, "main", 2);

    let first = service.perform_fetch(&req);
    assert_eq!(first.message, MSG_COMPUTED);
    let second = service.perform_fetch(&req);
    assert_eq!(second.message, MSG_FROM_CACHE);
    assert_eq!(first.data, second.data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.cache_hit_count(), 1);
}

#[test]
fn test_different_levels_are_distinct_cache_entries() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, calls, _metrics) = scripted_service(dir.path());

    service.perform_fetch(&request(dir.path(), &source, "main", 1));
    service.perform_fetch(&request(dir.path(), &source, "main", 2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unknown_symbol_yields_empty_success() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, _calls, _metrics) = scripted_service(dir.path());

    let response = service.perform_fetch(&request(dir.path(), &source, "missing", 1));
    assert_eq!(response.message, "No dependencies found");
    assert!(response.is_empty());
}

#[test]
fn test_source_edit_invalidates_cached_tree() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() {}").unwrap();
    let (service, calls, metrics) = scripted_service(dir.path());
    let req = request(dir.path(), &source, "main", 1);

    service.perform_fetch(&req);
    std::fs::write(&source, "int main() { return 1; }").unwrap();
    let response = service.perform_fetch(&req);
    assert_eq!(response.message, MSG_COMPUTED);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.cache_stale_count(), 1);
}
