//! One external indexer process plus its protocol session.
//!
//! Lifecycle: `Created → Initializing → Ready → (Busy ⇄ Ready)* →
//! ShuttingDown → Terminated`. A process that dies outside this machine
//! (observed via poll) is treated as `Terminated` regardless of prior state.
//!
//! Individual query failures and timeouts are absorbed into empty results so
//! one unreachable symbol degrades a traversal instead of aborting it.
//! Startup and handshake failures are hard errors.

pub mod file_cache;
pub mod tokenize;

use serde_json::{json, Value};
use std::collections::HashSet;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::models::SymbolRef;
use crate::protocol::{RequestError, Transport};
use file_cache::FileReadCache;
use tokenize::{language_for_path, IdentifierToken, SnippetLanguage, SnippetTokenizer};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
    Busy,
    ShuttingDown,
    Terminated,
}

/// Convert a filesystem path to a file:// URI.
pub fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.to_string_lossy())
}

/// Convert a file:// URI back to a path. Non-file URIs pass through as paths.
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Map protocol symbol-kind numbers to readable names.
fn symbol_kind_name(kind: u64) -> &'static str {
    match kind {
        5 => "class",
        6 => "method",
        10 => "enum",
        11 => "interface",
        12 => "function",
        13 => "variable",
        23 => "struct",
        _ => "symbol",
    }
}

/// Resolve the indexer executable: absolute/relative path or PATH lookup.
pub fn resolve_indexer(executable: &str) -> Result<PathBuf, EngineError> {
    let candidate = Path::new(executable);
    if candidate.components().count() > 1 {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(EngineError::ExecutableNotFound(executable.to_string()));
    }
    which::which(executable).map_err(|_| EngineError::ExecutableNotFound(executable.to_string()))
}

/// Check whether a process is still alive without reaping it.
pub(crate) fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    unsafe {
        if libc::kill(pid, 0) == 0 {
            return true;
        }
        matches!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::EPERM)
        )
    }
}

/// SIGTERM the process group, wait out the grace period, escalate to SIGKILL.
pub(crate) fn kill_process_group(pid: i32, grace: Duration) {
    if pid <= 0 {
        return;
    }
    unsafe {
        let _ = libc::kill(-pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    unsafe {
        let _ = libc::kill(-pid, libc::SIGKILL);
    }
}

/// One indexer subprocess and its synchronous protocol session.
///
/// Exactly one caller uses a session at a time; the pool enforces this.
pub struct IndexerSession {
    child: Child,
    pid: i32,
    transport: Transport,
    state: SessionState,
    opened_documents: HashSet<PathBuf>,
    tokenizer: SnippetTokenizer,
    file_cache: FileReadCache,
    project_root: PathBuf,
    protocol_timeout: Duration,
    shutdown_grace: Duration,
    metrics: Arc<MetricsCollector>,
}

impl IndexerSession {
    /// Spawn the indexer and perform the protocol handshake.
    ///
    /// The handshake declares minimal capabilities and passes the
    /// per-output-directory cache folder and worker-thread count through
    /// `initializationOptions`.
    pub fn start(
        project_root: &Path,
        cache_dir: &Path,
        config: &Config,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, EngineError> {
        let executable = resolve_indexer(&config.indexer_executable)?;
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| EngineError::StartupFailure(format!("cannot create cache dir: {}", e)))?;

        let mut child = Command::new(&executable)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                EngineError::StartupFailure(format!("{}: {}", executable.display(), e))
            })?;
        let pid = child.id() as i32;

        std::thread::sleep(Duration::from_millis(config.startup_delay_ms));
        if let Ok(Some(status)) = child.try_wait() {
            return Err(EngineError::StartupFailure(format!(
                "indexer exited immediately with {}",
                status
            )));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::StartupFailure("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::StartupFailure("no stdout pipe".to_string()))?;
        let transport = Transport::new(stdin, stdout);

        let mut session = Self {
            child,
            pid,
            transport,
            state: SessionState::Initializing,
            opened_documents: HashSet::new(),
            tokenizer: SnippetTokenizer::new(),
            file_cache: FileReadCache::new(config.file_cache_capacity),
            project_root: project_root.to_path_buf(),
            protocol_timeout: config.protocol_timeout(),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            metrics,
        };
        session.handshake(cache_dir, config.indexer_threads)?;
        session.state = SessionState::Ready;
        session.metrics.record_process_started();
        Ok(session)
    }

    fn handshake(&mut self, cache_dir: &Path, worker_threads: usize) -> Result<(), EngineError> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": path_to_uri(&self.project_root),
            "capabilities": {},
            "initializationOptions": {
                "cacheDirectory": cache_dir.to_string_lossy(),
                "workerThreads": worker_threads,
            },
        });
        self.metrics.record_method_call("initialize");
        let result = self
            .transport
            .request("initialize", params, self.protocol_timeout);
        match result {
            Ok(_) => {}
            Err(RequestError::Timeout { method, seconds }) => {
                kill_process_group(self.pid, self.shutdown_grace);
                let _ = self.child.wait();
                self.state = SessionState::Terminated;
                return Err(EngineError::ProtocolTimeout { method, seconds });
            }
            Err(e) => {
                kill_process_group(self.pid, self.shutdown_grace);
                let _ = self.child.wait();
                self.state = SessionState::Terminated;
                return Err(EngineError::ProtocolInit(e.to_string()));
            }
        }
        self.transport
            .notify("initialized", json!({}))
            .map_err(|e| EngineError::ProtocolInit(e.to_string()))?;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Fast liveness poll: process not reaped and stdout still open.
    pub fn is_alive(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => self.transport.is_alive(),
            Ok(Some(status)) => {
                log::warn!("indexer pid {} exited with {}", self.pid, status);
                self.metrics.record_process_crashed();
                self.state = SessionState::Terminated;
                false
            }
            Err(_) => false,
        }
    }

    /// Open a document on the session. Idempotent per URI.
    pub fn open_document(&mut self, file: &Path) -> bool {
        if self.opened_documents.contains(file) {
            return true;
        }
        let text = match self.file_cache.read(file) {
            Some(text) => text,
            None => {
                log::warn!("cannot read {} for didOpen", file.display());
                return false;
            }
        };
        let language_id = match language_for_path(file) {
            SnippetLanguage::C => "c",
            SnippetLanguage::Cpp => "cpp",
        };
        let params = json!({
            "textDocument": {
                "uri": path_to_uri(file),
                "languageId": language_id,
                "version": 0,
                "text": text.as_str(),
            },
        });
        self.metrics.record_method_call("textDocument/didOpen");
        if self.transport.notify("textDocument/didOpen", params).is_err() {
            return false;
        }
        self.opened_documents.insert(file.to_path_buf());
        true
    }

    /// One synchronous call. Timeouts and errors degrade to None.
    fn call(&mut self, method: &str, params: Value) -> Option<Value> {
        self.state = SessionState::Busy;
        self.metrics.record_method_call(method);
        let started = Instant::now();
        let result = self.transport.request(method, params, self.protocol_timeout);
        self.metrics
            .record_timing(method, started.elapsed(), result.is_ok());
        self.state = SessionState::Ready;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("{} degraded to empty result: {}", method, e);
                None
            }
        }
    }

    /// Find symbols by name, restricted to one file.
    pub fn query_definition(&mut self, file: &Path, name: &str) -> Vec<SymbolRef> {
        self.open_document(file);
        let result = match self.call("workspace/symbol", json!({ "query": name })) {
            Some(value) => value,
            None => return Vec::new(),
        };
        let items = match result.as_array() {
            Some(items) => items,
            None => return Vec::new(),
        };
        items
            .iter()
            .filter_map(|item| {
                let item_name = item.get("name")?.as_str()?;
                if item_name != name {
                    return None;
                }
                let location = item.get("location")?;
                let item_file = uri_to_path(location.get("uri")?.as_str()?);
                if item_file != file {
                    return None;
                }
                let range = location.get("range")?;
                Some(SymbolRef {
                    name: item_name.to_string(),
                    file: item_file,
                    line: range["start"]["line"].as_u64()? as u32,
                    character: range["start"]["character"].as_u64().unwrap_or(0) as u32,
                    end_line: range["end"]["line"].as_u64().unwrap_or(0) as u32,
                    kind: symbol_kind_name(item.get("kind").and_then(Value::as_u64).unwrap_or(0))
                        .to_string(),
                })
            })
            .collect()
    }

    /// Resolve the call-hierarchy item at a position.
    pub fn prepare_call_hierarchy(
        &mut self,
        file: &Path,
        line: u32,
        character: u32,
    ) -> Option<SymbolRef> {
        self.open_document(file);
        let params = json!({
            "textDocument": { "uri": path_to_uri(file) },
            "position": { "line": line, "character": character },
        });
        let result = self.call("textDocument/prepareCallHierarchy", params)?;
        result
            .as_array()
            .and_then(|items| items.first())
            .and_then(hierarchy_item_to_symbol)
    }

    /// Direct callees of a symbol, one hierarchy hop.
    pub fn query_callees(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.hierarchy_neighbors(symbol, "callHierarchy/outgoingCalls", "to")
    }

    /// Direct callers of a symbol, one hierarchy hop.
    pub fn query_callers(&mut self, symbol: &SymbolRef) -> Vec<SymbolRef> {
        self.hierarchy_neighbors(symbol, "callHierarchy/incomingCalls", "from")
    }

    fn hierarchy_neighbors(
        &mut self,
        symbol: &SymbolRef,
        method: &str,
        item_field: &str,
    ) -> Vec<SymbolRef> {
        // Re-prepare at the symbol's own position; the indexer resolves the
        // item fresh, which also works for symbols discovered mid-traversal.
        let item = match self.prepare_item_value(symbol) {
            Some(item) => item,
            None => return Vec::new(),
        };
        let result = match self.call(method, json!({ "item": item })) {
            Some(value) => value,
            None => return Vec::new(),
        };
        result
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| call.get(item_field))
                    .filter_map(hierarchy_item_to_symbol)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn prepare_item_value(&mut self, symbol: &SymbolRef) -> Option<Value> {
        self.open_document(&symbol.file);
        let params = json!({
            "textDocument": { "uri": path_to_uri(&symbol.file) },
            "position": { "line": symbol.line, "character": symbol.character },
        });
        let result = self.call("textDocument/prepareCallHierarchy", params)?;
        result.as_array().and_then(|items| items.first()).cloned()
    }

    /// Slice a symbol's definition text out of its source file.
    pub fn definition_text(&mut self, symbol: &SymbolRef) -> Option<String> {
        let contents = self.file_cache.read(&symbol.file)?;
        let start = symbol.line as usize;
        let end = (symbol.end_line as usize).max(start);
        let lines: Vec<&str> = contents.lines().skip(start).take(end - start + 1).collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Tokenize a line range of a file with the local parser.
    ///
    /// Lines are 0-indexed and inclusive. Returns no tokens when the file
    /// cannot be read or the grammar backend is unavailable.
    pub fn tokenize_range(
        &mut self,
        file: &Path,
        start_line: u32,
        end_line: u32,
    ) -> Vec<IdentifierToken> {
        let contents = match self.file_cache.read(file) {
            Some(contents) => contents,
            None => return Vec::new(),
        };
        let start = start_line as usize;
        let end = (end_line as usize).max(start);
        let snippet: Vec<&str> = contents.lines().skip(start).take(end - start + 1).collect();
        if snippet.is_empty() {
            return Vec::new();
        }
        self.tokenizer
            .tokenize(&snippet.join("\n"), language_for_path(file), start_line, 0)
    }

    /// Graceful shutdown with forced-kill escalation. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::ShuttingDown;

        if self.transport.is_alive() {
            let _ = self.transport.request(
                "shutdown",
                Value::Null,
                Duration::from_millis(500).min(self.shutdown_grace),
            );
            let _ = self.transport.notify("exit", Value::Null);
        }
        kill_process_group(self.pid, self.shutdown_grace);
        let _ = self.child.wait();

        self.file_cache.clear();
        self.opened_documents.clear();
        self.metrics.record_process_killed();
        self.state = SessionState::Terminated;
    }

    pub(crate) fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for IndexerSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn hierarchy_item_to_symbol(item: &Value) -> Option<SymbolRef> {
    let name = item.get("name")?.as_str()?.to_string();
    let file = uri_to_path(item.get("uri")?.as_str()?);
    let range = item.get("range")?;
    // selectionRange pins the identifier itself; range spans the definition.
    let position = item.get("selectionRange").unwrap_or(range);
    Some(SymbolRef {
        name,
        file,
        line: position["start"]["line"].as_u64()? as u32,
        character: position["start"]["character"].as_u64().unwrap_or(0) as u32,
        end_line: range["end"]["line"].as_u64().unwrap_or(0) as u32,
        kind: symbol_kind_name(item.get("kind").and_then(Value::as_u64).unwrap_or(0)).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_conversions() {
        let path = PathBuf::from("/proj/src/foo.c");
        let uri = path_to_uri(&path);
        assert_eq!(uri, "file:///proj/src/foo.c");
        assert_eq!(uri_to_path(&uri), path);
        assert_eq!(uri_to_path("plain/path.c"), PathBuf::from("plain/path.c"));
    }

    #[test]
    fn test_symbol_kind_names() {
        assert_eq!(symbol_kind_name(12), "function");
        assert_eq!(symbol_kind_name(6), "method");
        assert_eq!(symbol_kind_name(999), "symbol");
    }

    #[test]
    fn test_resolve_indexer_missing() {
        let err = resolve_indexer("/nonexistent/bin/indexer-xyz").unwrap_err();
        assert!(matches!(err, EngineError::ExecutableNotFound(_)));
        let err = resolve_indexer("definitely-not-a-real-binary-name").unwrap_err();
        assert!(matches!(err, EngineError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_hierarchy_item_parsing() {
        let item = json!({
            "name": "render",
            "kind": 12,
            "uri": "file:///proj/widget.cpp",
            "range": {
                "start": {"line": 10, "character": 0},
                "end": {"line": 24, "character": 1},
            },
            "selectionRange": {
                "start": {"line": 10, "character": 5},
                "end": {"line": 10, "character": 11},
            },
        });
        let symbol = hierarchy_item_to_symbol(&item).unwrap();
        assert_eq!(symbol.name, "render");
        assert_eq!(symbol.file, PathBuf::from("/proj/widget.cpp"));
        assert_eq!(symbol.line, 10);
        assert_eq!(symbol.character, 5);
        assert_eq!(symbol.end_line, 24);
        assert_eq!(symbol.kind, "function");
    }

    #[test]
    fn test_hierarchy_item_missing_fields() {
        assert!(hierarchy_item_to_symbol(&json!({"name": "x"})).is_none());
        assert!(hierarchy_item_to_symbol(&json!({})).is_none());
    }

    #[test]
    fn test_process_alive_self_and_bogus() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(-1));
        assert!(!process_alive(0));
    }
}
