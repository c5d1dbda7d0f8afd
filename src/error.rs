//! Error taxonomy for the dependency engine.
//!
//! Every failure that can cross a component boundary maps to one of these
//! variants. Per-query protocol failures inside a session are absorbed and
//! reported as empty results instead; see the session module.

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Indexer binary cannot be located on PATH or at the configured path
    #[error("indexer executable not found: {0}")]
    ExecutableNotFound(String),

    /// Indexer reports a version below the supported floor
    #[error("indexer version {found} is below the supported minimum {minimum}")]
    VersionTooLow { found: String, minimum: String },

    /// Indexer process exited or misbehaved during startup
    #[error("indexer failed to start: {0}")]
    StartupFailure(String),

    /// Indexer process died after a successful startup
    #[error("indexer process died unexpectedly: {0}")]
    ProcessDied(String),

    /// A protocol call did not complete within its deadline
    #[error("protocol call '{method}' timed out after {seconds}s")]
    ProtocolTimeout { method: String, seconds: u64 },

    /// The initialize handshake failed
    #[error("protocol initialization failed: {0}")]
    ProtocolInit(String),

    /// The bulk indexing pass exited non-zero
    #[error("indexing failed: {0}")]
    IndexingFailed(String),

    /// The bulk indexing pass exceeded its deadline
    #[error("indexing timed out after {0}s")]
    IndexingTimeout(u64),

    /// The project's index cache directory does not exist
    #[error("project index not found at {0}")]
    IndexNotFound(String),

    /// No idle connection available and the pool is at capacity
    #[error("connection pool exhausted: all {0} sessions are busy")]
    PoolExhausted(usize),

    /// Cache metadata or an artifact file cannot be read back
    #[error("cache corrupted: {0}")]
    CacheCorrupted(String),

    /// A request failed validation before touching any subprocess or disk state
    #[error("invalid request: {0}")]
    Validation(String),
}
