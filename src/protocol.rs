//! Line-delimited JSON-RPC transport for indexer sessions.
//!
//! One writer, one reader thread per transport. Requests are strictly
//! synchronous from the caller's point of view: the caller blocks on a
//! channel until the matching response id arrives or the deadline passes.
//! Asynchronous notifications from the indexer (progress, diagnostics) are
//! logged and dropped; reverse requests are acknowledged with a null result
//! so the session never stalls on them.
//!
//! # Lock Ordering
//!
//! 1. **pending map lock**: acquired first
//! 2. **writer lock**: acquired last
//!
//! The reader thread only ever takes one lock at a time.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Error reported by the indexer for one request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcFailure {
    pub code: i64,
    pub message: String,
}

/// Failure modes of a single request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("'{method}' timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

type PendingMap = Arc<Mutex<HashMap<u64, mpsc::Sender<Result<Value, RpcFailure>>>>>;
type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Incoming message classification.
#[derive(Debug)]
enum Incoming {
    Response {
        id: u64,
        result: Result<Value, RpcFailure>,
    },
    Notification {
        method: String,
    },
    /// Reverse request from the indexer that expects an answer
    ServerRequest {
        id: Value,
        method: String,
    },
}

fn classify(value: Value) -> Option<Incoming> {
    let has_method = value.get("method").is_some();
    let id = value.get("id").cloned();
    match (id, has_method) {
        (Some(id), true) => Some(Incoming::ServerRequest {
            id,
            method: value["method"].as_str().unwrap_or_default().to_string(),
        }),
        (None, true) => Some(Incoming::Notification {
            method: value["method"].as_str().unwrap_or_default().to_string(),
        }),
        (Some(id), false) => {
            let id = id.as_u64()?;
            let result = if let Some(err) = value.get("error") {
                Err(serde_json::from_value::<RpcFailure>(err.clone()).unwrap_or(RpcFailure {
                    code: -1,
                    message: err.to_string(),
                }))
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };
            Some(Incoming::Response { id, result })
        }
        (None, false) => None,
    }
}

/// Bidirectional JSON-RPC channel over a pair of byte streams.
pub struct Transport {
    writer: SharedWriter,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    _reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start a transport over the given streams, spawning the reader thread.
    pub fn new<W, R>(writer: W, reader: R) -> Self
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = {
            let writer = writer.clone();
            let pending = pending.clone();
            let alive = alive.clone();
            std::thread::spawn(move || read_loop(reader, writer, pending, alive))
        };

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            _reader: Some(reader_handle),
        }
    }

    /// True until the peer closes its output stream.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a request and block until its response or the deadline.
    pub fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        if !self.is_alive() {
            return Err(RequestError::TransportClosed(
                "peer output stream closed".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();

        // Register before sending so a fast response cannot be lost.
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| RequestError::TransportClosed("pending map poisoned".to_string()))?;
            pending.insert(id, tx);
        }

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = write_line(&self.writer, &message) {
            self.forget(id);
            return Err(RequestError::TransportClosed(e.to_string()));
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(RequestError::Rpc {
                code: failure.code,
                message: failure.message,
            }),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.forget(id);
                Err(RequestError::Timeout {
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.forget(id);
                Err(RequestError::TransportClosed(
                    "reader thread exited".to_string(),
                ))
            }
        }
    }

    /// Send a one-way notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RequestError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        write_line(&self.writer, &message)
            .map_err(|e| RequestError::TransportClosed(e.to_string()))
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

fn write_line(writer: &SharedWriter, message: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    let mut guard = writer
        .lock()
        .map_err(|_| std::io::Error::other("writer poisoned"))?;
    guard.write_all(line.as_bytes())?;
    guard.flush()
}

fn read_loop<R: Read>(reader: R, writer: SharedWriter, pending: PendingMap, alive: Arc<AtomicBool>) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("unparsable message from indexer: {}", e);
                continue;
            }
        };
        match classify(value) {
            Some(Incoming::Response { id, result }) => {
                let tx = pending.lock().ok().and_then(|mut map| map.remove(&id));
                match tx {
                    // A dead receiver means the caller already timed out.
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => log::debug!("late response for request {}", id),
                }
            }
            Some(Incoming::Notification { method }) => {
                log::debug!("indexer notification: {}", method);
            }
            Some(Incoming::ServerRequest { id, method }) => {
                // Acknowledge with a null result; the engine has no opinion
                // on progress tokens or configuration requests.
                log::debug!("acknowledging indexer request: {}", method);
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": null });
                let _ = write_line(&writer, &reply);
            }
            None => log::warn!("message with neither id nor method ignored"),
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Fail every caller still waiting for a response.
    if let Ok(mut map) = pending.lock() {
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(RpcFailure {
                code: -32000,
                message: "indexer stream closed".to_string(),
            }));
        }
    }
}
