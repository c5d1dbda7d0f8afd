//! Bounded pool of indexer sessions keyed by project and cache directory.
//!
//! Lock ordering: the pool mutex guards only bookkeeping (slot table and
//! in-flight creation guards). Session creation, health checks, and process
//! kills all run outside the lock so a slow indexer spawn never blocks
//! unrelated acquires.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::session::{kill_process_group, IndexerSession};

/// Creates, inspects, and destroys pooled sessions.
///
/// The pool only sees this trait, so tests can drive it with in-memory
/// fakes instead of real subprocesses.
pub trait SessionManager {
    type Session: Send;
    /// Handle that can kill a session from another thread while the session
    /// itself is checked out.
    type KillToken: Clone + Send;

    fn create(
        &self,
        project_root: &Path,
        cache_dir: &Path,
    ) -> Result<Self::Session, EngineError>;

    fn kill_token(&self, session: &Self::Session) -> Self::KillToken;

    fn is_healthy(&self, session: &mut Self::Session) -> bool;

    fn close(&self, session: &mut Self::Session);

    fn force_kill(&self, token: &Self::KillToken);
}

/// Production manager backed by real indexer subprocesses.
pub struct IndexerSessionManager {
    config: Config,
    metrics: Arc<MetricsCollector>,
}

impl IndexerSessionManager {
    pub fn new(config: Config, metrics: Arc<MetricsCollector>) -> Self {
        Self { config, metrics }
    }
}

impl SessionManager for IndexerSessionManager {
    type Session = IndexerSession;
    type KillToken = i32;

    fn create(
        &self,
        project_root: &Path,
        cache_dir: &Path,
    ) -> Result<IndexerSession, EngineError> {
        IndexerSession::start(project_root, cache_dir, &self.config, Arc::clone(&self.metrics))
    }

    fn kill_token(&self, session: &IndexerSession) -> i32 {
        session.pid()
    }

    fn is_healthy(&self, session: &mut IndexerSession) -> bool {
        session.is_alive()
    }

    fn close(&self, session: &mut IndexerSession) {
        session.shutdown();
    }

    fn force_kill(&self, token: &i32) {
        kill_process_group(*token, Duration::from_millis(0));
    }
}

struct PoolSlot<M: SessionManager> {
    id: u64,
    project_root: PathBuf,
    cache_dir: PathBuf,
    last_used: Instant,
    request_count: u64,
    token: M::KillToken,
    /// None while the session is checked out.
    session: Option<M::Session>,
}

struct PoolState<M: SessionManager> {
    slots: Vec<PoolSlot<M>>,
    /// Projects with a creation in flight, to serialize cold starts per key.
    creating: HashSet<(PathBuf, PathBuf)>,
    next_id: u64,
    closed: bool,
}

/// Counts reported by [`SessionPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
}

/// Fixed-capacity session pool.
pub struct SessionPool<M: SessionManager> {
    manager: M,
    max_size: usize,
    idle_timeout: Duration,
    state: Mutex<PoolState<M>>,
    condvar: Condvar,
}

impl<M: SessionManager> SessionPool<M> {
    pub fn new(manager: M, max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            manager,
            max_size: max_size.max(1),
            idle_timeout,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                creating: HashSet::new(),
                next_id: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Check out a session for one project, creating or evicting as needed.
    ///
    /// Returns [`EngineError::PoolExhausted`] when every slot is busy and
    /// nothing can be evicted.
    pub fn acquire(
        &self,
        project_root: &Path,
        cache_dir: &Path,
    ) -> Result<PooledSession<'_, M>, EngineError> {
        let key = (project_root.to_path_buf(), cache_dir.to_path_buf());
        loop {
            let mut candidate = None;
            {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if state.closed {
                    return Err(EngineError::PoolExhausted(self.max_size));
                }

                // Reuse an idle session for the same project first.
                if let Some(pos) = state.slots.iter().position(|slot| {
                    slot.session.is_some()
                        && slot.project_root == key.0
                        && slot.cache_dir == key.1
                }) {
                    let slot = &mut state.slots[pos];
                    let session = slot.session.take();
                    candidate = session.map(|s| (slot.id, s));
                } else if state.creating.contains(&key) {
                    // Another thread is already spawning for this project;
                    // wait for it rather than double-spawning.
                    let _unused = self
                        .condvar
                        .wait_timeout(state, Duration::from_millis(200))
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    continue;
                } else if state.slots.len() + state.creating.len() < self.max_size {
                    state.creating.insert(key.clone());
                } else {
                    // At capacity: evict the least recently used idle slot,
                    // preferring one whose idle timeout has lapsed.
                    let now = Instant::now();
                    let evictable = state
                        .slots
                        .iter()
                        .enumerate()
                        .filter(|(_, slot)| slot.session.is_some())
                        .min_by_key(|(_, slot)| {
                            let expired = now.duration_since(slot.last_used) >= self.idle_timeout;
                            (!expired, slot.last_used)
                        })
                        .map(|(pos, _)| pos);
                    match evictable {
                        Some(pos) => {
                            let mut slot = state.slots.remove(pos);
                            drop(state);
                            if let Some(mut session) = slot.session.take() {
                                self.manager.close(&mut session);
                            }
                            continue;
                        }
                        None => return Err(EngineError::PoolExhausted(self.max_size)),
                    }
                }
            }

            // Health-check the reused session outside the lock.
            if let Some((slot_id, mut session)) = candidate {
                if self.manager.is_healthy(&mut session) {
                    return Ok(PooledSession {
                        pool: self,
                        slot_id,
                        session: Some(session),
                    });
                }
                log::warn!("discarding dead pooled session for {}", key.0.display());
                self.manager.close(&mut session);
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                state.slots.retain(|slot| slot.id != slot_id);
                continue;
            }

            // We hold the creation guard for this key; spawn outside the lock.
            let created = self.manager.create(&key.0, &key.1);
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.creating.remove(&key);
            self.condvar.notify_all();
            let session = match created {
                Ok(session) => session,
                Err(e) => return Err(e),
            };
            if state.closed {
                drop(state);
                let mut session = session;
                self.manager.close(&mut session);
                return Err(EngineError::PoolExhausted(self.max_size));
            }
            let token = self.manager.kill_token(&session);
            let slot_id = state.next_id;
            state.next_id += 1;
            state.slots.push(PoolSlot {
                id: slot_id,
                project_root: key.0.clone(),
                cache_dir: key.1.clone(),
                last_used: Instant::now(),
                request_count: 0,
                token,
                session: None,
            });
            return Ok(PooledSession {
                pool: self,
                slot_id,
                session: Some(session),
            });
        }
    }

    fn release(&self, slot_id: u64, mut session: M::Session) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.closed {
            drop(state);
            self.manager.close(&mut session);
            return;
        }
        match state.slots.iter_mut().find(|slot| slot.id == slot_id) {
            Some(slot) => {
                slot.last_used = Instant::now();
                slot.request_count += 1;
                slot.session = Some(session);
            }
            None => {
                // Slot was removed while checked out (close_all already force
                // killed the process); just drop the handle.
                drop(state);
                self.manager.close(&mut session);
            }
        }
        self.condvar.notify_all();
    }

    /// Close idle sessions unused for longer than the idle timeout.
    /// Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        let mut expired = Vec::new();
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let timeout = self.idle_timeout;
            let mut kept = Vec::new();
            for mut slot in state.slots.drain(..) {
                let idle_expired = slot.session.is_some()
                    && now.duration_since(slot.last_used) >= timeout;
                if idle_expired {
                    if let Some(session) = slot.session.take() {
                        expired.push(session);
                    }
                } else {
                    kept.push(slot);
                }
            }
            state.slots = kept;
        }
        let count = expired.len();
        for mut session in expired {
            self.manager.close(&mut session);
        }
        count
    }

    /// Shut the pool down: close every idle session and force-kill the
    /// process behind every checked-out one.
    pub fn close_all(&self) {
        let (idle, busy_tokens): (Vec<M::Session>, Vec<M::KillToken>) = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.closed = true;
            let mut idle = Vec::new();
            let mut tokens = Vec::new();
            for mut slot in state.slots.drain(..) {
                match slot.session.take() {
                    Some(session) => idle.push(session),
                    None => tokens.push(slot.token.clone()),
                }
            }
            (idle, tokens)
        };
        self.condvar.notify_all();
        for mut session in idle {
            self.manager.close(&mut session);
        }
        for token in busy_tokens {
            self.manager.force_kill(&token);
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = state.slots.iter().filter(|s| s.session.is_some()).count();
        PoolStats {
            total: state.slots.len(),
            idle,
            busy: state.slots.len() - idle,
        }
    }
}

/// A checked-out session. Returned to the pool on drop.
pub struct PooledSession<'a, M: SessionManager> {
    pool: &'a SessionPool<M>,
    slot_id: u64,
    session: Option<M::Session>,
}

impl<M: SessionManager> PooledSession<'_, M> {
    pub fn session(&mut self) -> &mut M::Session {
        // Present from construction until drop.
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<M: SessionManager> std::fmt::Debug for PooledSession<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("slot_id", &self.slot_id)
            .finish_non_exhaustive()
    }
}

impl<M: SessionManager> Drop for PooledSession<'_, M> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(self.slot_id, session);
        }
    }
}
