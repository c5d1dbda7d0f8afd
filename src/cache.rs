//! Disk cache for dependency-analysis artifacts.
//!
//! Layout under one output directory:
//!
//! ```text
//! <output_dir>/
//!   cache_metadata.json      entry table, written atomically
//!   cache_metadata.json.lock cross-process flock target
//!   cache/<artifact>.json    one artifact per cache key
//! ```
//!
//! Validity is decided by a fingerprint of the source file: matching
//! mtime and size means valid; changed mtime with unchanged size falls
//! back to a content hash, and a hash match refreshes the stored mtime
//! instead of invalidating.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::EngineError;
use crate::models::FetchRequest;

const METADATA_FILE: &str = "cache_metadata.json";
const ARTIFACT_DIR: &str = "cache";
const MAX_ARTIFACT_STEM: usize = 120;

/// Identity of a source file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
    /// Lazily computed; present once the file has been hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    /// Capture mtime and size without hashing.
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("stat failed for {}", path.display()))?;
        let mtime = meta
            .modified()
            .with_context(|| format!("mtime unavailable for {}", path.display()))?;
        let since_epoch = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(Self {
            mtime_secs: since_epoch.as_secs(),
            mtime_nanos: since_epoch.subsec_nanos(),
            size: meta.len(),
            content_hash: None,
        })
    }

    /// Capture with the content hash filled in.
    pub fn capture_with_hash(path: &Path) -> Result<Self> {
        let mut fingerprint = Self::capture(path)?;
        fingerprint.content_hash = Some(hash_file(path)?);
        Ok(fingerprint)
    }
}

/// Streaming blake3 of a file, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("cannot open {} for hashing", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 65536];
    loop {
        let n = file
            .read(&mut buffer)
            .with_context(|| format!("read failed while hashing {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// One cached artifact and the source state it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub artifact_path: PathBuf,
    pub source_file: PathBuf,
    pub created_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// Outcome of revalidating one entry against the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidity {
    /// Fingerprint matches exactly.
    Valid,
    /// Content unchanged but mtime moved; stored mtime should be refreshed.
    ValidTouched,
    /// Source changed.
    Stale,
    /// Source file or artifact is gone.
    Missing,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

/// Holds an exclusive flock for the lifetime of the guard.
struct FileLock {
    file: File,
}

impl FileLock {
    fn exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("cannot open lock file {}", path.display()))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("flock failed on {}", path.display()));
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Cache rooted at one output directory.
pub struct CacheStore {
    output_dir: PathBuf,
    metadata_path: PathBuf,
    lock_path: PathBuf,
}

impl CacheStore {
    pub fn open(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir.join(ARTIFACT_DIR))
            .with_context(|| format!("cannot create cache dir under {}", output_dir.display()))?;
        let metadata_path = output_dir.join(METADATA_FILE);
        let lock_path = output_dir.join(format!("{}.lock", METADATA_FILE));
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            metadata_path,
            lock_path,
        })
    }

    /// Deterministic cache key for a fetch request.
    pub fn cache_key(request: &FetchRequest) -> String {
        let mut parts = vec![
            request.endpoint.as_str().to_string(),
            request.project_id.clone(),
        ];
        if let Some(file) = &request.file {
            parts.push(file.to_string_lossy().into_owned());
        }
        if let Some(name) = &request.function_name {
            parts.push(name.clone());
        }
        if let Some(line) = request.line {
            parts.push(format!("L{}", line));
        }
        if let Some(character) = request.character {
            parts.push(format!("C{}", character));
        }
        if let Some(start) = request.start_line {
            parts.push(format!("S{}", start));
        }
        if let Some(end) = request.end_line {
            parts.push(format!("E{}", end));
        }
        parts.push(format!("lvl{}", request.level));
        parts.join(":")
    }

    /// Filesystem-safe artifact path for a key. Long keys are truncated and
    /// disambiguated with a hash suffix so distinct keys never collide.
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        let mut stem: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if stem.len() > MAX_ARTIFACT_STEM {
            stem.truncate(MAX_ARTIFACT_STEM);
        }
        let suffix = &blake3::hash(key.as_bytes()).to_hex()[..16];
        self.output_dir
            .join(ARTIFACT_DIR)
            .join(format!("{}_{}.json", stem, suffix))
    }

    pub fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        Ok(self.load_metadata().entries.get(key).cloned())
    }

    /// Revalidate one entry against the current state of its source file.
    pub fn check_validity(&self, entry: &CacheEntry) -> CacheValidity {
        if !entry.artifact_path.is_file() {
            return CacheValidity::Missing;
        }
        let current = match Fingerprint::capture(&entry.source_file) {
            Ok(fp) => fp,
            Err(_) => return CacheValidity::Missing,
        };
        let stored = &entry.fingerprint;
        if current.size != stored.size {
            return CacheValidity::Stale;
        }
        if current.mtime_secs == stored.mtime_secs && current.mtime_nanos == stored.mtime_nanos {
            return CacheValidity::Valid;
        }
        // Same size, different mtime: the content hash decides.
        match (&stored.content_hash, hash_file(&entry.source_file)) {
            (Some(stored_hash), Ok(current_hash)) if *stored_hash == current_hash => {
                CacheValidity::ValidTouched
            }
            _ => CacheValidity::Stale,
        }
    }

    /// Load an artifact's JSON payload. A present-but-unparseable artifact is
    /// reported as corruption so the caller can recompute.
    pub fn load_artifact(&self, entry: &CacheEntry) -> Result<Value, EngineError> {
        let raw = std::fs::read_to_string(&entry.artifact_path).map_err(|e| {
            EngineError::CacheCorrupted(format!(
                "{}: {}",
                entry.artifact_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EngineError::CacheCorrupted(format!(
                "{}: {}",
                entry.artifact_path.display(),
                e
            ))
        })
    }

    /// Store an artifact and upsert its metadata entry.
    pub fn store(&self, key: &str, source_file: &Path, payload: &Value) -> Result<CacheEntry> {
        let artifact_path = self.artifact_path(key);
        let fingerprint = Fingerprint::capture_with_hash(source_file)?;

        let _lock = FileLock::exclusive(&self.lock_path)?;
        let rendered = serde_json::to_string_pretty(payload).context("serialize artifact")?;
        std::fs::write(&artifact_path, rendered)
            .with_context(|| format!("write artifact {}", artifact_path.display()))?;

        let entry = CacheEntry {
            key: key.to_string(),
            artifact_path,
            source_file: source_file.to_path_buf(),
            created_at: Utc::now(),
            fingerprint,
        };
        let mut metadata = self.load_metadata();
        metadata.entries.insert(key.to_string(), entry.clone());
        self.write_metadata(&metadata)?;
        Ok(entry)
    }

    /// Refresh the stored mtime after a `ValidTouched` verdict so the next
    /// lookup short-circuits without hashing.
    pub fn refresh_mtime(&self, key: &str) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let mut metadata = self.load_metadata();
        if let Some(entry) = metadata.entries.get_mut(key) {
            let current = Fingerprint::capture(&entry.source_file)?;
            entry.fingerprint.mtime_secs = current.mtime_secs;
            entry.fingerprint.mtime_nanos = current.mtime_nanos;
            self.write_metadata(&metadata)?;
        }
        Ok(())
    }

    /// Remove one entry and its artifact.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let mut metadata = self.load_metadata();
        if let Some(entry) = metadata.entries.remove(key) {
            if let Err(e) = std::fs::remove_file(&entry.artifact_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("cannot remove {}: {}", entry.artifact_path.display(), e);
                }
            }
            self.write_metadata(&metadata)?;
        }
        Ok(())
    }

    /// Remove every entry derived from one source file. Returns the count.
    pub fn invalidate_for_source(&self, source_file: &Path) -> Result<usize> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let mut metadata = self.load_metadata();
        let doomed: Vec<String> = metadata
            .entries
            .iter()
            .filter(|(_, entry)| entry.source_file == source_file)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = metadata.entries.remove(key) {
                if let Err(e) = std::fs::remove_file(&entry.artifact_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("cannot remove {}: {}", entry.artifact_path.display(), e);
                    }
                }
            }
        }
        if !doomed.is_empty() {
            self.write_metadata(&metadata)?;
        }
        Ok(doomed.len())
    }

    /// Count entries that no longer validate.
    pub fn stale_entries(&self) -> Result<usize> {
        let entries = self.entries()?;
        Ok(entries
            .iter()
            .filter(|entry| {
                !matches!(
                    self.check_validity(entry),
                    CacheValidity::Valid | CacheValidity::ValidTouched
                )
            })
            .count())
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        Ok(self.load_metadata().entries.into_values().collect())
    }

    /// Delete all artifacts, the metadata file, and the lock file.
    pub fn purge(&self) -> Result<usize> {
        let entries = self.entries()?;
        let mut removed = 0;
        for entry in &entries {
            match std::fs::remove_file(&entry.artifact_path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("cannot remove {}: {}", entry.artifact_path.display(), e),
            }
        }
        for path in [&self.metadata_path, &self.lock_path] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("cannot remove {}: {}", path.display(), e);
                }
            }
        }
        let _ = std::fs::remove_dir(self.output_dir.join(ARTIFACT_DIR));
        Ok(removed)
    }

    /// Metadata load is tolerant: a truncated or garbled file logs a warning
    /// and yields an empty table, which the next store rewrites whole.
    fn load_metadata(&self) -> Metadata {
        let raw = match std::fs::read_to_string(&self.metadata_path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("cannot read {}: {}", self.metadata_path.display(), e);
                }
                return Metadata::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!(
                    "discarding unreadable cache metadata {}: {}",
                    self.metadata_path.display(),
                    e
                );
                Metadata::default()
            }
        }
    }

    /// Write metadata via tempfile and rename so readers never observe a
    /// partial file.
    fn write_metadata(&self, metadata: &Metadata) -> Result<()> {
        let rendered = serde_json::to_string_pretty(metadata).context("serialize metadata")?;
        let tmp = tempfile::NamedTempFile::new_in(&self.output_dir)
            .context("create metadata tempfile")?;
        std::fs::write(tmp.path(), rendered).context("write metadata tempfile")?;
        tmp.persist(&self.metadata_path)
            .with_context(|| format!("persist {}", self.metadata_path.display()))?;
        Ok(())
    }
}
