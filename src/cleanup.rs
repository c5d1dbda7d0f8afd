//! Removal of engine-owned state: cached artifacts, the background index,
//! and generated compile-flags configs. User files are never touched.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cache::CacheStore;
use crate::fetcher::indexer_cache_dir;
use crate::ingestion::is_generated_config;

/// What one cleanup pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub artifacts_removed: usize,
    pub index_removed: bool,
    pub config_removed: bool,
}

/// Remove the artifact cache and optionally the background index under one
/// output directory. Missing pieces are skipped, not errors.
pub fn clean_output_dir(output_dir: &Path, remove_index: bool) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    if output_dir.is_dir() {
        let store = CacheStore::open(output_dir)
            .with_context(|| format!("cannot open cache at {}", output_dir.display()))?;
        report.artifacts_removed = store.purge()?;
    }

    if remove_index {
        let index_dir = indexer_cache_dir(output_dir);
        if index_dir.is_dir() {
            std::fs::remove_dir_all(&index_dir)
                .with_context(|| format!("cannot remove {}", index_dir.display()))?;
            report.index_removed = true;
        }
    }
    Ok(report)
}

/// Remove a generated compile-flags config. A config without the generation
/// marker belongs to the user and is left alone.
pub fn remove_generated_config(project_root: &Path) -> Result<bool> {
    let path = project_root.join(".clangd");
    if !path.is_file() || !is_generated_config(&path) {
        return Ok(false);
    }
    std::fs::remove_file(&path).with_context(|| format!("cannot remove {}", path.display()))?;
    Ok(true)
}
