//! Project indexing: version gate, compile-flags scaffolding, and the
//! background index build.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::EngineError;
use crate::fetcher::indexer_cache_dir;
use crate::session::resolve_indexer;

/// Marker placed in generated configs so cleanup never deletes a user file.
pub const GENERATED_CONFIG_MARKER: &str = "# generated by vasco";

const GENERATED_CONFIG: &str = "\
# generated by vasco
CompileFlags:
  Add: [-xc++, -std=c++17]
";

/// Parse the leading `major.minor.patch` out of arbitrary version output.
pub fn parse_version(output: &str) -> Option<(u32, u32, u32)> {
    for word in output.split_whitespace() {
        let candidate: &str = word.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');
        let mut parts = candidate.split('.');
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok());
        if let (Some(major), Some(minor)) = (major, minor) {
            let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            return Some((major, minor, patch));
        }
    }
    None
}

pub fn version_at_least(found: (u32, u32, u32), minimum: (u32, u32, u32)) -> bool {
    found >= minimum
}

/// Ask the indexer binary for its version string.
pub fn indexer_version(executable: &str) -> Result<String, EngineError> {
    let path = resolve_indexer(executable)?;
    let output = Command::new(&path)
        .arg("--version")
        .output()
        .map_err(|e| EngineError::StartupFailure(format!("{} --version: {}", path.display(), e)))?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

/// Write a compile-flags config at the project root when the project has
/// neither a compilation database nor its own config. Returns true when a
/// file was written.
pub fn generate_config(project_root: &Path) -> Result<bool> {
    let own_config = project_root.join(".clangd");
    if own_config.exists() || project_root.join("compile_commands.json").exists() {
        return Ok(false);
    }
    // Also honor the common build/ location for the compilation database.
    if project_root.join("build/compile_commands.json").exists() {
        return Ok(false);
    }
    std::fs::write(&own_config, GENERATED_CONFIG)
        .with_context(|| format!("cannot write {}", own_config.display()))?;
    log::info!("generated fallback compile flags at {}", own_config.display());
    Ok(true)
}

/// Check whether a generated config (as opposed to a user's own) is present.
pub fn is_generated_config(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.starts_with(GENERATED_CONFIG_MARKER),
        Err(_) => false,
    }
}

/// Whether the index for an output directory has been built.
pub fn index_present(output_dir: &Path) -> bool {
    indexer_cache_dir(output_dir).is_dir()
}

/// Build the background index for one project.
///
/// Blocks until the indexer exits, the timeout lapses, or `shutdown` is
/// raised by a signal handler. Timeout and shutdown both kill the child.
pub fn run_indexing(
    project_root: &Path,
    output_dir: &Path,
    config: &Config,
    shutdown: &Arc<AtomicBool>,
    show_progress: bool,
) -> Result<(), EngineError> {
    let executable = resolve_indexer(&config.indexer_executable)?;

    let version_line = indexer_version(&config.indexer_executable)?;
    if let (Some(found), Some(minimum)) = (
        parse_version(&version_line),
        parse_version(&config.min_indexer_version),
    ) {
        if !version_at_least(found, minimum) {
            return Err(EngineError::VersionTooLow {
                found: format!("{}.{}.{}", found.0, found.1, found.2),
                minimum: config.min_indexer_version.clone(),
            });
        }
    }

    let index_dir = indexer_cache_dir(output_dir);
    std::fs::create_dir_all(&index_dir)
        .map_err(|e| EngineError::IndexingFailed(format!("cannot create index dir: {}", e)))?;

    if let Err(e) = generate_config(project_root) {
        log::warn!("compile-flags scaffolding skipped: {}", e);
    }

    let mut child = Command::new(&executable)
        .arg("--index-root")
        .arg(project_root)
        .arg("--index-dir")
        .arg(&index_dir)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::IndexingFailed(format!("{}: {}", executable.display(), e)))?;

    let spinner = if show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} indexing {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(project_root.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    let deadline = Instant::now() + config.indexing_timeout();
    let status = loop {
        if shutdown.load(Ordering::SeqCst) {
            let _ = child.kill();
            let _ = child.wait();
            if let Some(bar) = &spinner {
                bar.finish_and_clear();
            }
            return Err(EngineError::IndexingFailed("aborted by signal".to_string()));
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    if let Some(bar) = &spinner {
                        bar.finish_and_clear();
                    }
                    return Err(EngineError::IndexingTimeout(config.indexing_timeout_secs));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                if let Some(bar) = &spinner {
                    bar.finish_and_clear();
                }
                return Err(EngineError::IndexingFailed(format!("wait failed: {}", e)));
            }
        }
    };
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }

    if !status.success() {
        let mut stderr_tail = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            use std::io::Read;
            let mut buf = String::new();
            if pipe.read_to_string(&mut buf).is_ok() {
                let tail: Vec<&str> = buf.lines().rev().take(10).collect();
                stderr_tail = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            }
        }
        return Err(EngineError::IndexingFailed(format!(
            "indexer exited with {}: {}",
            status, stderr_tail
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_variants() {
        assert_eq!(parse_version("clangd version 17.0.6"), Some((17, 0, 6)));
        assert_eq!(
            parse_version("Ubuntu clangd version 18.1.3 (1ubuntu1)"),
            Some((18, 1, 3))
        );
        assert_eq!(parse_version("version 19.1"), Some((19, 1, 0)));
        assert_eq!(parse_version("no digits here"), None);
    }

    #[test]
    fn test_version_comparison() {
        assert!(version_at_least((17, 0, 6), (17, 0, 0)));
        assert!(version_at_least((18, 0, 0), (17, 9, 9)));
        assert!(!version_at_least((16, 9, 9), (17, 0, 0)));
        assert!(!version_at_least((17, 0, 0), (17, 0, 1)));
    }

    #[test]
    fn test_generate_config_skips_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("compile_commands.json"), "[]").unwrap();
        assert!(!generate_config(dir.path()).unwrap());
        assert!(!dir.path().join(".clangd").exists());
    }

    #[test]
    fn test_generate_config_skips_user_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".clangd"), "CompileFlags: {}").unwrap();
        assert!(!generate_config(dir.path()).unwrap());
        assert!(!is_generated_config(&dir.path().join(".clangd")));
    }

    #[test]
    fn test_generate_config_writes_marked_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(generate_config(dir.path()).unwrap());
        let path = dir.path().join(".clangd");
        assert!(is_generated_config(&path));
        // Second run is a no-op.
        assert!(!generate_config(dir.path()).unwrap());
    }
}
