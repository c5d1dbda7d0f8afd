//! Vasco CLI - C/C++ dependency analysis engine
//!
//! Usage: vasco <command> [arguments]

mod cli;

use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cli::{parse_args, print_usage, Command, OutputFormat};
use vasco::cleanup::{clean_output_dir, remove_generated_config};
use vasco::config::Config;
use vasco::fetcher::PooledProvider;
use vasco::ingestion::run_indexing;
use vasco::metrics::MetricsCollector;
use vasco::models::{EndpointType, FetchRequest, FetchResponse};
use vasco::pool::{IndexerSessionManager, SessionPool};
use vasco::service::DependencyService;

fn main() -> ExitCode {
    env_logger::init();

    let command = match parse_args() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handler(&shutdown) {
        eprintln!("Error: cannot install signal handler: {}", e);
        return ExitCode::from(1);
    }

    let result = match command {
        Command::Index {
            project_root,
            output_dir,
            show_progress,
            output_format,
        } => run_index(
            &project_root,
            &output_dir,
            show_progress,
            &shutdown,
            output_format,
        ),
        Command::Fetch {
            request,
            output_format,
        } => run_fetch(request, output_format),
        Command::Health {
            output_dir,
            output_format,
        } => run_health(&output_dir, output_format),
        Command::Metrics {
            project_root,
            output_dir,
            output_format,
        } => run_metrics(&project_root, &output_dir, output_format),
        Command::Clean {
            output_dir,
            project_root,
            remove_index,
            output_format,
        } => run_clean(&output_dir, project_root, remove_index, output_format),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn install_signal_handler(shutdown: &Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let flag = Arc::clone(shutdown);
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            flag.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}

fn run_index(
    project_root: &Path,
    output_dir: &Path,
    show_progress: bool,
    shutdown: &Arc<AtomicBool>,
    output_format: OutputFormat,
) -> Result<ExitCode> {
    let config = Config::from_env();
    match run_indexing(project_root, output_dir, &config, shutdown, show_progress) {
        Ok(()) => {
            match output_format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "status": "ok",
                            "project": project_root.display().to_string(),
                            "index": output_dir.join("index").display().to_string(),
                        })
                    );
                }
                OutputFormat::Human => {
                    println!("Indexed {}", project_root.display());
                    println!("Index written to {}", output_dir.join("index").display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::from(1))
        }
    }
}

fn build_service() -> DependencyService<PooledProvider> {
    let config = Config::from_env();
    let metrics = Arc::new(MetricsCollector::new());
    let pool = Arc::new(SessionPool::new(
        IndexerSessionManager::new(config.clone(), Arc::clone(&metrics)),
        config.pool_max_size,
        config.pool_idle_timeout(),
    ));
    let provider = PooledProvider::new(pool, &config);
    DependencyService::new(provider, config, metrics)
}

fn print_response(response: &FetchResponse, output_format: OutputFormat) {
    match output_format {
        OutputFormat::Json => match serde_json::to_string_pretty(response) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => eprintln!("Error: cannot render response: {}", e),
        },
        OutputFormat::Human => {
            println!("{}", response.message);
            if !response.is_empty() {
                match serde_json::to_string_pretty(&response.data) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(e) => eprintln!("Error: cannot render data: {}", e),
                }
            }
        }
    }
}

fn run_fetch(request: FetchRequest, output_format: OutputFormat) -> Result<ExitCode> {
    let service = build_service();
    let response = service.perform_fetch(&request);
    print_response(&response, output_format);
    let failed = response.message.starts_with("Invalid request")
        || response.message.starts_with("Failed")
        || response.message == vasco::service::MSG_NOT_INDEXED;
    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_health(output_dir: &Path, output_format: OutputFormat) -> Result<ExitCode> {
    let service = build_service();
    let status = service.health_status(output_dir);
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Human => {
            println!(
                "indexer:   {}{}",
                if status.indexer_available { "ok" } else { "missing or too old" },
                status
                    .indexer_version
                    .as_deref()
                    .map(|v| format!(" ({})", v))
                    .unwrap_or_default()
            );
            println!("index:     {}", if status.index_present { "present" } else { "absent" });
            println!("cache:     {}", if status.cache_writable { "writable" } else { "not writable" });
            println!(
                "tokenizer: {}",
                if status.tokenizer_available { "available" } else { "unavailable" }
            );
            println!("stale cache entries: {}", status.stale_cache_entries);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_metrics(
    project_root: &Path,
    output_dir: &Path,
    output_format: OutputFormat,
) -> Result<ExitCode> {
    let service = build_service();
    // Exercise the engine once so the counters reflect a real round trip.
    let probe = FetchRequest {
        project_root: project_root.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        project_id: "health".to_string(),
        endpoint: EndpointType::HealthCheck,
        file: None,
        function_name: None,
        line: None,
        character: None,
        start_line: None,
        end_line: None,
        level: 1,
    };
    let _ = service.perform_fetch(&probe);
    let snapshot = service.metrics_snapshot();
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Human => {
            println!("processes started: {}", snapshot.processes_started);
            println!("processes killed:  {}", snapshot.processes_killed);
            println!("processes crashed: {}", snapshot.processes_crashed);
            println!(
                "cache: {} hits, {} misses, {} stale",
                snapshot.cache_hits, snapshot.cache_misses, snapshot.cache_stale
            );
            for (method, stats) in &snapshot.timings {
                println!(
                    "{}: {} calls, avg {:.1}ms, min {}ms, max {}ms, {:.0}% ok",
                    method,
                    stats.count,
                    stats.average_ms(),
                    stats.min_ms,
                    stats.max_ms,
                    stats.success_rate() * 100.0
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_clean(
    output_dir: &Path,
    project_root: Option<PathBuf>,
    remove_index: bool,
    output_format: OutputFormat,
) -> Result<ExitCode> {
    let mut report = clean_output_dir(output_dir, remove_index)?;
    if let Some(root) = project_root {
        report.config_removed = remove_generated_config(&root)?;
    }
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "artifacts_removed": report.artifacts_removed,
                    "index_removed": report.index_removed,
                    "config_removed": report.config_removed,
                })
            );
        }
        OutputFormat::Human => {
            println!("Removed {} cached artifact(s)", report.artifacts_removed);
            if report.index_removed {
                println!("Removed index directory");
            }
            if report.config_removed {
                println!("Removed generated compile-flags config");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
