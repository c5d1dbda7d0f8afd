//! CLI argument parsing for Vasco
//!
//! Defines the Command enum and parse_args() function for all CLI commands.

use anyhow::Result;
use std::path::PathBuf;

use vasco::models::{EndpointType, FetchRequest};

/// Output rendering for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn print_usage() {
    eprintln!("Vasco - C/C++ dependency analysis engine");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  vasco <command> [arguments]");
    eprintln!("  vasco --help");
    eprintln!();
    eprintln!("  vasco index --project <DIR> --out <DIR> [--no-progress]");
    eprintln!("  vasco fetch --project <DIR> --out <DIR> --endpoint <NAME> [--file <PATH>]");
    eprintln!("              [--function <NAME>] [--line <N>] [--character <N>]");
    eprintln!("              [--start <N>] [--end <N>] [--level <N>] [--project-id <ID>]");
    eprintln!("  vasco health --out <DIR>");
    eprintln!("  vasco metrics --project <DIR> --out <DIR>");
    eprintln!("  vasco clean --out <DIR> [--project <DIR>] [--keep-index]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  index     Build the background index for a project");
    eprintln!("  fetch     Fetch a dependency tree for a symbol, position, or line range");
    eprintln!("  health    Report engine health for an output directory");
    eprintln!("  metrics   Run a health probe and print engine metrics");
    eprintln!("  clean     Remove cached artifacts (and the index unless kept)");
    eprintln!();
    eprintln!("Global arguments:");
    eprintln!("  --output <FORMAT>   Output format: human (default) or json");
    eprintln!();
    eprintln!("Index arguments:");
    eprintln!("  --project <DIR>     Project root to index");
    eprintln!("  --out <DIR>         Output directory for the index and cache");
    eprintln!("  --no-progress       Disable the progress spinner");
    eprintln!();
    eprintln!("Fetch arguments:");
    eprintln!("  --project <DIR>     Project root");
    eprintln!("  --out <DIR>         Output directory holding the index and cache");
    eprintln!("  --endpoint <NAME>   health_check, fetch_dependencies_by_component,");
    eprintln!("                      fetch_dependencies_by_line_character, or");
    eprintln!("                      fetch_dependencies_by_file");
    eprintln!("  --file <PATH>       Source file, relative to the project root");
    eprintln!("  --function <NAME>   Function name (component endpoint)");
    eprintln!("  --line <N>          0-indexed line (position endpoint)");
    eprintln!("  --character <N>     0-indexed character (position endpoint)");
    eprintln!("  --start <N>         0-indexed first line (file-range endpoint)");
    eprintln!("  --end <N>           0-indexed last line (file-range endpoint)");
    eprintln!("  --level <N>         Traversal depth (default: 1)");
    eprintln!("  --project-id <ID>   Cache key namespace (default: project dir name)");
    eprintln!();
    eprintln!("Health arguments:");
    eprintln!("  --out <DIR>         Output directory to inspect");
    eprintln!();
    eprintln!("Clean arguments:");
    eprintln!("  --out <DIR>         Output directory to clean");
    eprintln!("  --project <DIR>     Also remove a generated compile-flags config here");
    eprintln!("  --keep-index        Keep the background index, remove artifacts only");
}

pub enum Command {
    Index {
        project_root: PathBuf,
        output_dir: PathBuf,
        show_progress: bool,
        output_format: OutputFormat,
    },
    Fetch {
        request: FetchRequest,
        output_format: OutputFormat,
    },
    Health {
        output_dir: PathBuf,
        output_format: OutputFormat,
    },
    Metrics {
        project_root: PathBuf,
        output_dir: PathBuf,
        output_format: OutputFormat,
    },
    Clean {
        output_dir: PathBuf,
        project_root: Option<PathBuf>,
        remove_index: bool,
        output_format: OutputFormat,
    },
}

pub fn parse_args() -> Result<Command> {
    parse_args_impl(|| {
        println!("vasco {}", env!("CARGO_PKG_VERSION"));
    })
}

pub fn parse_args_impl<F>(print_version: F) -> Result<Command>
where
    F: FnOnce(),
{
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Err(anyhow::anyhow!("Missing command"));
    }

    let command = &args[1];

    if command == "--version" || command == "-V" {
        print_version();
        std::process::exit(0);
    }

    if command == "--help" || command == "-h" {
        print_usage();
        std::process::exit(0);
    }

    // Global --output flag, honored by every command
    let output_format = args
        .iter()
        .position(|x| x == "--output")
        .and_then(|i| args.get(i + 1))
        .and_then(|fmt| OutputFormat::from_str(fmt))
        .unwrap_or(OutputFormat::Human);

    match command.as_str() {
        "index" => {
            let mut project_root: Option<PathBuf> = None;
            let mut output_dir: Option<PathBuf> = None;
            let mut show_progress = true;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--project" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--project requires an argument"));
                        }
                        project_root = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--out" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--out requires an argument"));
                        }
                        output_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--no-progress" => {
                        show_progress = false;
                        i += 1;
                    }
                    "--output" => {
                        i += 2;
                    }
                    arg => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", arg));
                    }
                }
            }

            Ok(Command::Index {
                project_root: project_root
                    .ok_or_else(|| anyhow::anyhow!("--project is required"))?,
                output_dir: output_dir.ok_or_else(|| anyhow::anyhow!("--out is required"))?,
                show_progress,
                output_format,
            })
        }
        "fetch" => {
            let mut project_root: Option<PathBuf> = None;
            let mut output_dir: Option<PathBuf> = None;
            let mut endpoint: Option<EndpointType> = None;
            let mut project_id: Option<String> = None;
            let mut file: Option<PathBuf> = None;
            let mut function_name: Option<String> = None;
            let mut line: Option<u32> = None;
            let mut character: Option<u32> = None;
            let mut start_line: Option<u32> = None;
            let mut end_line: Option<u32> = None;
            let mut level: u32 = 1;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--project" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--project requires an argument"));
                        }
                        project_root = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--out" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--out requires an argument"));
                        }
                        output_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--endpoint" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--endpoint requires an argument"));
                        }
                        endpoint = Some(EndpointType::parse(&args[i + 1]).ok_or_else(|| {
                            anyhow::anyhow!("Unknown endpoint: {}", args[i + 1])
                        })?);
                        i += 2;
                    }
                    "--project-id" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--project-id requires an argument"));
                        }
                        project_id = Some(args[i + 1].clone());
                        i += 2;
                    }
                    "--file" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--file requires an argument"));
                        }
                        file = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--function" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--function requires an argument"));
                        }
                        function_name = Some(args[i + 1].clone());
                        i += 2;
                    }
                    "--line" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--line requires an argument"));
                        }
                        line = Some(args[i + 1].parse()?);
                        i += 2;
                    }
                    "--character" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--character requires an argument"));
                        }
                        character = Some(args[i + 1].parse()?);
                        i += 2;
                    }
                    "--start" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--start requires an argument"));
                        }
                        start_line = Some(args[i + 1].parse()?);
                        i += 2;
                    }
                    "--end" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--end requires an argument"));
                        }
                        end_line = Some(args[i + 1].parse()?);
                        i += 2;
                    }
                    "--level" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--level requires an argument"));
                        }
                        level = args[i + 1].parse()?;
                        i += 2;
                    }
                    "--output" => {
                        i += 2;
                    }
                    arg => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", arg));
                    }
                }
            }

            let project_root =
                project_root.ok_or_else(|| anyhow::anyhow!("--project is required"))?;
            let project_id = project_id.unwrap_or_else(|| {
                project_root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string())
            });

            Ok(Command::Fetch {
                request: FetchRequest {
                    project_root,
                    output_dir: output_dir.ok_or_else(|| anyhow::anyhow!("--out is required"))?,
                    project_id,
                    endpoint: endpoint
                        .ok_or_else(|| anyhow::anyhow!("--endpoint is required"))?,
                    file,
                    function_name,
                    line,
                    character,
                    start_line,
                    end_line,
                    level,
                },
                output_format,
            })
        }
        "health" | "metrics" => {
            let mut project_root: Option<PathBuf> = None;
            let mut output_dir: Option<PathBuf> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--project" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--project requires an argument"));
                        }
                        project_root = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--out" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--out requires an argument"));
                        }
                        output_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--output" => {
                        i += 2;
                    }
                    arg => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", arg));
                    }
                }
            }

            let output_dir = output_dir.ok_or_else(|| anyhow::anyhow!("--out is required"))?;
            if command == "health" {
                Ok(Command::Health {
                    output_dir,
                    output_format,
                })
            } else {
                Ok(Command::Metrics {
                    project_root: project_root
                        .ok_or_else(|| anyhow::anyhow!("--project is required"))?,
                    output_dir,
                    output_format,
                })
            }
        }
        "clean" => {
            let mut output_dir: Option<PathBuf> = None;
            let mut project_root: Option<PathBuf> = None;
            let mut remove_index = true;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--out" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--out requires an argument"));
                        }
                        output_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--project" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--project requires an argument"));
                        }
                        project_root = Some(PathBuf::from(&args[i + 1]));
                        i += 2;
                    }
                    "--keep-index" => {
                        remove_index = false;
                        i += 1;
                    }
                    "--output" => {
                        i += 2;
                    }
                    arg => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", arg));
                    }
                }
            }

            Ok(Command::Clean {
                output_dir: output_dir.ok_or_else(|| anyhow::anyhow!("--out is required"))?,
                project_root,
                remove_index,
                output_format,
            })
        }
        other => Err(anyhow::anyhow!("Unknown command: {}", other)),
    }
}
