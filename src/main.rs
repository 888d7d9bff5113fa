/// nospawn-run: run a program with process creation denied
///
/// Injects `libnospawn_preload.so` through `LD_PRELOAD`, enforces a wall clock
/// limit and reports how the program ended.
///
/// # Usage
/// ```bash
/// nospawn-run run --timeout 10 --workdir /tmp/job -- ./main
/// nospawn-run run --json -- /usr/bin/python3 solution.py
/// nospawn-run list --family exec
/// ```
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nospawn::types::INTERRUPT_MARKER;
use nospawn::{BlockedOperation, Family, LaunchConfig, LaunchStatus, Launcher};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with the preload library injected
    Run {
        /// Path to libnospawn_preload.so (defaults to $NOSPAWN_PRELOAD, then the launcher's directory)
        #[arg(long)]
        shim: Option<PathBuf>,
        /// Working directory for the command
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Wall clock time limit in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// JSON file with launcher settings; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Extra environment variable (format: KEY=VALUE)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        environment: Vec<String>,
        /// Start the command with an empty environment (PATH only)
        #[arg(long)]
        clean_env: bool,
        /// Keep absolute workdir paths in the captured output
        #[arg(long)]
        keep_paths: bool,
        /// Print a JSON report instead of the program's output
        #[arg(long)]
        json: bool,
        /// Command and arguments to execute
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// List the operations the preload library can block
    List {
        /// Only show one family (fork, exec, spawn, clone)
        #[arg(long)]
        family: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            shim,
            workdir,
            timeout,
            config,
            environment,
            clean_env,
            keep_paths,
            json,
            command,
        } => {
            let mut launch_config = match config {
                Some(ref path) => LaunchConfig::from_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => LaunchConfig::default(),
            };
            if shim.is_some() {
                launch_config.shim = shim;
            }
            if workdir.is_some() {
                launch_config.workdir = workdir;
            }
            if let Some(secs) = timeout {
                launch_config.timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|e| anyhow::anyhow!("Invalid timeout {}: {}", secs, e))?;
            }
            for pair in &environment {
                let (key, value) = parse_env_pair(pair)?;
                launch_config.environment.push((key, value));
            }
            if clean_env {
                launch_config.inherit_env = false;
            }
            if keep_paths {
                launch_config.scrub_workdir = false;
            }

            let launcher = Launcher::new(launch_config)?;
            let report = launcher.run(&command)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.stdout);
                eprint!("{}", report.stderr);
                if report.status == LaunchStatus::TimedOut {
                    println!("{}", INTERRUPT_MARKER);
                }
            }

            std::process::exit(report.exit_code_for_shell());
        }
        Commands::List { family, json } => {
            let family = family
                .as_deref()
                .map(str::parse::<Family>)
                .transpose()?;
            let operations: Vec<BlockedOperation> = BlockedOperation::ALL
                .iter()
                .copied()
                .filter(|op| family.map_or(true, |f| op.in_family(f)))
                .collect();

            if json {
                let entries: Vec<_> = operations
                    .iter()
                    .map(|op| {
                        let feature = (!op.is_core()).then(|| op.family().feature());
                        serde_json::json!({
                            "symbol": op.symbol(),
                            "family": op.family(),
                            "core": op.is_core(),
                            "default": op.is_default(),
                            "feature": feature,
                            "exit_code": op.exit_code(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for op in operations {
                    let enabled_by = if op.is_core() {
                        "always".to_string()
                    } else {
                        format!("feature {}", op.family().feature())
                    };
                    println!("{:<14} {:<6} {}", op.symbol(), op.family(), enabled_by);
                }
            }
            Ok(())
        }
    }
}

fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => anyhow::bail!("Invalid environment variable '{}': expected KEY=VALUE", pair),
    }
}
