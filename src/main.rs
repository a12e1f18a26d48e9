use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use warpbench::config::CONFIG_ENV;
use warpbench::{matrix, remote, runner, BenchConfig, RunContext};

#[derive(Parser)]
#[command(
    name = "warpbench",
    about = "Repeatable two-host network benchmarks for warpcore",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: ./warpbench.toml)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// JSON output for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full benchmark matrix (the default)
    Bench,

    /// Apply the benchmark network configuration
    Configure {
        /// Test case index (default: all, in order)
        #[arg(long)]
        case: Option<usize>,
    },

    /// Leave accelerated mode and remove the benchmark network configuration
    Unconfig {
        /// Test case index (default: all, in order)
        #[arg(long)]
        case: Option<usize>,
    },

    /// Stop benchmark processes on every host
    Stop,

    /// Build the benchmarks
    Build,

    /// Delete logs, results and profiles of previous runs
    ClearLogs,

    /// Print the trial list without contacting any host
    Plan,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = BenchConfig::resolve(cli.config.as_deref()).context("invalid configuration")?;

    let command = cli.command.unwrap_or(Commands::Bench);
    if let Commands::Plan = command {
        print_plan(&config, cli.json)?;
        return Ok(());
    }

    let exec = remote::executor_for(&config, cli.dry_run);
    let ctx = RunContext::new(config, exec);

    match command {
        Commands::Bench => {
            tracing::info!(dry_run = cli.dry_run, "running benchmark matrix");
            let report = runner::run_bench(&ctx).await.context("benchmark run failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nwarpbench run {}", report.run_id);
                println!("{:<22} | {:<6} | {:<5} | Result", "Case", "Kind", "Flags");
                println!("{:-<22}-|-{:-<6}-|-{:-<5}-|-{:-<30}", "", "", "", "");
                for t in &report.trials {
                    println!(
                        "{:<22} | {:<6} | {:<5} | {}",
                        t.case,
                        t.variant.kind,
                        t.variant.flags().join(" "),
                        t.artifacts.result
                    );
                }
                if !report.warnings.is_empty() {
                    println!("\n{} best-effort command(s) failed:", report.warnings.len());
                    for w in &report.warnings {
                        println!(" - {}: {} (exit {})", w.host, w.command, w.exit_code);
                    }
                }
                println!();
            }
        }
        Commands::Configure { case } => {
            let cases = runner::select_cases(&ctx, case)?;
            runner::configure_cases(&ctx, &cases).await?;
            println!("Configured {} test case(s).", cases.len());
        }
        Commands::Unconfig { case } => {
            let cases = runner::select_cases(&ctx, case)?;
            runner::unconfigure_cases(&ctx, &cases).await?;
            println!("Unconfigured {} test case(s).", cases.len());
        }
        Commands::Stop => {
            let quiet = runner::stop_all(&ctx).await?;
            println!("No benchmark processes left ({} attempt(s)).", quiet.attempts);
        }
        Commands::Build => {
            for (host, dir) in runner::build_all(&ctx).await? {
                println!("{:<12} {}", host, dir);
            }
        }
        Commands::ClearLogs => {
            runner::clear_all(&ctx).await?;
            println!("Cleared previous artifacts.");
        }
        Commands::Plan => {}
    }

    let warnings = ctx.warnings();
    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "some best-effort commands failed");
    }
    Ok(())
}

fn print_plan(config: &BenchConfig, json: bool) -> Result<()> {
    let trials = matrix::plan(config);
    if json {
        println!("{}", serde_json::to_string_pretty(&trials)?);
        return Ok(());
    }

    println!(
        "{:<22} | {:<6} | {:<5} | {:<5} | Result",
        "Case", "Kind", "Flags", "Accel"
    );
    println!("{:-<22}-|-{:-<6}-|-{:-<5}-|-{:-<5}-|-{:-<30}", "", "", "", "", "");
    for t in &trials {
        println!(
            "{:<22} | {:<6} | {:<5} | {:<5} | {}",
            t.case,
            t.variant.kind,
            t.variant.flags().join(" "),
            if t.accelerated { "yes" } else { "no" },
            t.artifacts.result
        );
    }
    println!("\n{} trial(s)", trials.len());
    Ok(())
}
