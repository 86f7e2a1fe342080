use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use bess_scheduler::config::AppConfig;
use bess_scheduler::domain::OptimizationRequest;
use bess_scheduler::mpc::MpcParams;
use bess_scheduler::service::OptimizerService;
use bess_scheduler::telemetry::init_tracing;

/// BESS multi-market scheduler: reads an optimization request as JSON,
/// solves it, and writes the schedule plus financial summary as JSON.
#[derive(Parser)]
#[command(name = "bess-scheduler", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/default.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve the full horizon in one shot.
    Optimize {
        /// Request JSON file.
        input: PathBuf,
        /// Result JSON file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Solve with the rolling-horizon (MPC) driver.
    Mpc {
        /// Request JSON file.
        input: PathBuf,
        /// Result JSON file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Optimization window per iteration (hours).
        #[arg(long)]
        horizon_hours: Option<u32>,
        /// Committed window per iteration (hours).
        #[arg(long)]
        execution_hours: Option<u32>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::load_from(
        cli.config
            .to_str()
            .context("config path is not valid UTF-8")?,
    )?;
    let service = OptimizerService::new(config);

    match cli.command {
        Command::Optimize { input, output } => {
            let request = read_request(&input)?;
            let result = service.optimize(&request)?;
            info!(
                status = %result.status,
                objective = result.objective_value,
                solver = %result.solver_name,
                "optimization finished"
            );
            write_result(&result, output.as_deref())
        }
        Command::Mpc {
            input,
            output,
            horizon_hours,
            execution_hours,
        } => {
            let request = read_request(&input)?;
            let mut params = MpcParams::from(&service.config().mpc);
            if let Some(hours) = horizon_hours {
                params.horizon_hours = hours;
            }
            if let Some(hours) = execution_hours {
                params.execution_hours = hours;
            }
            let result = service.optimize_mpc(&request, params)?;
            info!(
                status = %result.status,
                objective = result.objective_value,
                "rolling-horizon optimization finished"
            );
            write_result(&result, output.as_deref())
        }
    }
}

fn read_request(path: &std::path::Path) -> Result<OptimizationRequest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse request JSON in {}", path.display()))
}

fn write_result(
    result: &bess_scheduler::domain::OptimizationResult,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write result to {}", path.display()))?;
            info!(path = %path.display(), "result written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
