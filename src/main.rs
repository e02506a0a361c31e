//! faultline CLI - Main entry point.

use faultline::cli::{Cli, Commands, RunMode};
use faultline::config::{ExecutionMode, FaultlineConfig};
use faultline::scenario::ScenarioCatalog;
use faultline::types::UnitClassification;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let mut config = match &cli.config {
        Some(path) => FaultlineConfig::from_file(path)?,
        None => FaultlineConfig::default(),
    };
    config.observability.log_level = cli.log_level.clone();
    if let Some(output_dir) = &cli.output_dir {
        config.paths.report_dir = output_dir.clone();
        config.paths.log_dir = output_dir.join("logs");
    }
    if let Some(state_dir) = &cli.state_dir {
        config.paths.state_dir = state_dir.clone();
    }

    match cli.command {
        Commands::Run {
            mode,
            jobs,
            continue_on_failure,
            timeout,
            retry,
            units,
        } => {
            config.execution.mode = match mode {
                RunMode::Sequential => ExecutionMode::Sequential,
                RunMode::Parallel => ExecutionMode::Parallel,
            };
            if let Some(jobs) = jobs {
                config.execution.jobs = jobs;
            }
            if continue_on_failure {
                config.execution.continue_on_failure = true;
            }
            if let Some(seconds) = timeout {
                config.execution.unit_timeout = Duration::from_secs(seconds);
                config.frameworks.timeout = Duration::from_secs(seconds);
            }
            if let Some(retry) = retry {
                config.frameworks.retries = retry;
            }

            faultline::observability::init(&config.observability)?;

            let report = faultline::run(config, &units).await?;
            print!("{}", report.render_text());

            std::process::exit(exit_code(report.worst()));
        }

        Commands::Scenarios => {
            let catalog = ScenarioCatalog::builtin()?;
            println!("{:<24} {:<9} {:>9}  description", "name", "category", "duration");
            for scenario in catalog.list() {
                println!(
                    "{:<24} {:<9} {:>8}s  {}",
                    scenario.name,
                    scenario.category.to_string(),
                    scenario.default_duration.as_secs(),
                    scenario.description,
                );
            }
        }

        Commands::Recover => {
            faultline::observability::init(&config.observability)?;
            let recovered = faultline::recover(config).await?;
            println!("Recovered {} stale session(s)", recovered);
        }

        Commands::Version => {
            println!("faultline v{}", env!("CARGO_PKG_VERSION"));
            println!("Fault-injection and recovery orchestration for live hosts");
        }
    }

    Ok(())
}

/// Map the worst unit classification to the process exit code.
fn exit_code(worst: UnitClassification) -> i32 {
    match worst {
        UnitClassification::Passed | UnitClassification::Skipped => 0,
        UnitClassification::Warning => 1,
        UnitClassification::Failed => 2,
        UnitClassification::Fatal => 3,
    }
}
