//! faultline - fault-injection and recovery orchestration for live hosts.
//!
//! faultline applies controlled network, service, and system-resource
//! failures to a host, guards each injection with a safety monitor, and
//! guarantees recovery even across crashes and interrupts. Independent test
//! frameworks run beside the scenarios with retry and aggregation.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        faultline                           │
//! ├────────────────────────────────────────────────────────────┤
//! │  Orchestrator: scheduling | resource locks | aggregation   │
//! ├────────────────────────────────────────────────────────────┤
//! │  Scenario Runner: inject | monitor | single-shot teardown  │
//! ├────────────────────────────────────────────────────────────┤
//! │  Injector | Safety Monitor | Recovery | Framework Adapter  │
//! ├────────────────────────────────────────────────────────────┤
//! │  Sessions & Handles: persisted state, crash recovery       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use faultline::config::FaultlineConfig;
//!
//! #[tokio::main]
//! async fn main() -> faultline::Result<()> {
//!     let config = FaultlineConfig::development();
//!     let report = faultline::run(config, &["service".to_string()]).await?;
//!     println!("{}", report.render_text());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod framework;
pub mod health;
pub mod injector;
pub mod orchestrator;
pub mod probe;
pub mod recovery;
pub mod report;
pub mod resilience;
pub mod runner;
pub mod safety;
pub mod scenario;
pub mod session;
pub mod shutdown;

pub mod cli;
pub mod observability;

// Re-exports
pub use error::{FaultlineError, Result};
pub use types::*;

use config::FaultlineConfig;
use framework::FrameworkAdapter;
use health::HealthChecker;
use injector::{CommandFaultOps, FaultInjector, FaultOps};
use orchestrator::Orchestrator;
use recovery::RecoveryCoordinator;
use report::{AggregateReport, TimelineLog};
use resilience::RetryPolicy;
use runner::ScenarioRunner;
use safety::SysinfoMetrics;
use scenario::ScenarioCatalog;
use session::SessionStore;
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default per-recovery-action timeout.
const RECOVERY_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

fn build_orchestrator(
    config: FaultlineConfig,
    shutdown: ShutdownCoordinator,
) -> Result<Orchestrator> {
    let ops: Arc<dyn FaultOps> = Arc::new(CommandFaultOps::new());
    let store = Arc::new(SessionStore::open(&config.paths.state_dir)?);
    let injector = Arc::new(FaultInjector::new(
        Arc::clone(&ops),
        &config.paths.state_dir,
        RetryPolicy::revert(
            config.execution.revert_retries,
            config.execution.revert_base_delay,
        ),
    ));
    let recovery = Arc::new(RecoveryCoordinator::new(
        Arc::clone(&ops),
        HealthChecker::new(),
        RECOVERY_ACTION_TIMEOUT,
    ));
    let timeline = Arc::new(TimelineLog::open(&config.paths.report_dir)?);
    let runner = Arc::new(ScenarioRunner::new(
        Arc::clone(&injector),
        Arc::clone(&recovery),
        Arc::clone(&store),
        config.safety.clone(),
        Arc::new(SysinfoMetrics::new()),
        Arc::clone(&timeline),
        shutdown.clone(),
    ));
    let adapter = Arc::new(FrameworkAdapter::new(
        config.frameworks.clone(),
        &config.paths.log_dir,
    ));

    Ok(Orchestrator::new(
        config, runner, adapter, injector, recovery, store, timeline, shutdown,
    ))
}

/// Run the given units with the given configuration and return the
/// aggregate report. Installs signal handlers so SIGINT/SIGTERM tear down
/// in-flight units and still produce a partial report.
pub async fn run(config: FaultlineConfig, unit_names: &[String]) -> Result<AggregateReport> {
    config.validate()?;
    info!(units = unit_names.len(), "Starting faultline run");

    let catalog = ScenarioCatalog::builtin()?;
    let units = orchestrator::resolve_units(unit_names, &catalog)?;

    let shutdown = ShutdownCoordinator::new();
    let signal_coordinator = shutdown.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    let orchestrator = build_orchestrator(config, shutdown)?;
    orchestrator.run(units).await
}

/// Run only the crash-recovery scan. Returns the number of stale sessions
/// driven to a terminal status.
pub async fn recover(config: FaultlineConfig) -> Result<usize> {
    config.validate()?;
    let orchestrator = build_orchestrator(config, ShutdownCoordinator::new())?;
    orchestrator.startup_recovery().await
}
