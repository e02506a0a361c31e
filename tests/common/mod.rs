//! Common test utilities for integration tests.

use chrono::Utc;
use faultline::config::{ExecutionConfig, ExecutionMode, FaultlineConfig};
use faultline::error::Result;
use faultline::framework::FrameworkAdapter;
use faultline::health::HealthChecker;
use faultline::injector::{FaultInjector, FaultOps, SimFaultOps};
use faultline::orchestrator::Orchestrator;
use faultline::recovery::RecoveryCoordinator;
use faultline::report::TimelineLog;
use faultline::resilience::RetryPolicy;
use faultline::runner::ScenarioRunner;
use faultline::safety::{MetricsSource, SafetySnapshot};
use faultline::scenario::ScenarioCatalog;
use faultline::session::SessionStore;
use faultline::shutdown::ShutdownCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test environment with the directory layout the engine expects.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let state_dir = temp_dir.path().join("state");
        let log_dir = temp_dir.path().join("logs");
        let report_dir = temp_dir.path().join("reports");

        std::fs::create_dir_all(&state_dir).expect("Failed to create state dir");
        std::fs::create_dir_all(&log_dir).expect("Failed to create log dir");
        std::fs::create_dir_all(&report_dir).expect("Failed to create report dir");

        Self {
            temp_dir,
            state_dir,
            log_dir,
            report_dir,
        }
    }

    /// Development config rebased onto this environment, with fast sampling.
    pub fn config(&self) -> FaultlineConfig {
        let mut config = FaultlineConfig::development();
        config.paths.state_dir = self.state_dir.clone();
        config.paths.log_dir = self.log_dir.clone();
        config.paths.report_dir = self.report_dir.clone();
        config.safety.sample_interval = Duration::from_millis(10);
        config.safety.grace_period = Duration::from_millis(50);
        config.execution.revert_base_delay = Duration::from_millis(1);
        config.frameworks.retry_delay = Duration::from_millis(10);
        config
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics source returning a constant CPU reading.
pub struct FlatMetrics {
    pub cpu: f64,
}

#[async_trait::async_trait]
impl MetricsSource for FlatMetrics {
    async fn sample(&self) -> Result<SafetySnapshot> {
        Ok(SafetySnapshot {
            at: Utc::now(),
            cpu_percent: self.cpu,
            memory_percent: 10.0,
            disk_percent: 10.0,
            load_avg: 0.5,
            missing: false,
        })
    }
}

/// A fully wired engine over simulated fault ops.
pub struct Engine {
    pub env: TestEnv,
    pub ops: Arc<SimFaultOps>,
    pub orchestrator: Orchestrator,
    pub store: Arc<SessionStore>,
    pub injector: Arc<FaultInjector>,
    pub shutdown: ShutdownCoordinator,
    pub catalog: ScenarioCatalog,
}

/// Build an engine with the given execution config and flat CPU reading.
pub fn engine(execution: ExecutionConfig, cpu: f64) -> Engine {
    let env = TestEnv::new();
    let mut config = env.config();
    config.execution = execution;

    let ops = Arc::new(SimFaultOps::new());
    let store = Arc::new(SessionStore::open(&config.paths.state_dir).expect("open store"));
    let injector = Arc::new(FaultInjector::new(
        Arc::clone(&ops) as Arc<dyn FaultOps>,
        &config.paths.state_dir,
        RetryPolicy::revert(
            config.execution.revert_retries,
            config.execution.revert_base_delay,
        ),
    ));
    let recovery = Arc::new(RecoveryCoordinator::new(
        Arc::clone(&ops) as Arc<dyn FaultOps>,
        HealthChecker::new(),
        Duration::from_millis(500),
    ));
    let shutdown = ShutdownCoordinator::new();
    let timeline =
        Arc::new(TimelineLog::open(&config.paths.report_dir).expect("open timeline log"));
    let runner = Arc::new(ScenarioRunner::new(
        Arc::clone(&injector),
        Arc::clone(&recovery),
        Arc::clone(&store),
        config.safety.clone(),
        Arc::new(FlatMetrics { cpu }),
        Arc::clone(&timeline),
        shutdown.clone(),
    ));
    let adapter = Arc::new(FrameworkAdapter::new(
        config.frameworks.clone(),
        &config.paths.log_dir,
    ));

    let orchestrator = Orchestrator::new(
        config,
        runner,
        adapter,
        Arc::clone(&injector),
        recovery,
        Arc::clone(&store),
        timeline,
        shutdown.clone(),
    );

    Engine {
        env,
        ops,
        orchestrator,
        store,
        injector,
        shutdown,
        catalog: ScenarioCatalog::builtin().expect("builtin catalog"),
    }
}

/// A builtin service-stop scenario renamed and shortened for fast runs.
pub fn quick_scenario(name: &str, target: &str) -> faultline::orchestrator::Unit {
    let mut scenario = faultline::scenario::builtin::service_stop(target).expect("builtin scenario");
    scenario.name = name.to_string();
    scenario.default_duration = Duration::from_millis(50);
    faultline::orchestrator::Unit::Scenario(scenario)
}

/// Sequential execution with fast timings.
pub fn sequential() -> ExecutionConfig {
    ExecutionConfig {
        mode: ExecutionMode::Sequential,
        jobs: 2,
        continue_on_failure: false,
        unit_timeout: Duration::from_secs(30),
        revert_retries: 3,
        revert_base_delay: Duration::from_millis(1),
    }
}

/// Parallel execution with the given worker slots.
pub fn parallel(jobs: usize) -> ExecutionConfig {
    ExecutionConfig {
        mode: ExecutionMode::Parallel,
        jobs,
        ..sequential()
    }
}
