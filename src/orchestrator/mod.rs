//! Run orchestration.
//!
//! The orchestrator turns an ordered list of units into a finished
//! aggregate report. Scenario units go through the scenario runner,
//! framework units through the framework adapter. Results stream over an
//! mpsc channel into a single aggregator task that owns all counters; the
//! scheduler itself only decides what runs next. A per-target-resource
//! lock table keeps resource-overlapping units from running concurrently
//! in parallel mode, and a `FailedRecovery` outcome halts scheduling in
//! every mode.

use crate::config::{ExecutionMode, FaultlineConfig};
use crate::error::{FaultlineError, Result};
use crate::framework::{FrameworkAdapter, FrameworkSpec};
use crate::injector::FaultInjector;
use crate::recovery::RecoveryCoordinator;
use crate::report::{AggregateReport, ReportBuilder, TimelineLog, UnitReport};
use crate::runner::{RunnerResult, ScenarioRunner};
use crate::scenario::{FaultScenario, ScenarioCatalog};
use crate::session::SessionStore;
use crate::shutdown::ShutdownCoordinator;
use crate::types::{FaultCategory, TargetResource, TimelineEvent, UnitClassification};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

/// One schedulable unit.
#[derive(Debug, Clone)]
pub enum Unit {
    Scenario(FaultScenario),
    Framework(FrameworkSpec),
}

impl Unit {
    pub fn name(&self) -> &str {
        match self {
            Unit::Scenario(s) => &s.name,
            Unit::Framework(f) => &f.name,
        }
    }

    fn category(&self) -> String {
        match self {
            Unit::Scenario(s) => s.category.to_string(),
            Unit::Framework(_) => "framework".to_string(),
        }
    }

    /// Resource this unit needs exclusively, if any.
    fn resource(&self) -> Option<TargetResource> {
        match self {
            Unit::Scenario(s) => Some(s.target.clone()),
            Unit::Framework(_) => None,
        }
    }
}

/// Resolve command-line unit names against the catalog. A name may be a
/// fault category (expanding to every scenario in it), a single scenario,
/// or a known framework.
pub fn resolve_units(names: &[String], catalog: &ScenarioCatalog) -> Result<Vec<Unit>> {
    let mut units = Vec::new();
    for name in names {
        if let Ok(category) = name.parse::<FaultCategory>() {
            for scenario in catalog.by_category(category) {
                units.push(Unit::Scenario(scenario.clone()));
            }
        } else if let Ok(scenario) = catalog.get(name) {
            units.push(Unit::Scenario(scenario.clone()));
        } else if let Ok(spec) = FrameworkSpec::known(name) {
            units.push(Unit::Framework(spec));
        } else {
            return Err(FaultlineError::UnknownUnit(name.clone()));
        }
    }
    Ok(units)
}

/// Drives a full run.
pub struct Orchestrator {
    config: FaultlineConfig,
    runner: Arc<ScenarioRunner>,
    adapter: Arc<FrameworkAdapter>,
    injector: Arc<FaultInjector>,
    recovery: Arc<RecoveryCoordinator>,
    store: Arc<SessionStore>,
    shutdown: ShutdownCoordinator,
    timeline: Arc<TimelineLog>,
    /// Per-resource locks; units touching the same resource serialize.
    locks: Mutex<HashMap<TargetResource, Arc<tokio::sync::Mutex<()>>>>,
    /// Set on `FailedRecovery`; nothing new is scheduled after that.
    halted: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FaultlineConfig,
        runner: Arc<ScenarioRunner>,
        adapter: Arc<FrameworkAdapter>,
        injector: Arc<FaultInjector>,
        recovery: Arc<RecoveryCoordinator>,
        store: Arc<SessionStore>,
        timeline: Arc<TimelineLog>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            config,
            runner,
            adapter,
            injector,
            recovery,
            store,
            shutdown,
            timeline,
            locks: Mutex::new(HashMap::new()),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock_for(&self, resource: &TargetResource) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(resource.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Recover sessions a previous run left behind. Runs before any
    /// scheduling.
    pub async fn startup_recovery(&self) -> Result<usize> {
        let stale = self.store.scan_stale()?;
        if stale.is_empty() {
            return Ok(0);
        }

        warn!(count = stale.len(), "Recovering sessions from a previous run");
        let mut recovered = 0;
        for mut session in stale {
            match self
                .recovery
                .recover_stale_session(&self.store, &self.injector, &mut session)
                .await
            {
                Ok(status) => {
                    self.timeline.record(&TimelineEvent::new(
                        Some(&session.scenario),
                        "crash-recovery",
                        format!("stale session {} -> {}", session.id, status),
                    ))?;
                    recovered += 1;
                }
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "Failed to recover stale session");
                }
            }
        }
        Ok(recovered)
    }

    /// Execute the units and produce the aggregate report. The report is
    /// also written to the report directory, partial or not.
    pub async fn run(&self, units: Vec<Unit>) -> Result<AggregateReport> {
        self.startup_recovery().await?;

        let (results_tx, mut results_rx) = mpsc::channel::<UnitReport>(64);

        // Single owner of all counters.
        let aggregator = tokio::spawn(async move {
            let mut builder = ReportBuilder::new();
            while let Some(report) = results_rx.recv().await {
                builder.add(report);
            }
            builder
        });

        match self.config.execution.mode {
            ExecutionMode::Sequential => self.run_sequential(units, &results_tx).await,
            ExecutionMode::Parallel => self.run_parallel(units, &results_tx).await,
        }

        drop(results_tx);
        let builder = aggregator
            .await
            .map_err(|e| FaultlineError::Internal(format!("Aggregator task panicked: {}", e)))?;

        let report = builder.finish(self.shutdown.is_shutting_down());
        report.write(&self.config.paths.report_dir)?;

        info!(
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            partial = report.partial,
            "Run finished"
        );
        Ok(report)
    }

    async fn run_sequential(&self, units: Vec<Unit>, results_tx: &mpsc::Sender<UnitReport>) {
        let continue_on_failure = self.config.execution.continue_on_failure;

        for unit in units {
            if self.halted.load(Ordering::SeqCst) || self.shutdown.is_shutting_down() {
                let _ = results_tx.send(skipped_report(&unit)).await;
                continue;
            }

            let report = self.execute_unit(&unit).await;
            let result = report.result;
            let _ = results_tx.send(report).await;

            match result {
                UnitClassification::Fatal => {
                    error!(unit = unit.name(), "Fatal recovery failure, halting run");
                    self.halted.store(true, Ordering::SeqCst);
                }
                UnitClassification::Failed if !continue_on_failure => {
                    warn!(unit = unit.name(), "Unit failed, halting sequential run");
                    self.halted.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    async fn run_parallel(&self, units: Vec<Unit>, results_tx: &mpsc::Sender<UnitReport>) {
        let semaphore = Arc::new(Semaphore::new(self.config.execution.jobs));
        let mut handles = Vec::new();

        for unit in units {
            if self.halted.load(Ordering::SeqCst) || self.shutdown.is_shutting_down() {
                let _ = results_tx.send(skipped_report(&unit)).await;
                continue;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            // Re-check after possibly waiting on a slot.
            if self.halted.load(Ordering::SeqCst) || self.shutdown.is_shutting_down() {
                let _ = results_tx.send(skipped_report(&unit)).await;
                continue;
            }

            let resource_lock = unit.resource().map(|r| self.lock_for(&r));
            let results_tx = results_tx.clone();
            let halted = Arc::clone(&self.halted);
            let this = self.clone_refs();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let _guard = match &resource_lock {
                    Some(lock) => Some(lock.lock().await),
                    None => None,
                };

                let report = this.execute_unit(&unit).await;
                if report.result == UnitClassification::Fatal {
                    error!(unit = unit.name(), "Fatal recovery failure, halting run");
                    halted.store(true, Ordering::SeqCst);
                }
                let _ = results_tx.send(report).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Unit task panicked");
            }
        }
    }

    /// Cheap handle for spawned unit tasks.
    fn clone_refs(&self) -> UnitExecutor {
        UnitExecutor {
            runner: Arc::clone(&self.runner),
            adapter: Arc::clone(&self.adapter),
            shutdown: self.shutdown.clone(),
            timeline: Arc::clone(&self.timeline),
            log_dir: self.config.paths.log_dir.clone(),
            unit_timeout: self.config.execution.unit_timeout,
        }
    }

    async fn execute_unit(&self, unit: &Unit) -> UnitReport {
        self.clone_refs().execute_unit(unit).await
    }
}

/// The per-unit execution context shared with spawned tasks.
struct UnitExecutor {
    runner: Arc<ScenarioRunner>,
    adapter: Arc<FrameworkAdapter>,
    shutdown: ShutdownCoordinator,
    timeline: Arc<TimelineLog>,
    log_dir: PathBuf,
    unit_timeout: std::time::Duration,
}

impl UnitExecutor {
    async fn execute_unit(&self, unit: &Unit) -> UnitReport {
        let started = Instant::now();
        let _ = self.timeline.record(&TimelineEvent::new(
            Some(unit.name()),
            "start",
            format!("{} unit started", unit.category()),
        ));

        let report = match unit {
            Unit::Scenario(scenario) => {
                // The planned duration is capped by the unit timeout.
                let duration = scenario.default_duration.min(self.unit_timeout);
                match self.runner.run(scenario, Some(duration), None).await {
                    Ok(result) => {
                        let log_path = self.write_scenario_log(&result);
                        UnitReport {
                            name: result.scenario,
                            category: result.category.to_string(),
                            result: result.classification,
                            duration_sec: result.elapsed.as_secs_f64(),
                            retries: 0,
                            log_path,
                        }
                    }
                    Err(e) => {
                        error!(unit = unit.name(), error = %e, "Scenario unit errored");
                        UnitReport {
                            name: unit.name().to_string(),
                            category: unit.category(),
                            result: UnitClassification::Failed,
                            duration_sec: started.elapsed().as_secs_f64(),
                            retries: 0,
                            log_path: None,
                        }
                    }
                }
            }
            Unit::Framework(spec) => match self.adapter.run(spec, &self.shutdown).await {
                Ok(outcome) => {
                    let retries = outcome.retries();
                    UnitReport {
                        name: outcome.name,
                        category: "framework".to_string(),
                        result: outcome.classification,
                        duration_sec: started.elapsed().as_secs_f64(),
                        retries,
                        log_path: Some(outcome.log_path),
                    }
                }
                Err(FaultlineError::Cancelled) => skipped_report(unit),
                Err(e) => {
                    error!(unit = unit.name(), error = %e, "Framework unit errored");
                    UnitReport {
                        name: unit.name().to_string(),
                        category: unit.category(),
                        result: UnitClassification::Failed,
                        duration_sec: started.elapsed().as_secs_f64(),
                        retries: 0,
                        log_path: None,
                    }
                }
            },
        };

        let _ = self.timeline.record(&TimelineEvent::new(
            Some(unit.name()),
            "finish",
            format!("result: {}", report.result),
        ));
        report
    }

    /// One log file per scenario execution, carrying the monitoring and
    /// recovery detail that has no room in the aggregate report. Failures
    /// here cost the report its log link, nothing more.
    fn write_scenario_log(&self, result: &RunnerResult) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
            warn!(error = %e, "Could not create log directory");
            return None;
        }
        let path = self
            .log_dir
            .join(format!("{}-{}.log", result.scenario, result.session_id));

        let mut out = String::new();
        out.push_str(&format!(
            "=== {} session {} ===\n",
            result.scenario, result.session_id
        ));
        out.push_str(&format!("status: {}\n", result.status));
        out.push_str(&format!("result: {}\n", result.classification));
        out.push_str(&format!("elapsed: {:.1}s\n", result.elapsed.as_secs_f64()));
        if let Some(reason) = &result.abort_reason {
            out.push_str(&format!("abort reason: {}\n", reason));
        }
        if let Some(detail) = &result.detail {
            out.push_str(&format!("detail: {}\n", detail));
        }
        let peak = result
            .snapshots
            .iter()
            .map(|s| s.peak_percent())
            .fold(0.0_f64, f64::max);
        out.push_str(&format!(
            "snapshots: {} (peak {:.1}%)\n",
            result.snapshots.len(),
            peak
        ));
        if let Some(recovery) = &result.recovery {
            out.push_str(&format!("recovery actions: {}\n", recovery.actions.len()));
            for issue in &recovery.residual_issues {
                out.push_str(&format!("residual: {}\n", issue));
            }
            out.push_str(&format!(
                "health: {}\n",
                if recovery.health.passed() { "passed" } else { "failed" }
            ));
        }

        match std::fs::write(&path, out) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not write scenario log");
                None
            }
        }
    }
}

fn skipped_report(unit: &Unit) -> UnitReport {
    UnitReport {
        name: unit.name().to_string(),
        category: unit.category(),
        result: UnitClassification::Skipped,
        duration_sec: 0.0,
        retries: 0,
        log_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::error::Result as FResult;
    use crate::health::HealthChecker;
    use crate::injector::{FaultOps, SimFaultOps};
    use crate::resilience::RetryPolicy;
    use crate::safety::{MetricsSource, SafetySnapshot};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FlatMetrics;

    #[async_trait::async_trait]
    impl MetricsSource for FlatMetrics {
        async fn sample(&self) -> FResult<SafetySnapshot> {
            Ok(SafetySnapshot {
                at: Utc::now(),
                cpu_percent: 10.0,
                memory_percent: 10.0,
                disk_percent: 10.0,
                load_avg: 0.5,
                missing: false,
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        ops: Arc<SimFaultOps>,
        orchestrator: Orchestrator,
        catalog: ScenarioCatalog,
        shutdown: ShutdownCoordinator,
    }

    fn fixture(execution: ExecutionConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = FaultlineConfig::development();
        config.execution = execution;
        config.paths.state_dir = dir.path().join("state");
        config.paths.log_dir = dir.path().join("logs");
        config.paths.report_dir = dir.path().join("reports");
        config.safety.sample_interval = Duration::from_millis(10);

        let ops = Arc::new(SimFaultOps::new());
        let store = Arc::new(SessionStore::open(&config.paths.state_dir).unwrap());
        let injector = Arc::new(FaultInjector::new(
            Arc::clone(&ops) as Arc<dyn FaultOps>,
            &config.paths.state_dir,
            RetryPolicy::revert(2, Duration::from_millis(1)),
        ));
        let recovery = Arc::new(RecoveryCoordinator::new(
            Arc::clone(&ops) as Arc<dyn FaultOps>,
            HealthChecker::new(),
            Duration::from_millis(200),
        ));
        let shutdown = ShutdownCoordinator::new();
        let timeline = Arc::new(TimelineLog::open(&config.paths.report_dir).unwrap());
        let runner = Arc::new(ScenarioRunner::new(
            Arc::clone(&injector),
            Arc::clone(&recovery),
            Arc::clone(&store),
            config.safety.clone(),
            Arc::new(FlatMetrics),
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
            injector,
            recovery,
            store,
            timeline,
            shutdown.clone(),
        );

        Fixture {
            _dir: dir,
            ops,
            orchestrator,
            catalog: ScenarioCatalog::builtin().unwrap(),
            shutdown,
        }
    }

    fn quick_scenario(name: &str, target: &str) -> Unit {
        let mut scenario = crate::scenario::builtin::service_stop(target).unwrap();
        scenario.name = name.to_string();
        scenario.default_duration = Duration::from_millis(50);
        Unit::Scenario(scenario)
    }

    fn sequential() -> ExecutionConfig {
        ExecutionConfig {
            mode: ExecutionMode::Sequential,
            jobs: 2,
            continue_on_failure: false,
            unit_timeout: Duration::from_secs(30),
            revert_retries: 2,
            revert_base_delay: Duration::from_millis(1),
        }
    }

    fn parallel(jobs: usize) -> ExecutionConfig {
        ExecutionConfig {
            mode: ExecutionMode::Parallel,
            jobs,
            ..sequential()
        }
    }

    #[test]
    fn test_resolve_category_scenario_and_framework() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let units = resolve_units(
            &[
                "service".to_string(),
                "cpu_bomb".to_string(),
                "comprehensive".to_string(),
            ],
            &catalog,
        )
        .unwrap();
        // service expands to 2 scenarios.
        assert_eq!(units.len(), 4);
        assert!(matches!(units[3], Unit::Framework(_)));

        assert!(matches!(
            resolve_units(&["bogus".to_string()], &catalog),
            Err(FaultlineError::UnknownUnit(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_run_all_pass() {
        let f = fixture(sequential());
        let units = vec![
            quick_scenario("one", "svc-a"),
            quick_scenario("two", "svc-b"),
        ];

        let report = f.orchestrator.run(units).await.unwrap();
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.passed, 2);
        assert!(!report.partial);
        assert_eq!(report.worst(), UnitClassification::Passed);
    }

    #[tokio::test]
    async fn test_sequential_halts_after_failure() {
        let f = fixture(sequential());
        // Failing the stop op makes injection fail, classifying the unit
        // Failed and halting the sequential run.
        f.ops.fail_op("systemctl-stop");

        let units = vec![
            quick_scenario("one", "svc-a"),
            quick_scenario("two", "svc-b"),
        ];
        let report = f.orchestrator.run(units).await.unwrap();

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_sequential_continue_on_failure() {
        let mut exec = sequential();
        exec.continue_on_failure = true;
        let f = fixture(exec);
        f.ops.fail_op("systemctl-stop");

        let units = vec![
            quick_scenario("one", "svc-a"),
            quick_scenario("two", "svc-b"),
        ];
        let report = f.orchestrator.run(units).await.unwrap();

        // Both ran; both failed the same way, none skipped.
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_scenario_units_get_log_files() {
        let f = fixture(sequential());
        let report = f
            .orchestrator
            .run(vec![quick_scenario("one", "svc-a")])
            .await
            .unwrap();

        let log_path = report.units[0]
            .log_path
            .clone()
            .expect("scenario unit should link a log file");
        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.contains("status: completed"));
        assert!(log.contains("snapshots:"));
        assert!(log.contains("health: passed"));
    }

    #[tokio::test]
    async fn test_parallel_run_completes_all() {
        let f = fixture(parallel(2));
        let units = vec![
            quick_scenario("one", "svc-a"),
            quick_scenario("two", "svc-b"),
            quick_scenario("three", "svc-c"),
        ];

        let report = f.orchestrator.run(units).await.unwrap();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 3);
    }

    #[tokio::test]
    async fn test_parallel_same_resource_serializes() {
        let f = fixture(parallel(2));
        // Two units on the same target: the lock table must serialize them,
        // so total wall time is at least two planned durations.
        let units = vec![
            quick_scenario("one", "svc-shared"),
            quick_scenario("two", "svc-shared"),
        ];

        let started = Instant::now();
        let report = f.orchestrator.run(units).await.unwrap();
        assert_eq!(report.summary.passed, 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cancellation_writes_partial_report() {
        let f = fixture(sequential());
        let mut long = crate::scenario::builtin::service_stop("svc-a").unwrap();
        long.default_duration = Duration::from_secs(60);

        let canceller = f.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.shutdown();
        });

        let units = vec![Unit::Scenario(long), quick_scenario("two", "svc-b")];
        let report = f.orchestrator.run(units).await.unwrap();

        assert!(report.partial);
        assert_eq!(report.summary.total, 2);
        // Everything still reached a terminal state and reverted.
        assert!(f.ops.executed().contains(&"systemctl-start".to_string()));
    }

    #[tokio::test]
    async fn test_startup_recovery_clears_stale_sessions() {
        let f = fixture(sequential());
        let store = Arc::clone(&f.orchestrator.store);

        // Fabricate a crashed run: active session + unreverted handle.
        let scenario = f.catalog.get("service_stop").unwrap().clone();
        let mut session = crate::session::InjectionSession::new(
            &scenario.name,
            scenario.target.clone(),
            Duration::from_secs(30),
        );
        store.persist(&session).unwrap();
        f.orchestrator
            .injector
            .apply(&scenario, &session.id, crate::types::Intensity::Medium)
            .await
            .unwrap();
        session.status = crate::types::SessionStatus::Active;
        store.persist(&session).unwrap();

        let recovered = f.orchestrator.startup_recovery().await.unwrap();
        assert_eq!(recovered, 1);
        assert!(store.scan_stale().unwrap().is_empty());
        // The stale fault was reverted.
        assert!(f.ops.executed().contains(&"systemctl-start".to_string()));
    }
}
