//! End-to-end orchestration tests over simulated fault ops.
//!
//! These wire the full engine together the way `faultline::run` does, with
//! `SimFaultOps` standing in for the real command layer and `sh` one-liners
//! standing in for real test frameworks.

mod common;

use common::{engine, parallel, quick_scenario, sequential};
use faultline::framework::FrameworkSpec;
use faultline::orchestrator::Unit;
use faultline::types::UnitClassification;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_mixed_units_full_run() {
    let e = engine(sequential(), 10.0);
    let units = vec![
        quick_scenario("stop-alpha", "svc-alpha"),
        quick_scenario("stop-beta", "svc-beta"),
        Unit::Framework(FrameworkSpec::new("smoke", "sh", &["-c", "exit 0"])),
    ];

    let report = e.orchestrator.run(units).await.unwrap();

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.passed, 3);
    assert_eq!(report.summary.failed, 0);
    assert!(!report.partial);
    assert_eq!(report.worst(), UnitClassification::Passed);

    // Every fault was both applied and reverted.
    let executed = e.ops.executed();
    assert_eq!(
        executed.iter().filter(|op| *op == "systemctl-stop").count(),
        executed.iter().filter(|op| *op == "systemctl-start").count()
    );

    // No session left behind for the next startup scan.
    assert!(e.store.scan_stale().unwrap().is_empty());
}

#[tokio::test]
async fn test_report_files_written() {
    let e = engine(sequential(), 10.0);
    let units = vec![quick_scenario("stop-alpha", "svc-alpha")];

    e.orchestrator.run(units).await.unwrap();

    let json_path = e.env.report_dir.join("report.json");
    let text_path = e.env.report_dir.join("report.txt");
    let timeline_path = e.env.report_dir.join("timeline.log");
    assert!(json_path.exists());
    assert!(text_path.exists());
    assert!(timeline_path.exists());

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed["summary"]["total"], 1);
    assert_eq!(parsed["summary"]["passed"], 1);
    let unit = &parsed["units"][0];
    assert_eq!(unit["name"], "stop-alpha");
    assert!(unit["durationSec"].is_number());
    assert!(unit.get("retries").is_some());

    // Scenario units link their per-session log file.
    let log_path = unit["logPath"].as_str().expect("scenario log path");
    let scenario_log = std::fs::read_to_string(log_path).unwrap();
    assert!(scenario_log.contains("status: completed"));

    // The timeline records the unit lifecycle including the fault window.
    let timeline = std::fs::read_to_string(&timeline_path).unwrap();
    assert!(timeline.contains("start"));
    assert!(timeline.contains("\"apply\""));
    assert!(timeline.contains("\"revert\""));
    assert!(timeline.contains("finish"));
}

#[tokio::test]
async fn test_failing_framework_exhausts_retry_budget() {
    let e = engine(sequential(), 10.0);
    let units = vec![Unit::Framework(FrameworkSpec::new(
        "always-fails",
        "sh",
        &["-c", "exit 2"],
    ))];

    let report = e.orchestrator.run(units).await.unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.worst(), UnitClassification::Failed);
    // Development config allows 2 retries, so 3 attempts total.
    assert_eq!(report.units[0].retries, 2);
    assert!(report.units[0].log_path.is_some());
}

#[tokio::test]
async fn test_warning_exit_code_does_not_retry() {
    let e = engine(sequential(), 10.0);
    let units = vec![
        quick_scenario("stop-alpha", "svc-alpha"),
        Unit::Framework(FrameworkSpec::new("degraded", "sh", &["-c", "exit 1"])),
    ];

    let report = e.orchestrator.run(units).await.unwrap();

    assert_eq!(report.summary.warning, 1);
    assert_eq!(report.worst(), UnitClassification::Warning);
    assert_eq!(report.units[1].retries, 0);
    assert!((report.success_rate() - 50.0).abs() < 0.01);
}

#[tokio::test]
async fn test_parallel_shared_target_serializes() {
    let e = engine(parallel(4), 10.0);
    // Three units on one target must run one at a time regardless of the
    // worker slots, so wall time is at least three planned durations.
    let units = vec![
        quick_scenario("one", "svc-shared"),
        quick_scenario("two", "svc-shared"),
        quick_scenario("three", "svc-shared"),
    ];

    let started = Instant::now();
    let report = e.orchestrator.run(units).await.unwrap();

    assert_eq!(report.summary.passed, 3);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_hard_threshold_abort_classifies_warning() {
    // CPU pinned above the hard threshold: the safety monitor aborts the
    // scenario long before its planned duration.
    let e = engine(sequential(), 99.0);
    let mut scenario = faultline::scenario::builtin::service_stop("svc-hot").unwrap();
    scenario.default_duration = Duration::from_secs(60);

    let started = Instant::now();
    let report = e.orchestrator.run(vec![Unit::Scenario(scenario)]).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.summary.warning, 1);
    assert_eq!(report.worst(), UnitClassification::Warning);
    // The fault was still reverted on the abort path.
    assert!(e.ops.executed().contains(&"systemctl-start".to_string()));
    assert!(e.store.scan_stale().unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupt_mid_run_writes_partial_report() {
    let e = engine(sequential(), 10.0);
    let mut long = faultline::scenario::builtin::service_stop("svc-long").unwrap();
    long.default_duration = Duration::from_secs(60);

    let canceller = e.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.shutdown();
    });

    let units = vec![
        Unit::Scenario(long),
        quick_scenario("never-runs", "svc-beta"),
    ];
    let report = e.orchestrator.run(units).await.unwrap();

    assert!(report.partial);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.skipped, 2);
    // The interrupted scenario still reverted and reached a terminal state.
    assert!(e.ops.executed().contains(&"systemctl-start".to_string()));
    assert!(e.store.scan_stale().unwrap().is_empty());
}

#[tokio::test]
async fn test_precondition_failure_skips_without_mutation() {
    let e = engine(sequential(), 10.0);
    e.ops.fail_precondition("svc-alpha");

    let report = e
        .orchestrator
        .run(vec![quick_scenario("stop-alpha", "svc-alpha")])
        .await
        .unwrap();

    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.worst(), UnitClassification::Skipped);
    assert!(e.ops.executed().is_empty());
}
