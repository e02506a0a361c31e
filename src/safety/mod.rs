//! Safety monitor guarding active fault injections.
//!
//! While a fault is live, the monitor samples host metrics at a fixed
//! interval and runs a small state machine:
//!
//! ```text
//! Watching -> Warning -> AbortTriggered -> Stopped
//! ```
//!
//! Crossing the soft threshold moves it to Warning; crossing the hard
//! threshold, or staying in Warning past the grace period, triggers an
//! abort. The abort is delivered over a `watch` channel that the scenario
//! runner selects on. Sampling keeps going best-effort through teardown so
//! the final report covers the recovery window too.

use crate::config::SafetyConfig;
use crate::error::{FaultlineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, warn};

/// One sample of host resource usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetySnapshot {
    /// Sample time.
    pub at: DateTime<Utc>,
    /// CPU usage percent across all cores.
    pub cpu_percent: f64,
    /// Memory usage percent.
    pub memory_percent: f64,
    /// Usage percent of the fullest disk.
    pub disk_percent: f64,
    /// One-minute load average.
    pub load_avg: f64,
    /// True when the sample failed and the values are placeholders.
    pub missing: bool,
}

impl SafetySnapshot {
    /// Placeholder recorded when sampling fails; keeps the timeline dense
    /// so snapshot-gap accounting stays honest.
    pub fn missing() -> Self {
        Self {
            at: Utc::now(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            load_avg: 0.0,
            missing: true,
        }
    }

    /// Worst of the percent readings, used against the thresholds.
    pub fn peak_percent(&self) -> f64 {
        self.cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent)
    }
}

/// Source of host metrics. Mocked in tests.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<SafetySnapshot>;
}

/// Live metrics via `sysinfo`.
pub struct SysinfoMetrics {
    system: Mutex<sysinfo::System>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        // Prime the CPU counters; usage needs two refreshes to be meaningful.
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetricsSource for SysinfoMetrics {
    async fn sample(&self) -> Result<SafetySnapshot> {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();

            let cpu = system.global_cpu_info().cpu_usage() as f64;
            let total = system.total_memory();
            let mem = if total == 0 {
                return Err(FaultlineError::Internal(
                    "Metrics source reported zero total memory".into(),
                ));
            } else {
                (system.used_memory() as f64 / total as f64) * 100.0
            };
            (cpu, mem)
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let disk_percent = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                (used as f64 / d.total_space() as f64) * 100.0
            })
            .fold(0.0_f64, f64::max);

        Ok(SafetySnapshot {
            at: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_percent,
            load_avg: sysinfo::System::load_average().one,
            missing: false,
        })
    }
}

/// State of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Sampling, everything under the soft threshold.
    Watching,
    /// Soft threshold crossed; grace period running.
    Warning,
    /// Abort fired; still sampling until told to stop.
    AbortTriggered,
    /// Teardown finished, monitor done.
    Stopped,
}

/// Safety monitor for one injection session.
pub struct SafetyMonitor {
    config: SafetyConfig,
    source: Arc<dyn MetricsSource>,
    state: Mutex<MonitorState>,
    abort_tx: watch::Sender<Option<String>>,
    stop_tx: watch::Sender<bool>,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig, source: Arc<dyn MetricsSource>) -> Self {
        let (abort_tx, _) = watch::channel(None);
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            source,
            state: Mutex::new(MonitorState::Watching),
            abort_tx,
            stop_tx,
        }
    }

    /// Receiver that becomes `Some(reason)` when an abort fires.
    pub fn abort_signal(&self) -> watch::Receiver<Option<String>> {
        self.abort_tx.subscribe()
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Tell the monitor that teardown finished; `run` returns after the
    /// current tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn trigger_abort(&self, reason: String) {
        let mut state = self.state.lock();
        if *state == MonitorState::AbortTriggered {
            return;
        }
        warn!(reason = %reason, "Safety abort triggered");
        *state = MonitorState::AbortTriggered;
        let _ = self.abort_tx.send(Some(reason));
    }

    fn evaluate(&self, snapshot: &SafetySnapshot, warning_since: &mut Option<Instant>) {
        if snapshot.missing {
            return;
        }

        let peak = snapshot.peak_percent();

        if peak >= self.config.hard_threshold_percent {
            self.trigger_abort(format!(
                "Resource usage {:.1}% crossed hard threshold {:.1}%",
                peak, self.config.hard_threshold_percent
            ));
            return;
        }

        if peak >= self.config.soft_threshold_percent {
            let since = warning_since.get_or_insert_with(|| {
                debug!(
                    peak = peak,
                    soft = self.config.soft_threshold_percent,
                    "Soft threshold crossed, grace period started"
                );
                let mut state = self.state.lock();
                if *state == MonitorState::Watching {
                    *state = MonitorState::Warning;
                }
                Instant::now()
            });
            if since.elapsed() >= self.config.grace_period {
                self.trigger_abort(format!(
                    "Resource usage {:.1}% stayed over soft threshold {:.1}% past the grace period",
                    peak, self.config.soft_threshold_percent
                ));
            }
        } else if warning_since.take().is_some() {
            let mut state = self.state.lock();
            if *state == MonitorState::Warning {
                *state = MonitorState::Watching;
            }
        }
    }

    /// Sample until stopped. Returns every snapshot collected, missing
    /// markers included.
    pub async fn run(&self) -> Vec<SafetySnapshot> {
        let mut snapshots = Vec::new();
        let mut warning_since: Option<Instant> = None;
        let mut stop_rx = self.stop_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.sample_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // A stop sent before this task subscribed is only visible in the
            // current value, never through `changed`.
            if *stop_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = match self.source.sample().await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "Metrics sample failed, recording missing marker");
                            SafetySnapshot::missing()
                        }
                    };
                    self.evaluate(&snapshot, &mut warning_since);
                    snapshots.push(snapshot);
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        *self.state.lock() = MonitorState::Stopped;
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays a fixed sequence of readings, then repeats the last one.
    struct ScriptedMetrics {
        readings: Vec<Result<f64>>,
        cursor: AtomicUsize,
    }

    impl ScriptedMetrics {
        fn new(readings: Vec<Result<f64>>) -> Self {
            Self {
                readings,
                cursor: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl MetricsSource for ScriptedMetrics {
        async fn sample(&self) -> Result<SafetySnapshot> {
            let i = self
                .cursor
                .fetch_add(1, Ordering::Relaxed)
                .min(self.readings.len() - 1);
            match &self.readings[i] {
                Ok(cpu) => Ok(SafetySnapshot {
                    at: Utc::now(),
                    cpu_percent: *cpu,
                    memory_percent: 10.0,
                    disk_percent: 10.0,
                    load_avg: 0.5,
                    missing: false,
                }),
                Err(_) => Err(FaultlineError::Internal("sample failed".into())),
            }
        }
    }

    fn config(grace: Duration) -> SafetyConfig {
        SafetyConfig {
            soft_threshold_percent: 80.0,
            hard_threshold_percent: 95.0,
            sample_interval: Duration::from_millis(10),
            grace_period: grace,
        }
    }

    async fn run_monitor(monitor: Arc<SafetyMonitor>, ticks: u64) -> Vec<SafetySnapshot> {
        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(10 * ticks)).await;
        monitor.stop();
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn test_stays_watching_under_soft() {
        let source = Arc::new(ScriptedMetrics::new(vec![Ok(20.0)]));
        let monitor = Arc::new(SafetyMonitor::new(config(Duration::from_secs(10)), source));
        let mut abort_rx = monitor.abort_signal();

        run_monitor(Arc::clone(&monitor), 5).await;

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(abort_rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_hard_threshold_aborts_immediately() {
        let source = Arc::new(ScriptedMetrics::new(vec![Ok(20.0), Ok(97.0)]));
        let monitor = Arc::new(SafetyMonitor::new(config(Duration::from_secs(60)), source));
        let mut abort_rx = monitor.abort_signal();

        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::timeout(Duration::from_secs(2), abort_rx.changed())
            .await
            .expect("abort should fire")
            .unwrap();
        assert!(abort_rx.borrow().as_deref().unwrap().contains("hard threshold"));
        assert_eq!(monitor.state(), MonitorState::AbortTriggered);

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sustained_warning_aborts_after_grace() {
        let source = Arc::new(ScriptedMetrics::new(vec![Ok(85.0)]));
        let monitor = Arc::new(SafetyMonitor::new(
            config(Duration::from_millis(30)),
            source,
        ));
        let mut abort_rx = monitor.abort_signal();

        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::timeout(Duration::from_secs(2), abort_rx.changed())
            .await
            .expect("abort should fire after grace period")
            .unwrap();
        assert!(abort_rx.borrow().as_deref().unwrap().contains("grace period"));

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_recovering_before_grace_clears_warning() {
        let source = Arc::new(ScriptedMetrics::new(vec![Ok(85.0), Ok(85.0), Ok(20.0)]));
        let monitor = Arc::new(SafetyMonitor::new(config(Duration::from_secs(60)), source));
        let mut abort_rx = monitor.abort_signal();

        run_monitor(Arc::clone(&monitor), 8).await;

        assert!(abort_rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_stop_before_run_is_not_lost() {
        let source = Arc::new(ScriptedMetrics::new(vec![Ok(20.0)]));
        let monitor = Arc::new(SafetyMonitor::new(config(Duration::from_secs(10)), source));

        // Teardown can finish before the monitor task is first polled.
        monitor.stop();
        let snapshots = tokio::time::timeout(Duration::from_secs(1), monitor.run())
            .await
            .expect("run must observe a stop sent before it started");

        assert!(snapshots.is_empty());
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_sample_failures_become_missing_markers() {
        let source = Arc::new(ScriptedMetrics::new(vec![
            Ok(20.0),
            Err(FaultlineError::Internal("boom".into())),
            Ok(20.0),
        ]));
        let monitor = Arc::new(SafetyMonitor::new(config(Duration::from_secs(10)), source));

        let snapshots = run_monitor(Arc::clone(&monitor), 6).await;

        assert!(snapshots.iter().any(|s| s.missing));
        // Sampling errors never abort.
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }
}
