//! Scenario unit lifecycle.
//!
//! One runner drives one scenario unit:
//!
//! ```text
//! Pending -> Injecting -> Monitoring -> Teardown -> terminal
//! ```
//!
//! After injection, the runner waits on whichever comes first: planned
//! expiry, a safety abort, or external cancellation. Every exit path funnels
//! into a single-shot teardown (revert, then recovery, then health), so the
//! fault is taken down exactly once no matter which signal fired.

use crate::config::SafetyConfig;
use crate::error::{FaultlineError, Result};
use crate::injector::{FaultInjector, RevertOutcome};
use crate::recovery::{RecoveryAction, RecoveryCoordinator, RecoveryResult};
use crate::report::TimelineLog;
use crate::safety::{MetricsSource, SafetyMonitor, SafetySnapshot};
use crate::scenario::FaultScenario;
use crate::session::{InjectionSession, SessionStore};
use crate::shutdown::{ShutdownCoordinator, TeardownGuard};
use crate::types::{FaultCategory, Intensity, SessionStatus, TimelineEvent, UnitClassification};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of one scenario unit.
#[derive(Debug)]
pub struct RunnerResult {
    pub session_id: String,
    pub scenario: String,
    pub category: FaultCategory,
    pub classification: UnitClassification,
    pub status: SessionStatus,
    pub elapsed: Duration,
    pub snapshots: Vec<SafetySnapshot>,
    pub recovery: Option<RecoveryResult>,
    pub abort_reason: Option<String>,
    /// Extra context: skip reason or injection error.
    pub detail: Option<String>,
}

/// Runs scenario units end to end.
pub struct ScenarioRunner {
    injector: Arc<FaultInjector>,
    recovery: Arc<RecoveryCoordinator>,
    store: Arc<SessionStore>,
    safety_config: SafetyConfig,
    metrics: Arc<dyn MetricsSource>,
    timeline: Arc<TimelineLog>,
    shutdown: ShutdownCoordinator,
}

impl ScenarioRunner {
    pub fn new(
        injector: Arc<FaultInjector>,
        recovery: Arc<RecoveryCoordinator>,
        store: Arc<SessionStore>,
        safety_config: SafetyConfig,
        metrics: Arc<dyn MetricsSource>,
        timeline: Arc<TimelineLog>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            injector,
            recovery,
            store,
            safety_config,
            metrics,
            timeline,
            shutdown,
        }
    }

    /// Run one scenario. Duration and intensity default from the scenario.
    pub async fn run(
        &self,
        scenario: &FaultScenario,
        duration: Option<Duration>,
        intensity: Option<Intensity>,
    ) -> Result<RunnerResult> {
        let duration = duration.unwrap_or(scenario.default_duration);
        let intensity = intensity.unwrap_or(scenario.default_intensity);
        let started = Instant::now();

        let mut session =
            InjectionSession::new(&scenario.name, scenario.target.clone(), duration);
        self.store.persist(&session)?;

        info!(
            scenario = %scenario.name,
            session_id = %session.id,
            duration_s = duration.as_secs(),
            "Starting scenario unit"
        );

        // Inject.
        let mut handle = match self.injector.apply(scenario, &session.id, intensity).await {
            Ok(handle) => handle,
            Err(FaultlineError::PreconditionFailed(reason)) => {
                info!(scenario = %scenario.name, reason = %reason, "Scenario skipped");
                self.store.transition(&mut session, SessionStatus::Failed)?;
                return Ok(RunnerResult {
                    session_id: session.id,
                    scenario: scenario.name.clone(),
                    category: scenario.category,
                    classification: UnitClassification::Skipped,
                    status: SessionStatus::Failed,
                    elapsed: started.elapsed(),
                    snapshots: Vec::new(),
                    recovery: None,
                    abort_reason: None,
                    detail: Some(reason),
                });
            }
            Err(e) => {
                // Partial injection: recover immediately off the persisted
                // handle, if there is one.
                warn!(scenario = %scenario.name, error = %e, "Injection failed, recovering");
                let recovery = match self.injector.load_handle(&session.id)? {
                    Some(h) => {
                        let actions = RecoveryAction::from_handle(&h);
                        let result = self.recovery.recover(&actions, h.verify.as_ref()).await;
                        self.injector.discard_handle(&session.id)?;
                        Some(result)
                    }
                    None => None,
                };

                let status = match &recovery {
                    Some(r) if !r.health.passed() => SessionStatus::FailedRecovery,
                    _ => SessionStatus::Failed,
                };
                let classification = if status == SessionStatus::FailedRecovery {
                    UnitClassification::Fatal
                } else {
                    UnitClassification::Failed
                };
                self.store.transition(&mut session, status)?;

                return Ok(RunnerResult {
                    session_id: session.id,
                    scenario: scenario.name.clone(),
                    category: scenario.category,
                    classification,
                    status,
                    elapsed: started.elapsed(),
                    snapshots: Vec::new(),
                    recovery,
                    abort_reason: None,
                    detail: Some(e.to_string()),
                });
            }
        };

        let _ = self.timeline.record(&TimelineEvent::new(
            Some(&scenario.name),
            "apply",
            format!("session {} fault applied", session.id),
        ));
        self.store.transition(&mut session, SessionStatus::Active)?;

        // Monitor runs beside the planned-duration timer.
        let monitor = Arc::new(SafetyMonitor::new(
            self.safety_config.clone(),
            Arc::clone(&self.metrics),
        ));
        let mut abort_rx = monitor.abort_signal();
        let monitor_task = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.run().await })
        };

        let mut abort_reason = None;
        let mut cancelled = false;

        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                info!(session_id = %session.id, "Planned duration elapsed");
            }
            changed = abort_rx.changed() => {
                if changed.is_ok() {
                    abort_reason = abort_rx.borrow().clone();
                }
                warn!(
                    session_id = %session.id,
                    reason = abort_reason.as_deref().unwrap_or("unknown"),
                    "Safety abort, tearing down early"
                );
            }
            _ = self.shutdown.wait_for_shutdown() => {
                cancelled = true;
                info!(session_id = %session.id, "Cancellation, tearing down");
            }
        }

        // Exactly-once teardown. Errors are held until the monitor task has
        // been stopped and joined; bailing out with it still sampling would
        // leak the task.
        let teardown = async {
            if abort_reason.is_some() {
                session.abort_reason = abort_reason.clone();
                let _ = self.timeline.record(&TimelineEvent::new(
                    Some(&scenario.name),
                    "abort",
                    abort_reason.clone().unwrap_or_default(),
                ));
                self.store.transition(&mut session, SessionStatus::Aborting)?;
            }

            let guard = TeardownGuard::new();
            if guard.claim() {
                self.teardown(&mut handle).await
            } else {
                Err(FaultlineError::Internal("Teardown never ran".into()))
            }
        }
        .await;

        // Sampling continues best-effort through teardown; stop it now.
        monitor.stop();
        let snapshots = monitor_task
            .await
            .map_err(|e| FaultlineError::Internal(format!("Monitor task panicked: {}", e)))?;

        let recovery = match teardown {
            Ok(recovery) => {
                let _ = self.timeline.record(&TimelineEvent::new(
                    Some(&scenario.name),
                    "revert",
                    format!("session {} fault reverted", session.id),
                ));
                recovery
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Teardown failed");
                // Best-effort terminal status before surfacing the error.
                let _ = self.store.transition(&mut session, SessionStatus::Failed);
                return Err(e);
            }
        };

        let mut status = recovery.classification();
        if status == SessionStatus::Completed && abort_reason.is_some() {
            status = SessionStatus::CompletedWithAbort;
        }
        self.store.transition(&mut session, status)?;

        let classification = if cancelled {
            UnitClassification::Skipped
        } else {
            classify(status)
        };

        info!(
            session_id = %session.id,
            status = %status,
            result = %classification,
            "Scenario unit finished"
        );

        Ok(RunnerResult {
            session_id: session.id,
            scenario: scenario.name.clone(),
            category: scenario.category,
            classification,
            status,
            elapsed: started.elapsed(),
            snapshots,
            recovery: Some(recovery),
            abort_reason,
            detail: None,
        })
    }

    /// Revert, escalating into the full recovery drain when revert retries
    /// are exhausted, then verify health.
    async fn teardown(
        &self,
        handle: &mut crate::injector::InjectionHandle,
    ) -> Result<RecoveryResult> {
        let verify = handle.verify.clone();
        match self.injector.revert(handle).await? {
            RevertOutcome::Reverted | RevertOutcome::AlreadyReverted => {
                // Fault is gone; recovery pass is verification only.
                Ok(self.recovery.recover(&[], verify.as_ref()).await)
            }
            RevertOutcome::Escalate { reason } => {
                warn!(handle = %handle.id, reason = %reason, "Revert escalated to full recovery");
                let actions = RecoveryAction::from_handle(handle);
                let result = self.recovery.recover(&actions, verify.as_ref()).await;
                self.injector.discard_handle(&handle.session_id)?;
                Ok(result)
            }
        }
    }
}

fn classify(status: SessionStatus) -> UnitClassification {
    match status {
        SessionStatus::Completed => UnitClassification::Passed,
        SessionStatus::CompletedWithAbort | SessionStatus::CompletedWithResidual => {
            UnitClassification::Warning
        }
        SessionStatus::FailedRecovery => UnitClassification::Fatal,
        _ => UnitClassification::Failed,
    }
}
