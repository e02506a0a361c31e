//! Recovery coordination.
//!
//! Recovery actions are derived from an injection handle's revert ops and
//! drained in reverse-application order. Failures never halt the drain;
//! they accumulate as residual issues. A health verification pass at the
//! end decides the session classification: registered host checks plus the
//! target verification the fault kind derives for itself. The whole routine
//! is safe to call repeatedly, which is what the startup crash-recovery
//! scan relies on.

use crate::error::{FaultlineError, Result};
use crate::health::{ComponentHealth, HealthChecker, HealthReport};
use crate::injector::{FaultInjector, FaultOps, InjectionHandle};
use crate::scenario::{FaultOp, Precondition};
use crate::session::{InjectionSession, SessionStore};
use crate::types::{SessionStatus, TargetResource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One ordered recovery step.
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    /// Position in the drain order.
    pub index: usize,
    /// Short name for logging.
    pub name: String,
    /// Resource this step touches.
    pub resource: TargetResource,
    /// The idempotent revert op.
    pub op: FaultOp,
    /// Optional verification after the op ran.
    pub verify: Option<Precondition>,
}

impl RecoveryAction {
    /// Build the drain list from a handle: revert ops in
    /// reverse-application order.
    pub fn from_handle(handle: &InjectionHandle) -> Vec<RecoveryAction> {
        handle
            .revert_ops
            .iter()
            .rev()
            .enumerate()
            .map(|(index, op)| RecoveryAction {
                index,
                name: op.name.clone(),
                resource: op.resource.clone(),
                op: op.clone(),
                verify: None,
            })
            .collect()
    }
}

/// Outcome of one drained action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub name: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Result of a full recovery pass.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// Every action failed or succeeded without halting the drain.
    pub actions: Vec<ActionResult>,
    /// Human-readable issues from failed actions.
    pub residual_issues: Vec<String>,
    /// Health verification report.
    pub health: HealthReport,
}

impl RecoveryResult {
    /// True when every action succeeded and the target verified healthy.
    pub fn ok(&self) -> bool {
        self.residual_issues.is_empty() && self.health.passed()
    }

    /// Session classification implied by this result. A runner maps
    /// `Completed` to `CompletedWithAbort` when the session aborted early.
    pub fn classification(&self) -> SessionStatus {
        if !self.health.passed() {
            SessionStatus::FailedRecovery
        } else if !self.residual_issues.is_empty() {
            SessionStatus::CompletedWithResidual
        } else {
            SessionStatus::Completed
        }
    }
}

/// Drains recovery actions and verifies health afterwards.
pub struct RecoveryCoordinator {
    ops: Arc<dyn FaultOps>,
    health: HealthChecker,
    action_timeout: Duration,
}

impl RecoveryCoordinator {
    pub fn new(ops: Arc<dyn FaultOps>, health: HealthChecker, action_timeout: Duration) -> Self {
        Self {
            ops,
            health,
            action_timeout,
        }
    }

    /// Run every action best-effort, then the health pass. `verify` is the
    /// target check from the injection handle; failing it marks the whole
    /// recovery failed, a clean drain notwithstanding.
    pub async fn recover(
        &self,
        actions: &[RecoveryAction],
        verify: Option<&Precondition>,
    ) -> RecoveryResult {
        let mut action_results = Vec::with_capacity(actions.len());
        let mut residual_issues = Vec::new();

        for action in actions {
            let outcome =
                tokio::time::timeout(self.action_timeout, self.run_action(action)).await;

            match outcome {
                Ok(Ok(())) => {
                    action_results.push(ActionResult {
                        name: action.name.clone(),
                        ok: true,
                        error: None,
                    });
                }
                Ok(Err(e)) => {
                    warn!(action = %action.name, error = %e, "Recovery action failed, continuing");
                    residual_issues.push(e.to_string());
                    action_results.push(ActionResult {
                        name: action.name.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
                Err(_) => {
                    let msg = format!("timed out after {:?}", self.action_timeout);
                    warn!(action = %action.name, "Recovery action timed out, continuing");
                    residual_issues.push(format!("{}: {}", action.name, msg));
                    action_results.push(ActionResult {
                        name: action.name.clone(),
                        ok: false,
                        error: Some(msg),
                    });
                }
            }
        }

        let mut health = self.health.verify().await;
        if let Some(check) = verify {
            let started = Instant::now();
            let component = match self.ops.check(check).await {
                Ok(()) => ComponentHealth::healthy(check_name(check)),
                Err(e) => ComponentHealth::unhealthy(check_name(check), e.to_string()),
            }
            .with_latency(started.elapsed());
            health.status = health.status.combine(&component.status);
            health.components.push(component);
        }

        if !health.passed() {
            warn!("Post-recovery health verification failed");
        } else if residual_issues.is_empty() {
            info!(actions = action_results.len(), "Recovery clean");
        } else {
            info!(
                residual = residual_issues.len(),
                "Recovery finished with residual issues"
            );
        }

        RecoveryResult {
            actions: action_results,
            residual_issues,
            health,
        }
    }

    async fn run_action(&self, action: &RecoveryAction) -> Result<()> {
        self.ops
            .run(&action.op)
            .await
            .map_err(|e| FaultlineError::RecoveryAction {
                action: action.name.clone(),
                reason: e.to_string(),
            })?;
        if let Some(verify) = &action.verify {
            self.ops
                .check(verify)
                .await
                .map_err(|e| FaultlineError::RecoveryAction {
                    action: action.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Crash-recovery path: recover one stale session found by the startup
    /// scan and drive its record to a terminal status.
    pub async fn recover_stale_session(
        &self,
        store: &SessionStore,
        injector: &FaultInjector,
        session: &mut InjectionSession,
    ) -> Result<SessionStatus> {
        info!(
            session_id = %session.id,
            scenario = %session.scenario,
            "Recovering stale session"
        );

        let status = match injector.load_handle(&session.id)? {
            Some(handle) if !handle.reverted => {
                let actions = RecoveryAction::from_handle(&handle);
                let result = self.recover(&actions, handle.verify.as_ref()).await;
                result.classification()
            }
            _ => {
                // No handle, or already reverted: nothing was left applied.
                SessionStatus::Failed
            }
        };

        injector.discard_handle(&session.id)?;
        store.transition(session, status)?;
        Ok(status)
    }
}

/// Component name for a target verification check in the health report.
fn check_name(check: &Precondition) -> String {
    match check {
        Precondition::ServiceActive { unit } => format!("service-active:{}", unit),
        Precondition::CommandAvailable { program } => format!("command:{}", program),
        Precondition::PathExists { path } => format!("path:{}", path.display()),
        Precondition::PortClear { port } => format!("port-clear:{}", port),
    }
}
