//! Fault injection and revert.
//!
//! The injector turns a scenario into command-level effects through the
//! [`FaultOps`] trait. [`CommandFaultOps`] shells out to the real tools;
//! [`SimFaultOps`] keeps everything in memory for tests. The injection
//! handle is persisted to the state directory before the first mutating op
//! so a crash mid-injection always leaves enough on disk to revert.

use crate::error::{FaultlineError, Result};
use crate::probe::{
    FirewallRuleProbe, ProbeExec, ServiceState, SystemProbeExec, SystemdActiveProbe, TextProbe,
};
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::scenario::{FaultOp, FaultScenario, Precondition};
use crate::types::{HandleId, Intensity, SessionId, TargetResource};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Executes command-level fault effects and precondition checks.
#[async_trait::async_trait]
pub trait FaultOps: Send + Sync {
    /// Run one op. Long-running load generators may be left in the
    /// background; their revert op is responsible for killing them.
    async fn run(&self, op: &FaultOp) -> Result<()>;

    /// Check one precondition. `PreconditionFailed` means skip the unit.
    async fn check(&self, precondition: &Precondition) -> Result<()>;
}

/// Real implementation shelling out via `tokio::process`.
pub struct CommandFaultOps {
    probe_exec: SystemProbeExec,
    /// Ops finishing within this window have their exit status checked;
    /// anything still running after it is treated as a background load
    /// generator and left alone.
    launch_grace: Duration,
}

impl CommandFaultOps {
    pub fn new() -> Self {
        Self {
            probe_exec: SystemProbeExec::default(),
            launch_grace: Duration::from_secs(2),
        }
    }

    pub fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }
}

impl Default for CommandFaultOps {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FaultOps for CommandFaultOps {
    async fn run(&self, op: &FaultOp) -> Result<()> {
        let mut child = tokio::process::Command::new(&op.program)
            .args(&op.args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| FaultlineError::Spawn {
                command: op.program.clone(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(self.launch_grace, child.wait()).await {
            Ok(Ok(status)) => {
                if status.success() {
                    debug!(op = %op.name, "Op completed");
                    Ok(())
                } else {
                    Err(FaultlineError::NonZeroExit {
                        name: op.name.clone(),
                        code: status.code().unwrap_or(-1),
                    })
                }
            }
            Ok(Err(e)) => Err(FaultlineError::Spawn {
                command: op.program.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                // Still running past the grace window: a background load
                // generator. Its revert op kills it.
                debug!(op = %op.name, "Op left running in the background");
                Ok(())
            }
        }
    }

    async fn check(&self, precondition: &Precondition) -> Result<()> {
        match precondition {
            Precondition::ServiceActive { unit } => {
                let raw = self
                    .probe_exec
                    .capture("systemctl", &["is-active", unit])
                    .await?;
                match SystemdActiveProbe.parse(&raw) {
                    ServiceState::Active => Ok(()),
                    state => Err(FaultlineError::PreconditionFailed(format!(
                        "Service '{}' is not active ({:?})",
                        unit, state
                    ))),
                }
            }
            Precondition::CommandAvailable { program } => {
                let raw = self.probe_exec.capture("which", &[program]).await?;
                if raw.trim().is_empty() {
                    Err(FaultlineError::PreconditionFailed(format!(
                        "Required tool '{}' is not installed",
                        program
                    )))
                } else {
                    Ok(())
                }
            }
            Precondition::PathExists { path } => {
                if tokio::fs::metadata(path).await.is_ok() {
                    Ok(())
                } else {
                    Err(FaultlineError::PreconditionFailed(format!(
                        "Path '{}' does not exist",
                        path.display()
                    )))
                }
            }
            Precondition::PortClear { port } => {
                let raw = self.probe_exec.capture("ufw", &["status"]).await?;
                let reading = FirewallRuleProbe::new(*port).parse(&raw);
                if reading.enabled && reading.port_denied {
                    Err(FaultlineError::PreconditionFailed(format!(
                        "Port {} is denied by the firewall",
                        port
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// In-memory implementation for tests.
#[derive(Default)]
pub struct SimFaultOps {
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    executed: Vec<String>,
    failing_ops: HashSet<String>,
    failed_preconditions: HashSet<String>,
}

impl SimFaultOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every op with this name fail.
    pub fn fail_op(&self, name: &str) {
        self.state.lock().failing_ops.insert(name.to_string());
    }

    /// Stop failing an op.
    pub fn heal_op(&self, name: &str) {
        self.state.lock().failing_ops.remove(name);
    }

    /// Make a precondition fail, keyed by its unit/program/path.
    pub fn fail_precondition(&self, key: &str) {
        self.state
            .lock()
            .failed_preconditions
            .insert(key.to_string());
    }

    /// Names of every op executed, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }
}

#[async_trait::async_trait]
impl FaultOps for SimFaultOps {
    async fn run(&self, op: &FaultOp) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_ops.contains(&op.name) {
            return Err(FaultlineError::NonZeroExit {
                name: op.name.clone(),
                code: 1,
            });
        }
        state.executed.push(op.name.clone());
        Ok(())
    }

    async fn check(&self, precondition: &Precondition) -> Result<()> {
        let key = match precondition {
            Precondition::ServiceActive { unit } => unit.clone(),
            Precondition::CommandAvailable { program } => program.clone(),
            Precondition::PathExists { path } => path.to_string_lossy().into_owned(),
            Precondition::PortClear { port } => format!("port:{}", port),
        };
        if self.state.lock().failed_preconditions.contains(&key) {
            return Err(FaultlineError::PreconditionFailed(format!(
                "Simulated precondition failure: {}",
                key
            )));
        }
        Ok(())
    }
}

/// Handle to an applied fault. Persisted before the first mutating op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionHandle {
    /// Unique handle ID.
    pub id: HandleId,
    /// Session this injection belongs to.
    pub session_id: SessionId,
    /// Scenario name.
    pub scenario: String,
    /// Primary resource under test.
    pub target: TargetResource,
    /// Ops applied, in order.
    pub applied_ops: Vec<FaultOp>,
    /// Ops that revert the fault.
    pub revert_ops: Vec<FaultOp>,
    /// Post-recovery verification derived from the fault kind.
    #[serde(default)]
    pub verify: Option<Precondition>,
    /// Handle creation time.
    pub created_at: DateTime<Utc>,
    /// Set once a revert succeeded.
    pub reverted: bool,
}

/// Outcome of a revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    /// Fault reverted cleanly.
    Reverted,
    /// Handle was already reverted; nothing done.
    AlreadyReverted,
    /// Retries exhausted; the recovery coordinator's full-reset path must
    /// take over.
    Escalate { reason: String },
}

/// Applies and reverts faults.
pub struct FaultInjector {
    ops: Arc<dyn FaultOps>,
    state_dir: PathBuf,
    revert_policy: RetryPolicy,
}

impl FaultInjector {
    pub fn new(ops: Arc<dyn FaultOps>, state_dir: impl Into<PathBuf>, revert_policy: RetryPolicy) -> Self {
        Self {
            ops,
            state_dir: state_dir.into(),
            revert_policy,
        }
    }

    fn handle_path(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("handle-{}.json", session_id))
    }

    fn persist_handle(&self, handle: &InjectionHandle) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        let path = self.handle_path(&handle.session_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(handle)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load the persisted handle for a session, if one exists. Used by the
    /// crash-recovery scan to rebuild revert ops for a stale session.
    pub fn load_handle(&self, session_id: &str) -> Result<Option<InjectionHandle>> {
        let path = self.handle_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Remove a session's persisted handle once recovery has dealt with it.
    pub fn discard_handle(&self, session_id: &str) -> Result<()> {
        let path = self.handle_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Apply a scenario's fault. Preconditions run first and fail the call
    /// without any mutation; the handle hits disk before the first op runs.
    pub async fn apply(
        &self,
        scenario: &FaultScenario,
        session_id: &SessionId,
        intensity: Intensity,
    ) -> Result<InjectionHandle> {
        for precondition in &scenario.preconditions {
            self.ops.check(precondition).await?;
        }

        let apply_ops = scenario.kind.apply_ops(intensity);
        let revert_ops = scenario.kind.revert_ops();
        scenario.check_blast_radius(&apply_ops)?;
        scenario.check_blast_radius(&revert_ops)?;

        let mut handle = InjectionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            scenario: scenario.name.clone(),
            target: scenario.target.clone(),
            applied_ops: Vec::new(),
            revert_ops,
            verify: scenario.kind.verify_check(),
            created_at: Utc::now(),
            reverted: false,
        };

        // On disk before anything mutates.
        self.persist_handle(&handle)?;

        info!(
            scenario = %scenario.name,
            session_id = %session_id,
            intensity = %intensity,
            ops = apply_ops.len(),
            "Applying fault"
        );

        for op in apply_ops {
            if let Err(e) = self.ops.run(&op).await {
                error!(op = %op.name, error = %e, "Fault op failed mid-apply");
                // Record what did run so recovery knows the partial state.
                self.persist_handle(&handle)?;
                return Err(FaultlineError::Injection {
                    scenario: scenario.name.clone(),
                    reason: format!("op '{}' failed: {}", op.name, e),
                });
            }
            handle.applied_ops.push(op);
        }

        self.persist_handle(&handle)?;
        Ok(handle)
    }

    /// Revert an applied fault. Idempotent: a second call is a no-op
    /// success. Failed reverts retry with backoff, then escalate.
    pub async fn revert(&self, handle: &mut InjectionHandle) -> Result<RevertOutcome> {
        if handle.reverted {
            debug!(handle = %handle.id, "Revert skipped, already reverted");
            return Ok(RevertOutcome::AlreadyReverted);
        }

        let executor = RetryExecutor::new(self.revert_policy.clone());
        let ops = Arc::clone(&self.ops);
        let revert_ops = handle.revert_ops.clone();
        let handle_id = handle.id.clone();

        let result = executor
            .execute(|attempt| {
                let ops = Arc::clone(&ops);
                let revert_ops = revert_ops.clone();
                let handle_id = handle_id.clone();
                async move {
                    for op in &revert_ops {
                        ops.run(op).await.map_err(|e| FaultlineError::Revert {
                            handle: handle_id.clone(),
                            reason: format!("op '{}' failed on attempt {}: {}", op.name, attempt, e),
                        })?;
                    }
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) => {
                handle.reverted = true;
                self.persist_handle(handle)?;
                // The record has served its purpose; drop it from the scan set.
                let _ = std::fs::remove_file(self.handle_path(&handle.session_id));
                info!(handle = %handle.id, "Fault reverted");
                Ok(RevertOutcome::Reverted)
            }
            Err(e) => {
                warn!(handle = %handle.id, error = %e, "Revert retries exhausted, escalating");
                Ok(RevertOutcome::Escalate {
                    reason: e.to_string(),
                })
            }
        }
    }
}
