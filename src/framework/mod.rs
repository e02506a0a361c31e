//! External test framework adapter.
//!
//! Frameworks are opaque executables with a small contract: exit 0 means
//! pass, exit 1 means pass-with-warnings, anything else (or a timeout)
//! means fail. Failed attempts are retried with a fixed delay; every
//! attempt is recorded and logged, but only the final attempt decides the
//! unit classification.

use crate::config::FrameworkConfig;
use crate::error::{FaultlineError, Result};
use crate::resilience::{with_timeout, RetryPolicy};
use crate::shutdown::ShutdownCoordinator;
use crate::types::UnitClassification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// A runnable test framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSpec {
    /// Framework name as used on the command line.
    pub name: String,
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
}

impl FrameworkSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Look up one of the known framework adapters.
    pub fn known(name: &str) -> Result<Self> {
        match name {
            "comprehensive" => Ok(Self::new("comprehensive", "comprehensive-tests", &[])),
            "debug-validation" => Ok(Self::new("debug-validation", "debug-validation", &[])),
            "performance" => Ok(Self::new(
                "performance",
                "performance-benchmarks",
                &["--quick"],
            )),
            other => Err(FaultlineError::UnknownUnit(other.to_string())),
        }
    }

    /// Names of every known framework.
    pub fn known_names() -> &'static [&'static str] {
        &["comprehensive", "debug-validation", "performance"]
    }
}

/// One attempt at running a framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkExecution {
    /// Shared across all attempts of one unit.
    pub execution_id: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Framework name.
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Exit code; `None` on timeout or spawn failure.
    pub exit_code: Option<i32>,
    /// What this attempt would classify as.
    pub classification: UnitClassification,
    /// Log file all attempts append to.
    pub log_path: PathBuf,
}

/// Final outcome of a framework unit.
#[derive(Debug, Clone)]
pub struct FrameworkOutcome {
    pub name: String,
    /// Classification of the final attempt.
    pub classification: UnitClassification,
    /// Every attempt, in order.
    pub attempts: Vec<FrameworkExecution>,
    pub log_path: PathBuf,
}

impl FrameworkOutcome {
    pub fn retries(&self) -> u32 {
        (self.attempts.len() as u32).saturating_sub(1)
    }
}

fn classify_exit(code: Option<i32>) -> UnitClassification {
    match code {
        Some(0) => UnitClassification::Passed,
        Some(1) => UnitClassification::Warning,
        _ => UnitClassification::Failed,
    }
}

/// Runs framework executables under timeout and retry policy.
pub struct FrameworkAdapter {
    config: FrameworkConfig,
    retry: RetryPolicy,
    log_dir: PathBuf,
}

impl FrameworkAdapter {
    pub fn new(config: FrameworkConfig, log_dir: impl Into<PathBuf>) -> Self {
        let retry = RetryPolicy::fixed(config.retries + 1, config.retry_delay);
        Self {
            config,
            retry,
            log_dir: log_dir.into(),
        }
    }

    /// Run a framework to completion, retrying failures. Returns
    /// `Err(Cancelled)` only when shutdown fires mid-run.
    pub async fn run(
        &self,
        spec: &FrameworkSpec,
        shutdown: &ShutdownCoordinator,
    ) -> Result<FrameworkOutcome> {
        std::fs::create_dir_all(&self.log_dir)?;
        let execution_id = uuid::Uuid::new_v4().to_string();
        let log_path = self.log_dir.join(format!("{}.log", spec.name));
        let max_attempts = self.retry.max_attempts;
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            if shutdown.is_shutting_down() {
                return Err(FaultlineError::Cancelled);
            }

            let execution = self
                .run_attempt(spec, &execution_id, attempt, &log_path, shutdown)
                .await?;
            let classification = execution.classification;
            attempts.push(execution);

            match classification {
                UnitClassification::Passed | UnitClassification::Warning => break,
                _ if attempt < max_attempts => {
                    warn!(
                        framework = %spec.name,
                        attempt = attempt,
                        "Framework attempt failed, retrying after delay"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.delay_for_attempt(attempt)) => {}
                        _ = shutdown.wait_for_shutdown() => return Err(FaultlineError::Cancelled),
                    }
                }
                _ => {}
            }
        }

        // Only the final attempt counts.
        let classification = attempts
            .last()
            .map(|a| a.classification)
            .unwrap_or(UnitClassification::Failed);

        info!(
            framework = %spec.name,
            attempts = attempts.len(),
            result = %classification,
            "Framework finished"
        );

        Ok(FrameworkOutcome {
            name: spec.name.clone(),
            classification,
            attempts,
            log_path,
        })
    }

    async fn run_attempt(
        &self,
        spec: &FrameworkSpec,
        execution_id: &str,
        attempt: u32,
        log_path: &PathBuf,
        shutdown: &ShutdownCoordinator,
    ) -> Result<FrameworkExecution> {
        let started_at = Utc::now();

        let spawned = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let (exit_code, stdout, stderr) = match spawned {
            Err(e) => {
                warn!(framework = %spec.name, error = %e, "Failed to spawn framework");
                (None, Vec::new(), format!("spawn failed: {}", e).into_bytes())
            }
            Ok(child) => {
                let wait = with_timeout(self.config.timeout, || async {
                    child.wait_with_output().await.map_err(FaultlineError::from)
                });
                tokio::select! {
                    result = wait => {
                        match result {
                            Ok(output) => (output.status.code(), output.stdout, output.stderr),
                            Err(FaultlineError::Timeout(_)) => {
                                // The child is killed on drop.
                                warn!(
                                    framework = %spec.name,
                                    timeout_s = self.config.timeout.as_secs(),
                                    "Framework timed out, killed"
                                );
                                (None, Vec::new(), Vec::new())
                            }
                            Err(e) => (None, Vec::new(), format!("wait failed: {}", e).into_bytes()),
                        }
                    }
                    _ = shutdown.wait_for_shutdown() => {
                        return Err(FaultlineError::Cancelled);
                    }
                }
            }
        };

        let finished_at = Utc::now();
        self.append_log(log_path, spec, attempt, exit_code, &stdout, &stderr)?;

        Ok(FrameworkExecution {
            execution_id: execution_id.to_string(),
            attempt,
            name: spec.name.clone(),
            started_at,
            finished_at,
            exit_code,
            classification: classify_exit(exit_code),
            log_path: log_path.clone(),
        })
    }

    fn append_log(
        &self,
        log_path: &PathBuf,
        spec: &FrameworkSpec,
        attempt: u32,
        exit_code: Option<i32>,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        writeln!(
            file,
            "=== {} attempt {} at {} (exit: {}) ===",
            spec.name,
            attempt,
            Utc::now().to_rfc3339(),
            exit_code.map_or("none".to_string(), |c| c.to_string()),
        )?;
        file.write_all(stdout)?;
        file.write_all(stderr)?;
        writeln!(file)?;
        Ok(())
    }
}
