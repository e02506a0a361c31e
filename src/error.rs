//! Error types for the faultline orchestration engine.
//!
//! This module provides a unified error type [`FaultlineError`] for all
//! engine operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Precondition**: a scenario is inapplicable to the target; the unit is
//!   skipped without mutating any state.
//! - **Injection**: applying a fault partially failed; recovery starts
//!   immediately.
//! - **Recovery**: a single recovery action failed; the drain continues and
//!   the failure lands in the residual list.
//! - **Framework**: an external test framework could not be spawned or
//!   exited non-zero; retried per policy.
//! - **Ambient**: configuration, IO, serialization, cancellation.
//!
//! # Example
//!
//! ```rust
//! use faultline::error::{FaultlineError, Result};
//!
//! fn check_target(target: &str) -> Result<()> {
//!     if target.is_empty() {
//!         return Err(FaultlineError::PreconditionFailed(
//!             "target name cannot be empty".into(),
//!         ));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for faultline operations.
#[derive(Error, Debug)]
pub enum FaultlineError {
    // Injection errors
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Injection failed for scenario '{scenario}': {reason}")]
    Injection { scenario: String, reason: String },

    #[error("Blast radius violation: scenario '{scenario}' may not touch resource '{resource}'")]
    BlastRadius { scenario: String, resource: String },

    #[error("Revert failed for handle {handle}: {reason}")]
    Revert { handle: String, reason: String },

    // Recovery errors
    #[error("Recovery action '{action}' failed: {reason}")]
    RecoveryAction { action: String, reason: String },

    // Framework adapter errors
    #[error("Framework '{name}' exited with code {code}")]
    NonZeroExit { name: String, code: i32 },

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    // Orchestration errors
    #[error("Run cancelled")]
    Cancelled,

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Timeouts
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaultlineError {
    /// Check if the error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaultlineError::Timeout(_)
                | FaultlineError::NonZeroExit { .. }
                | FaultlineError::Revert { .. }
                | FaultlineError::Probe(_)
        )
    }
}

impl From<serde_json::Error> for FaultlineError {
    fn from(e: serde_json::Error) -> Self {
        FaultlineError::Serialization(e.to_string())
    }
}

/// Result type alias for faultline operations.
pub type Result<T> = std::result::Result<T, FaultlineError>;
