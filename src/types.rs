//! Core shared types for faultline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an injection session.
pub type SessionId = String;

/// Unique identifier for an injection handle.
pub type HandleId = String;

/// Category of a fault scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCategory {
    /// Network-level faults (latency, loss, port blocks).
    Network,
    /// Service-level faults (stop, restart storms).
    Service,
    /// System-resource faults (cpu, memory, disk).
    System,
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCategory::Network => write!(f, "network"),
            FaultCategory::Service => write!(f, "service"),
            FaultCategory::System => write!(f, "system"),
        }
    }
}

impl FromStr for FaultCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(FaultCategory::Network),
            "service" => Ok(FaultCategory::Service),
            "system" => Ok(FaultCategory::System),
            other => Err(format!("unknown fault category: {}", other)),
        }
    }
}

/// How hard a fault scenario pushes the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Intensity {
    /// Scale factor applied to a scenario's base load parameters.
    pub fn scale(&self) -> f64 {
        match self {
            Intensity::Low => 0.25,
            Intensity::Medium => 0.5,
            Intensity::High => 0.75,
            Intensity::Extreme => 1.0,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intensity::Low => write!(f, "low"),
            Intensity::Medium => write!(f, "medium"),
            Intensity::High => write!(f, "high"),
            Intensity::Extreme => write!(f, "extreme"),
        }
    }
}

impl FromStr for Intensity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Intensity::Low),
            "medium" => Ok(Intensity::Medium),
            "high" => Ok(Intensity::High),
            "extreme" => Ok(Intensity::Extreme),
            other => Err(format!("unknown intensity: {}", other)),
        }
    }
}

/// Lifecycle status of an injection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet injecting.
    Pending,
    /// Fault applied, monitor running.
    Active,
    /// Early teardown in progress.
    Aborting,
    /// Clean recovery.
    Completed,
    /// Torn down early by the Safety Monitor; recovery was clean.
    CompletedWithAbort,
    /// Some recovery actions failed but the health check passed.
    CompletedWithResidual,
    /// Post-recovery health check failed. Fatal.
    FailedRecovery,
    /// Injection itself failed before or during apply.
    Failed,
}

impl SessionStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SessionStatus::Pending | SessionStatus::Active | SessionStatus::Aborting
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Aborting => "aborting",
            SessionStatus::Completed => "completed",
            SessionStatus::CompletedWithAbort => "completed_with_abort",
            SessionStatus::CompletedWithResidual => "completed_with_residual",
            SessionStatus::FailedRecovery => "failed_recovery",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Final classification of one executed unit, as counted in the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitClassification {
    Passed,
    Warning,
    Failed,
    Skipped,
    /// Recovery health check failed; scheduling halts.
    Fatal,
}

impl UnitClassification {
    /// Severity rank used to compute the worst classification of a run.
    pub fn severity(&self) -> u8 {
        match self {
            UnitClassification::Passed => 0,
            UnitClassification::Skipped => 0,
            UnitClassification::Warning => 1,
            UnitClassification::Failed => 2,
            UnitClassification::Fatal => 3,
        }
    }

    /// Combine two classifications (worst wins).
    pub fn combine(&self, other: &UnitClassification) -> UnitClassification {
        if other.severity() > self.severity() {
            *other
        } else {
            *self
        }
    }
}

impl fmt::Display for UnitClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitClassification::Passed => "passed",
            UnitClassification::Warning => "warning",
            UnitClassification::Failed => "failed",
            UnitClassification::Skipped => "skipped",
            UnitClassification::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// A resource a scenario may touch: a service name, network interface,
/// port, mount point. Mutual exclusion across units is keyed on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetResource(pub String);

impl TargetResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetResource {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Timestamped event for the execution timeline log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Unit name the event belongs to, if any.
    pub unit: Option<String>,
    /// Short event kind, e.g. "apply", "revert", "abort".
    pub kind: String,
    /// Free-form detail.
    pub detail: String,
}

impl TimelineEvent {
    pub fn new(unit: Option<&str>, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            unit: unit.map(|u| u.to_string()),
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip() {
        for s in ["network", "service", "system"] {
            let c: FaultCategory = s.parse().unwrap();
            assert_eq!(c.to_string(), s);
        }
        assert!("disk".parse::<FaultCategory>().is_err());
    }

    #[test]
    fn test_intensity_ordering() {
        assert!(Intensity::Low < Intensity::Extreme);
        assert!(Intensity::Extreme.scale() > Intensity::Medium.scale());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Aborting.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::CompletedWithAbort.is_terminal());
        assert!(SessionStatus::FailedRecovery.is_terminal());
    }

    #[test]
    fn test_classification_combine() {
        let worst = UnitClassification::Passed
            .combine(&UnitClassification::Warning)
            .combine(&UnitClassification::Failed);
        assert_eq!(worst, UnitClassification::Failed);

        let fatal = worst.combine(&UnitClassification::Fatal);
        assert_eq!(fatal, UnitClassification::Fatal);

        // Skipped never outranks anything
        assert_eq!(
            UnitClassification::Warning.combine(&UnitClassification::Skipped),
            UnitClassification::Warning
        );
    }
}
