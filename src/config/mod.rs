//! Configuration module for faultline.

use crate::error::{FaultlineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a faultline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultlineConfig {
    /// Safety monitor thresholds and sampling.
    pub safety: SafetyConfig,
    /// Scheduling and retry behavior.
    pub execution: ExecutionConfig,
    /// Framework adapter defaults.
    pub frameworks: FrameworkConfig,
    /// State, log, and report directories.
    pub paths: PathsConfig,
    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl FaultlineConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FaultlineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| FaultlineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, rejecting out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let s = &self.safety;
        if s.soft_threshold_percent > 100.0 || s.soft_threshold_percent <= 0.0 {
            return Err(FaultlineError::InvalidConfig {
                field: "safety.soft_threshold_percent".to_string(),
                reason: "must be within (0, 100]".to_string(),
            });
        }
        if s.hard_threshold_percent > 100.0 || s.hard_threshold_percent <= 0.0 {
            return Err(FaultlineError::InvalidConfig {
                field: "safety.hard_threshold_percent".to_string(),
                reason: "must be within (0, 100]".to_string(),
            });
        }
        if s.soft_threshold_percent >= s.hard_threshold_percent {
            return Err(FaultlineError::InvalidConfig {
                field: "safety.soft_threshold_percent".to_string(),
                reason: "soft threshold must be below hard threshold".to_string(),
            });
        }
        if s.sample_interval.is_zero() {
            return Err(FaultlineError::InvalidConfig {
                field: "safety.sample_interval".to_string(),
                reason: "sampling interval must be non-zero".to_string(),
            });
        }

        let e = &self.execution;
        if e.jobs == 0 {
            return Err(FaultlineError::InvalidConfig {
                field: "execution.jobs".to_string(),
                reason: "worker slots must be at least 1".to_string(),
            });
        }
        if e.revert_retries == 0 || e.revert_retries > 10 {
            return Err(FaultlineError::InvalidConfig {
                field: "execution.revert_retries".to_string(),
                reason: "revert retries must be within 1..=10".to_string(),
            });
        }

        if self.frameworks.retries > 10 {
            return Err(FaultlineError::InvalidConfig {
                field: "frameworks.retries".to_string(),
                reason: "framework retries must be at most 10".to_string(),
            });
        }
        if self.frameworks.timeout.is_zero() {
            return Err(FaultlineError::InvalidConfig {
                field: "frameworks.timeout".to_string(),
                reason: "framework timeout must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// A permissive configuration for local development and tests.
    pub fn development() -> Self {
        Self {
            safety: SafetyConfig {
                soft_threshold_percent: 80.0,
                hard_threshold_percent: 95.0,
                sample_interval: Duration::from_millis(500),
                grace_period: Duration::from_secs(5),
            },
            execution: ExecutionConfig {
                mode: ExecutionMode::Sequential,
                jobs: 2,
                continue_on_failure: false,
                unit_timeout: Duration::from_secs(300),
                revert_retries: 3,
                revert_base_delay: Duration::from_millis(200),
            },
            frameworks: FrameworkConfig {
                retries: 2,
                retry_delay: Duration::from_secs(2),
                timeout: Duration::from_secs(600),
            },
            paths: PathsConfig {
                state_dir: PathBuf::from("/tmp/faultline/state"),
                log_dir: PathBuf::from("/tmp/faultline/logs"),
                report_dir: PathBuf::from("/tmp/faultline/reports"),
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Safety monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Soft threshold (percent) — crossing it moves the monitor to Warning.
    pub soft_threshold_percent: f64,
    /// Hard threshold (percent) — crossing it triggers an immediate abort.
    pub hard_threshold_percent: f64,
    /// Fixed sampling interval.
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
    /// How long a sustained Warning is tolerated before aborting.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            soft_threshold_percent: 80.0,
            hard_threshold_percent: 95.0,
            sample_interval: Duration::from_secs(2),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Scheduling mode for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One unit at a time, in order.
    Sequential,
    /// Bounded worker pool.
    Parallel,
}

/// Orchestrator execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Scheduling mode.
    pub mode: ExecutionMode,
    /// Worker slots in parallel mode.
    pub jobs: usize,
    /// In sequential mode, keep scheduling after a failed unit.
    pub continue_on_failure: bool,
    /// Upper bound for a single unit including recovery.
    #[serde(with = "humantime_serde")]
    pub unit_timeout: Duration,
    /// Attempts for a failed fault revert before escalating.
    pub revert_retries: u32,
    /// Base delay for revert retry backoff.
    #[serde(with = "humantime_serde")]
    pub revert_base_delay: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            jobs: 2,
            continue_on_failure: false,
            unit_timeout: Duration::from_secs(600),
            revert_retries: 3,
            revert_base_delay: Duration::from_millis(500),
        }
    }
}

/// Framework adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Retries after a failed attempt (total attempts = retries + 1).
    pub retries: u32,
    /// Fixed delay between attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Per-attempt timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Filesystem layout for persisted state and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Session and handle records live here; scanned at startup.
    pub state_dir: PathBuf,
    /// One log file per unit execution.
    pub log_dir: PathBuf,
    /// Aggregate report (text + JSON) and timeline log.
    pub report_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/faultline/state"),
            log_dir: PathBuf::from("/var/log/faultline"),
            report_dir: PathBuf::from("/var/lib/faultline/reports"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter.
    pub log_level: String,
    /// Emit JSON logs instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime-style suffixes.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = FaultlineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = FaultlineConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.jobs, 2);
        assert_eq!(config.frameworks.retries, 2);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = FaultlineConfig::development();
        config.safety.hard_threshold_percent = 150.0;
        assert!(config.validate().is_err());

        config.safety.hard_threshold_percent = 95.0;
        config.safety.soft_threshold_percent = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_soft_must_be_below_hard() {
        let mut config = FaultlineConfig::development();
        config.safety.soft_threshold_percent = 96.0;
        config.safety.hard_threshold_percent = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let mut config = FaultlineConfig::development();
        config.execution.jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_parsing() {
        let json = r#"{
            "soft_threshold_percent": 75.0,
            "hard_threshold_percent": 90.0,
            "sample_interval": "2s",
            "grace_period": "500ms"
        }"#;
        let safety: SafetyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(safety.sample_interval, Duration::from_secs(2));
        assert_eq!(safety.grace_period, Duration::from_millis(500));
    }
}
