//! Post-recovery health verification.
//!
//! The Recovery Coordinator runs a verification pass after draining all
//! recovery actions; the result decides whether a session is classified
//! clean, residual, or fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Target is healthy.
    Healthy,
    /// Target is degraded but operational.
    Degraded,
    /// Target is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Combine two statuses (worst wins).
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Result of one health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Check name.
    pub name: String,
    /// Status.
    pub status: HealthStatus,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Check latency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Additional details.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub details: HashMap<String, String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// A single liveness/reachability check against the target host.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Check name for reporting.
    fn name(&self) -> &str;

    /// Run the check.
    async fn check(&self) -> ComponentHealth;
}

/// Verification report across all registered checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status (worst component wins).
    pub status: HealthStatus,
    /// Individual component results.
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn passed(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Runs a fixed set of health checks and combines their results.
pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Register a check.
    pub fn register(&mut self, check: Box<dyn HealthCheck>) {
        self.checks.push(check);
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every registered check and build the combined report.
    pub async fn verify(&self) -> HealthReport {
        let mut status = HealthStatus::Healthy;
        let mut components = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let start = Instant::now();
            let mut component = check.check().await;
            component.latency_ms = Some(start.elapsed().as_millis() as u64);
            status = status.combine(&component.status);
            components.push(component);
        }

        HealthReport { status, components }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// A health check that reports whether a TCP port accepts connections.
pub struct TcpPortCheck {
    name: String,
    addr: String,
    timeout: Duration,
}

impl TcpPortCheck {
    pub fn new(name: impl Into<String>, addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for TcpPortCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ComponentHealth {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await
        {
            Ok(Ok(_)) => ComponentHealth::healthy(&self.name).with_detail("addr", &self.addr),
            Ok(Err(e)) => ComponentHealth::unhealthy(&self.name, format!("connect: {}", e)),
            Err(_) => ComponentHealth::unhealthy(
                &self.name,
                format!("connect timed out after {:?}", self.timeout),
            ),
        }
    }
}
