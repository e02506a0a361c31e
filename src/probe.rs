//! Text probes for state detection against CLI tooling.
//!
//! Anywhere the engine needs to know the state of a service, port, or
//! firewall rule, it goes through a [`TextProbe`]: a parser with a
//! documented contract over the raw output of a status command, isolated so
//! it can be tested without running the tool. Structured status queries
//! (`systemctl is-active`, `systemctl show --property`) are preferred over
//! free-form output wherever the tool offers them.
//!
//! # Parsing contract
//!
//! Every probe implementation must:
//! - accept arbitrary bytes-as-UTF-8 input without panicking;
//! - ignore leading/trailing whitespace and trailing newlines;
//! - map unrecognized input to an explicit `Unknown`-style reading rather
//!   than an error, so a changed tool version degrades detection instead of
//!   failing injection outright.

use crate::error::{FaultlineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Observed state of a system service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
    Unknown,
}

impl ServiceState {
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Active)
    }
}

/// A parser over the textual output of one status command.
pub trait TextProbe: Send + Sync {
    /// The parsed reading type.
    type Reading;

    /// Parse raw command output into a reading. Must not panic.
    fn parse(&self, raw: &str) -> Self::Reading;
}

/// Probe for `systemctl is-active <unit>`.
///
/// `systemctl is-active` prints exactly one token: `active`, `inactive`,
/// `failed`, `activating`, `deactivating`, or `unknown`. Transitional states
/// are mapped to the state they are heading toward.
pub struct SystemdActiveProbe;

impl TextProbe for SystemdActiveProbe {
    type Reading = ServiceState;

    fn parse(&self, raw: &str) -> ServiceState {
        match raw.trim() {
            "active" | "activating" | "reloading" => ServiceState::Active,
            "inactive" | "deactivating" => ServiceState::Inactive,
            "failed" => ServiceState::Failed,
            _ => ServiceState::Unknown,
        }
    }
}

/// Reading produced by [`FirewallRuleProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirewallReading {
    /// Firewall engine is enabled at all.
    pub enabled: bool,
    /// A deny rule for the probed port is present.
    pub port_denied: bool,
}

/// Probe for `ufw status` filtered to one port.
///
/// Expected shape:
/// ```text
/// Status: active
/// 22/tcp    ALLOW   Anywhere
/// 8080/tcp  DENY    Anywhere
/// ```
/// The first line carries `Status: active|inactive`; rule lines start with
/// `<port>/<proto>` followed by an action column.
pub struct FirewallRuleProbe {
    port: u16,
}

impl FirewallRuleProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl TextProbe for FirewallRuleProbe {
    type Reading = FirewallReading;

    fn parse(&self, raw: &str) -> FirewallReading {
        let mut enabled = false;
        let mut port_denied = false;
        let prefix = format!("{}/", self.port);

        for line in raw.lines() {
            let line = line.trim();
            if let Some(status) = line.strip_prefix("Status:") {
                enabled = status.trim() == "active";
                continue;
            }
            if line.starts_with(&prefix) {
                let mut cols = line.split_whitespace();
                let _rule = cols.next();
                if let Some(action) = cols.next() {
                    if action.eq_ignore_ascii_case("deny") {
                        port_denied = true;
                    }
                }
            }
        }

        FirewallReading {
            enabled,
            port_denied,
        }
    }
}

/// Executes status commands for probes. Split out so tests can feed canned
/// output through the probes without shelling out.
#[async_trait]
pub trait ProbeExec: Send + Sync {
    /// Run a command and return its stdout as text. A non-zero exit is not
    /// an error here; many status tools encode state in the exit code and
    /// still print the token we parse.
    async fn capture(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// Real implementation spawning the tool via `tokio::process`.
pub struct SystemProbeExec {
    timeout: Duration,
}

impl SystemProbeExec {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemProbeExec {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ProbeExec for SystemProbeExec {
    async fn capture(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).output(),
        )
        .await
        .map_err(|_| FaultlineError::Probe(format!("probe '{}' timed out", program)))?
        .map_err(|e| FaultlineError::Probe(format!("probe '{}' failed to spawn: {}", program, e)))?;

        String::from_utf8(output.stdout)
            .map_err(|e| FaultlineError::Probe(format!("probe '{}' output not UTF-8: {}", program, e)))
    }
}

/// Query the state of a systemd unit.
pub async fn service_state(exec: &dyn ProbeExec, unit: &str) -> Result<ServiceState> {
    let raw = exec.capture("systemctl", &["is-active", unit]).await?;
    Ok(SystemdActiveProbe.parse(&raw))
}
