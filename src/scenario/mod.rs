//! Fault scenario definitions and the built-in catalog.

use crate::error::{FaultlineError, Result};
use crate::types::{FaultCategory, Intensity, TargetResource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A single command-level effect, either applying or reverting part of a
/// fault. Ops are executed in order through the injector's `FaultOps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultOp {
    /// Short op name for logging and recovery records.
    pub name: String,
    /// The resource this op touches; checked against the scenario allow-list.
    pub resource: TargetResource,
    /// Program to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
}

impl FaultOp {
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<TargetResource>,
        program: impl Into<String>,
        args: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// A checkable condition on the target host. Used two ways: as a
/// precondition before any op runs (a failure skips the unit without
/// mutating anything), and as the post-recovery verification a fault kind
/// derives for itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Precondition {
    /// A systemd unit must exist and be active.
    ServiceActive { unit: String },
    /// A tool the ops rely on must be installed.
    CommandAvailable { program: String },
    /// A filesystem path must exist.
    PathExists { path: PathBuf },
    /// No firewall deny rule for the port may be present.
    PortClear { port: u16 },
}

/// What kind of fault a scenario injects. Numeric load parameters are base
/// values scaled by [`Intensity::scale`] when ops are generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FaultKind {
    /// Add egress latency on an interface via `tc netem`.
    NetworkLatency { interface: String, base_delay_ms: u64 },
    /// Random packet drop on an interface via `tc netem`.
    PacketLoss { interface: String, base_loss_percent: f64 },
    /// Deny inbound traffic to a port via the firewall.
    PortBlock { port: u16 },
    /// Stop a systemd unit.
    ServiceStop { unit: String },
    /// Repeatedly restart a unit to exercise crash-loop handling.
    ServiceRestartStorm { unit: String, base_cycles: u32 },
    /// Saturate CPU with stress workers.
    CpuBomb { base_workers: u32 },
    /// Allocate and hold memory.
    MemoryPressure { base_mb: u64 },
    /// Fill a filesystem path with a scratch file.
    DiskFill { path: PathBuf, base_mb: u64 },
}

impl FaultKind {
    /// Ordered ops that apply this fault at the given intensity.
    pub fn apply_ops(&self, intensity: Intensity) -> Vec<FaultOp> {
        let scale = intensity.scale();
        match self {
            FaultKind::NetworkLatency {
                interface,
                base_delay_ms,
            } => {
                let delay = ((*base_delay_ms as f64) * scale).max(1.0) as u64;
                vec![FaultOp::new(
                    "tc-add-delay",
                    interface.as_str(),
                    "tc",
                    &[
                        "qdisc", "add", "dev", interface, "root", "netem", "delay",
                        &format!("{}ms", delay),
                    ],
                )]
            }
            FaultKind::PacketLoss {
                interface,
                base_loss_percent,
            } => {
                let loss = (base_loss_percent * scale).min(100.0);
                vec![FaultOp::new(
                    "tc-add-loss",
                    interface.as_str(),
                    "tc",
                    &[
                        "qdisc", "add", "dev", interface, "root", "netem", "loss",
                        &format!("{:.1}%", loss),
                    ],
                )]
            }
            FaultKind::PortBlock { port } => vec![FaultOp::new(
                "ufw-deny-port",
                format!("port:{}", port).as_str(),
                "ufw",
                &["deny", &port.to_string()],
            )],
            FaultKind::ServiceStop { unit } => vec![FaultOp::new(
                "systemctl-stop",
                unit.as_str(),
                "systemctl",
                &["stop", unit],
            )],
            FaultKind::ServiceRestartStorm { unit, base_cycles } => {
                let cycles = ((*base_cycles as f64) * scale).max(1.0) as u32;
                (0..cycles)
                    .map(|i| {
                        FaultOp::new(
                            format!("systemctl-restart-{}", i + 1),
                            unit.as_str(),
                            "systemctl",
                            &["restart", unit],
                        )
                    })
                    .collect()
            }
            FaultKind::CpuBomb { base_workers } => {
                let workers = ((*base_workers as f64) * scale).max(1.0) as u32;
                vec![FaultOp::new(
                    "stress-cpu",
                    "cpu",
                    "stress-ng",
                    &["--cpu", &workers.to_string(), "--backoff", "0"],
                )]
            }
            FaultKind::MemoryPressure { base_mb } => {
                let mb = ((*base_mb as f64) * scale).max(1.0) as u64;
                vec![FaultOp::new(
                    "stress-vm",
                    "memory",
                    "stress-ng",
                    &["--vm", "1", "--vm-bytes", &format!("{}M", mb)],
                )]
            }
            FaultKind::DiskFill { path, base_mb } => {
                let mb = ((*base_mb as f64) * scale).max(1.0) as u64;
                let file = path.join("faultline.fill");
                vec![FaultOp::new(
                    "fallocate-fill",
                    path.to_string_lossy().as_ref(),
                    "fallocate",
                    &["-l", &format!("{}M", mb), &file.to_string_lossy()],
                )]
            }
        }
    }

    /// The check that confirms this fault is really gone after recovery.
    /// Load-generator kinds have no observable post-state to verify; their
    /// revert op killing the generator is all there is.
    pub fn verify_check(&self) -> Option<Precondition> {
        match self {
            FaultKind::ServiceStop { unit } | FaultKind::ServiceRestartStorm { unit, .. } => {
                Some(Precondition::ServiceActive { unit: unit.clone() })
            }
            FaultKind::PortBlock { port } => Some(Precondition::PortClear { port: *port }),
            FaultKind::DiskFill { path, .. } => Some(Precondition::PathExists { path: path.clone() }),
            _ => None,
        }
    }

    /// Ordered ops that revert this fault. The Recovery Coordinator runs
    /// them in reverse-application order; each must be idempotent at the
    /// command level (reverting an absent fault is tolerated).
    pub fn revert_ops(&self) -> Vec<FaultOp> {
        match self {
            FaultKind::NetworkLatency { interface, .. }
            | FaultKind::PacketLoss { interface, .. } => vec![FaultOp::new(
                "tc-del-root",
                interface.as_str(),
                "tc",
                &["qdisc", "del", "dev", interface, "root"],
            )],
            FaultKind::PortBlock { port } => vec![FaultOp::new(
                "ufw-delete-deny",
                format!("port:{}", port).as_str(),
                "ufw",
                &["delete", "deny", &port.to_string()],
            )],
            FaultKind::ServiceStop { unit } | FaultKind::ServiceRestartStorm { unit, .. } => {
                vec![FaultOp::new(
                    "systemctl-start",
                    unit.as_str(),
                    "systemctl",
                    &["start", unit],
                )]
            }
            FaultKind::CpuBomb { .. } => vec![FaultOp::new(
                "pkill-stress-cpu",
                "cpu",
                "pkill",
                &["-f", "stress-ng --cpu"],
            )],
            FaultKind::MemoryPressure { .. } => vec![FaultOp::new(
                "pkill-stress-vm",
                "memory",
                "pkill",
                &["-f", "stress-ng --vm"],
            )],
            FaultKind::DiskFill { path, .. } => {
                let file = path.join("faultline.fill");
                vec![FaultOp::new(
                    "rm-fill-file",
                    path.to_string_lossy().as_ref(),
                    "rm",
                    &["-f", &file.to_string_lossy()],
                )]
            }
        }
    }
}

/// An immutable fault scenario. Registered into the catalog at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultScenario {
    /// Unique scenario ID.
    pub id: String,
    /// Catalog name, e.g. `network_latency`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Category.
    pub category: FaultCategory,
    /// Default intensity when the caller does not override it.
    pub default_intensity: Intensity,
    /// Default injection duration.
    #[serde(with = "crate::config::humantime_serde")]
    pub default_duration: Duration,
    /// Primary resource under test; mutual exclusion is keyed on this.
    pub target: TargetResource,
    /// Fault kind with base load parameters.
    pub kind: FaultKind,
    /// Every resource the scenario's ops may touch.
    pub allowed_resources: Vec<TargetResource>,
    /// Checks run before any mutation.
    pub preconditions: Vec<Precondition>,
}

impl FaultScenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder::new()
    }

    /// Verify that every op of this scenario stays within the allow-list.
    pub fn check_blast_radius(&self, ops: &[FaultOp]) -> Result<()> {
        for op in ops {
            if !self.allowed_resources.contains(&op.resource) {
                return Err(FaultlineError::BlastRadius {
                    scenario: self.name.clone(),
                    resource: op.resource.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for scenarios.
pub struct ScenarioBuilder {
    name: Option<String>,
    description: Option<String>,
    category: Option<FaultCategory>,
    default_intensity: Intensity,
    default_duration: Duration,
    target: Option<TargetResource>,
    kind: Option<FaultKind>,
    allowed_resources: Vec<TargetResource>,
    preconditions: Vec<Precondition>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            description: None,
            category: None,
            default_intensity: Intensity::Medium,
            default_duration: Duration::from_secs(30),
            target: None,
            kind: None,
            allowed_resources: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: FaultCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn default_intensity(mut self, intensity: Intensity) -> Self {
        self.default_intensity = intensity;
        self
    }

    pub fn default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn target(mut self, target: impl Into<TargetResource>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn kind(mut self, kind: FaultKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn allow(mut self, resource: impl Into<TargetResource>) -> Self {
        self.allowed_resources.push(resource.into());
        self
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn build(self) -> Result<FaultScenario> {
        let name = self
            .name
            .ok_or_else(|| FaultlineError::Config("Scenario name is required".into()))?;
        let category = self
            .category
            .ok_or_else(|| FaultlineError::Config("Scenario category is required".into()))?;
        let target = self
            .target
            .ok_or_else(|| FaultlineError::Config("Scenario target is required".into()))?;
        let kind = self
            .kind
            .ok_or_else(|| FaultlineError::Config("Scenario kind is required".into()))?;

        let mut allowed_resources = self.allowed_resources;
        if !allowed_resources.contains(&target) {
            allowed_resources.push(target.clone());
        }

        Ok(FaultScenario {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: self.description.unwrap_or_default(),
            category,
            default_intensity: self.default_intensity,
            default_duration: self.default_duration,
            target,
            kind,
            allowed_resources,
            preconditions: self.preconditions,
        })
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of scenarios, keyed by catalog name.
pub struct ScenarioCatalog {
    scenarios: HashMap<String, FaultScenario>,
}

impl ScenarioCatalog {
    pub fn new() -> Self {
        Self {
            scenarios: HashMap::new(),
        }
    }

    /// Catalog pre-populated with the built-in scenarios.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for scenario in builtin::all()? {
            catalog.register(scenario)?;
        }
        Ok(catalog)
    }

    /// Register a scenario; names must be unique.
    pub fn register(&mut self, scenario: FaultScenario) -> Result<()> {
        if self.scenarios.contains_key(&scenario.name) {
            return Err(FaultlineError::Config(format!(
                "Duplicate scenario name: {}",
                scenario.name
            )));
        }
        self.scenarios.insert(scenario.name.clone(), scenario);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&FaultScenario> {
        self.scenarios
            .get(name)
            .ok_or_else(|| FaultlineError::ScenarioNotFound(name.to_string()))
    }

    /// All scenarios in a category, sorted by name.
    pub fn by_category(&self, category: FaultCategory) -> Vec<&FaultScenario> {
        let mut scenarios: Vec<_> = self
            .scenarios
            .values()
            .filter(|s| s.category == category)
            .collect();
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    }

    /// All scenarios, sorted by name.
    pub fn list(&self) -> Vec<&FaultScenario> {
        let mut scenarios: Vec<_> = self.scenarios.values().collect();
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl Default for ScenarioCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in scenario library.
pub mod builtin {
    use super::*;

    /// Default network interface for the network scenarios.
    pub const DEFAULT_INTERFACE: &str = "eth0";
    /// Default service unit for the service scenarios.
    pub const DEFAULT_SERVICE: &str = "nginx";

    /// Build every built-in scenario.
    pub fn all() -> Result<Vec<FaultScenario>> {
        Ok(vec![
            network_latency(DEFAULT_INTERFACE)?,
            packet_loss(DEFAULT_INTERFACE)?,
            port_block(8080)?,
            service_stop(DEFAULT_SERVICE)?,
            service_restart_storm(DEFAULT_SERVICE)?,
            cpu_bomb()?,
            memory_pressure()?,
            disk_fill("/var/tmp")?,
        ])
    }

    pub fn network_latency(interface: &str) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("network_latency")
            .description("Add egress latency on an interface")
            .category(FaultCategory::Network)
            .default_duration(Duration::from_secs(60))
            .target(interface)
            .kind(FaultKind::NetworkLatency {
                interface: interface.to_string(),
                base_delay_ms: 400,
            })
            .precondition(Precondition::CommandAvailable {
                program: "tc".into(),
            })
            .build()
    }

    pub fn packet_loss(interface: &str) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("packet_loss")
            .description("Drop a fraction of packets on an interface")
            .category(FaultCategory::Network)
            .default_duration(Duration::from_secs(60))
            .target(interface)
            .kind(FaultKind::PacketLoss {
                interface: interface.to_string(),
                base_loss_percent: 30.0,
            })
            .precondition(Precondition::CommandAvailable {
                program: "tc".into(),
            })
            .build()
    }

    pub fn port_block(port: u16) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("port_block")
            .description("Deny inbound traffic to a port")
            .category(FaultCategory::Network)
            .default_duration(Duration::from_secs(45))
            .target(format!("port:{}", port).as_str())
            .kind(FaultKind::PortBlock { port })
            .precondition(Precondition::CommandAvailable {
                program: "ufw".into(),
            })
            // A pre-existing deny rule would make the revert delete it.
            .precondition(Precondition::PortClear { port })
            .build()
    }

    pub fn service_stop(unit: &str) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("service_stop")
            .description("Stop a service and verify it comes back")
            .category(FaultCategory::Service)
            .default_duration(Duration::from_secs(30))
            .target(unit)
            .kind(FaultKind::ServiceStop {
                unit: unit.to_string(),
            })
            .precondition(Precondition::ServiceActive { unit: unit.into() })
            .build()
    }

    pub fn service_restart_storm(unit: &str) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("service_restart_storm")
            .description("Restart a service in rapid succession")
            .category(FaultCategory::Service)
            .default_duration(Duration::from_secs(60))
            .target(unit)
            .kind(FaultKind::ServiceRestartStorm {
                unit: unit.to_string(),
                base_cycles: 8,
            })
            .precondition(Precondition::ServiceActive { unit: unit.into() })
            .build()
    }

    pub fn cpu_bomb() -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("cpu_bomb")
            .description("Saturate CPU with stress workers")
            .category(FaultCategory::System)
            .default_duration(Duration::from_secs(30))
            .target("cpu")
            .kind(FaultKind::CpuBomb { base_workers: 8 })
            .precondition(Precondition::CommandAvailable {
                program: "stress-ng".into(),
            })
            .build()
    }

    pub fn memory_pressure() -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("memory_pressure")
            .description("Allocate and hold a large memory block")
            .category(FaultCategory::System)
            .default_duration(Duration::from_secs(30))
            .target("memory")
            .kind(FaultKind::MemoryPressure { base_mb: 2048 })
            .precondition(Precondition::CommandAvailable {
                program: "stress-ng".into(),
            })
            .build()
    }

    pub fn disk_fill(path: &str) -> Result<FaultScenario> {
        FaultScenario::builder()
            .name("disk_fill")
            .description("Fill a filesystem path with a scratch file")
            .category(FaultCategory::System)
            .default_duration(Duration::from_secs(30))
            .target(path)
            .kind(FaultKind::DiskFill {
                path: PathBuf::from(path),
                base_mb: 4096,
            })
            .precondition(Precondition::PathExists { path: path.into() })
            .build()
    }
}
