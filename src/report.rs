//! Aggregate run reporting.
//!
//! The aggregator task owns a [`ReportBuilder`]; unit results stream in
//! over a channel and nothing else touches the counters. The finished
//! report renders as text for the terminal and as JSON with a fixed
//! schema:
//!
//! ```json
//! {"summary":{"total":3,"passed":2,"failed":1,"warning":0,"skipped":0},
//!  "units":[{"name":"service_stop","category":"service","result":"passed",
//!            "durationSec":31.2,"retries":0,"logPath":null}]}
//! ```

use crate::error::Result;
use crate::types::{TimelineEvent, UnitClassification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One unit entry in the aggregate report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub name: String,
    /// Scenario category, or `framework`.
    pub category: String,
    pub result: UnitClassification,
    pub duration_sec: f64,
    pub retries: u32,
    pub log_path: Option<PathBuf>,
}

/// Aggregate counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warning: usize,
    pub skipped: usize,
}

/// The finished run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub summary: Summary,
    pub units: Vec<UnitReport>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub partial: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AggregateReport {
    /// Worst classification across all units; drives the exit code.
    pub fn worst(&self) -> UnitClassification {
        self.units
            .iter()
            .map(|u| u.result)
            .fold(UnitClassification::Passed, |acc, r| acc.combine(&r))
    }

    pub fn success_rate(&self) -> f64 {
        let counted = self.summary.total - self.summary.skipped;
        if counted == 0 {
            return 100.0;
        }
        (self.summary.passed as f64 / counted as f64) * 100.0
    }

    /// Human-readable rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== faultline run report ===\n");
        if self.partial {
            out.push_str("(partial: run was cancelled)\n");
        }
        for unit in &self.units {
            out.push_str(&format!(
                "  [{:<7}] {:<24} {:>8.1}s  retries={}{}\n",
                unit.result.to_string(),
                unit.name,
                unit.duration_sec,
                unit.retries,
                unit.log_path
                    .as_ref()
                    .map(|p| format!("  log={}", p.display()))
                    .unwrap_or_default(),
            ));
        }
        out.push_str(&format!(
            "\n{} total: {} passed, {} failed, {} warning, {} skipped ({:.1}% success)\n",
            self.summary.total,
            self.summary.passed,
            self.summary.failed,
            self.summary.warning,
            self.summary.skipped,
            self.success_rate(),
        ));
        out
    }

    /// Write both report forms into the report directory.
    pub fn write(&self, report_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(report_dir)?;
        std::fs::write(
            report_dir.join("report.json"),
            serde_json::to_string_pretty(self)?,
        )?;
        std::fs::write(report_dir.join("report.txt"), self.render_text())?;
        Ok(())
    }
}

/// Accumulates unit results into an [`AggregateReport`].
pub struct ReportBuilder {
    units: Vec<UnitReport>,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn add(&mut self, unit: UnitReport) {
        self.units.push(unit);
    }

    pub fn finish(self, partial: bool) -> AggregateReport {
        let mut summary = Summary {
            total: self.units.len(),
            ..Default::default()
        };
        for unit in &self.units {
            match unit.result {
                UnitClassification::Passed => summary.passed += 1,
                UnitClassification::Warning => summary.warning += 1,
                UnitClassification::Skipped => summary.skipped += 1,
                // Fatal is a failure as far as the counters go.
                UnitClassification::Failed | UnitClassification::Fatal => summary.failed += 1,
            }
        }

        AggregateReport {
            summary,
            units: self.units,
            partial,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only execution timeline, one JSON event per line.
pub struct TimelineLog {
    path: PathBuf,
}

impl TimelineLog {
    pub fn open(report_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(report_dir)?;
        Ok(Self {
            path: report_dir.join("timeline.log"),
        })
    }

    pub fn record(&self, event: &TimelineEvent) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
