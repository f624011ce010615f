use crate::result::ScenarioResult;
use chrono::{DateTime, Utc};
use quicperf_sla::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Fold over finished scenario results. Never re-validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub mean_score: f64,
    pub violations: ViolationCounts,
    pub runtime_errors: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub failed_scenarios: Vec<String>,
    /// Max of per-scenario SLA exit codes; 2 when any scenario hit a
    /// runtime error.
    pub exit_code: i32,
}

impl MatrixSummary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        Self::from_results_at(results, Utc::now())
    }

    pub fn from_results_at(results: &[ScenarioResult], now: DateTime<Utc>) -> Self {
        let mut violations = ViolationCounts::default();
        for v in results.iter().flat_map(|r| &r.sla.violations) {
            match v.severity {
                Severity::Critical => violations.critical += 1,
                Severity::Warning => violations.warning += 1,
                Severity::Info => violations.info += 1,
            }
        }

        let passed = results.iter().filter(|r| r.passed).count();
        let runtime_errors = results.iter().filter(|r| r.has_runtime_errors()).count();
        let mean_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.sla.score).sum::<f64>() / results.len() as f64
        };

        let sla_exit = results.iter().map(|r| r.sla.exit_code).max().unwrap_or(0);
        let exit_code = if runtime_errors > 0 { 2 } else { sla_exit };

        let started_at = results.first().map(|r| r.start_time);
        let elapsed_secs = started_at
            .map(|s| (now - s).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            mean_score,
            violations,
            runtime_errors,
            started_at,
            finished_at: now,
            elapsed_secs,
            failed_scenarios: results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.scenario_id.clone())
                .collect(),
            exit_code,
        }
    }

    /// Writes `summary.json` into `dir`.
    pub fn write_summary(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join("summary.json");
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

impl fmt::Display for MatrixSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test matrix summary")?;
        writeln!(f, "===================")?;
        writeln!(
            f,
            "Scenarios: {} total, {} passed, {} failed ({} with runtime errors)",
            self.total, self.passed, self.failed, self.runtime_errors
        )?;
        writeln!(f, "Mean SLA score: {:.2}", self.mean_score)?;
        writeln!(
            f,
            "Violations: {} critical, {} warning, {} info",
            self.violations.critical, self.violations.warning, self.violations.info
        )?;
        writeln!(f, "Elapsed: {:.1}s", self.elapsed_secs)?;
        if !self.failed_scenarios.is_empty() {
            writeln!(f, "Failed: {}", self.failed_scenarios.join(", "))?;
        }
        write!(f, "Exit code: {}", self.exit_code)
    }
}
