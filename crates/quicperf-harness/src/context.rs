use chrono::{DateTime, Utc};
use quicperf_sla::{SlaGateSet, SlaValidator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-run state handed to every component that needs it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub gates: Arc<SlaGateSet>,
    pub cancel: Arc<AtomicBool>,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(gates: SlaGateSet, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            gates: Arc::new(gates),
            cancel: Arc::new(AtomicBool::new(false)),
            output_dir: output_dir.into(),
            started_at: Utc::now(),
        }
    }

    /// Share an externally owned flag, e.g. one set from a Ctrl-C handler.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn validator(&self) -> SlaValidator {
        SlaValidator::new(Arc::clone(&self.gates))
    }

    pub fn scenario_dir(&self, scenario_id: &str) -> PathBuf {
        self.output_dir.join(scenario_id)
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("results.json")
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
