use crate::gates::SlaGateSet;
use crate::metrics::SlaMetrics;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    fn penalty(&self) -> f64 {
        match self {
            Severity::Info => 0.05,
            Severity::Warning => 0.1,
            Severity::Critical => 0.3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaMetric {
    RttP95,
    RttP99,
    RttMax,
    RttMean,
    JitterP99,
    LossRate,
    BurstLoss,
    Goodput,
    Throughput,
    Bandwidth,
    Cwnd,
    AckDelay,
    AckFrequency,
    FecRedundancy,
    FecRecovery,
    Retransmits,
    StreamResets,
    ConnectionDrops,
    Uptime,
}

impl SlaMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaMetric::RttP95 => "rtt_p95",
            SlaMetric::RttP99 => "rtt_p99",
            SlaMetric::RttMax => "rtt_max",
            SlaMetric::RttMean => "rtt_mean",
            SlaMetric::JitterP99 => "jitter_p99",
            SlaMetric::LossRate => "loss_rate",
            SlaMetric::BurstLoss => "burst_loss",
            SlaMetric::Goodput => "goodput",
            SlaMetric::Throughput => "throughput",
            SlaMetric::Bandwidth => "bandwidth",
            SlaMetric::Cwnd => "cwnd",
            SlaMetric::AckDelay => "ack_delay",
            SlaMetric::AckFrequency => "ack_frequency",
            SlaMetric::FecRedundancy => "fec_redundancy",
            SlaMetric::FecRecovery => "fec_recovery",
            SlaMetric::Retransmits => "retransmits",
            SlaMetric::StreamResets => "stream_resets",
            SlaMetric::ConnectionDrops => "connection_drops",
            SlaMetric::Uptime => "uptime",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SlaMetric::RttP95 => "95th percentile RTT",
            SlaMetric::RttP99 => "99th percentile RTT",
            SlaMetric::RttMax => "Maximum RTT",
            SlaMetric::RttMean => "Mean RTT",
            SlaMetric::JitterP99 => "99th percentile jitter",
            SlaMetric::LossRate => "Loss rate",
            SlaMetric::BurstLoss => "Burst loss",
            SlaMetric::Goodput => "Goodput",
            SlaMetric::Throughput => "Throughput",
            SlaMetric::Bandwidth => "Bandwidth",
            SlaMetric::Cwnd => "CWND",
            SlaMetric::AckDelay => "ACK delay",
            SlaMetric::AckFrequency => "ACK frequency",
            SlaMetric::FecRedundancy => "FEC redundancy",
            SlaMetric::FecRecovery => "FEC recovery rate",
            SlaMetric::Retransmits => "Retransmits",
            SlaMetric::StreamResets => "Stream resets",
            SlaMetric::ConnectionDrops => "Connection drops",
            SlaMetric::Uptime => "Uptime",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            SlaMetric::RttP95
            | SlaMetric::RttP99
            | SlaMetric::RttMax
            | SlaMetric::RttMean
            | SlaMetric::JitterP99
            | SlaMetric::AckDelay => "ms",
            SlaMetric::LossRate | SlaMetric::BurstLoss | SlaMetric::Uptime => "%",
            SlaMetric::Goodput | SlaMetric::Throughput => " Mbps",
            SlaMetric::Bandwidth => " bps",
            SlaMetric::Cwnd => " bytes",
            _ => "",
        }
    }

    fn render(&self, v: f64) -> String {
        match self {
            SlaMetric::Bandwidth => format!("{v:.0}{}", self.unit()),
            SlaMetric::Cwnd
            | SlaMetric::AckFrequency
            | SlaMetric::Retransmits
            | SlaMetric::StreamResets
            | SlaMetric::ConnectionDrops => format!("{v:.0}{}", self.unit()),
            SlaMetric::FecRedundancy | SlaMetric::FecRecovery => format!("{:.2}%", v * 100.0),
            _ => format!("{v:.2}{}", self.unit()),
        }
    }
}

impl fmt::Display for SlaMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub metric: SlaMetric,
    pub expected: f64,
    /// `None` when the metric was not reported.
    pub actual: Option<f64>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub warning_checks: usize,
    pub critical_checks: usize,
    pub unreported_checks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaResult {
    pub gates: String,
    pub passed: bool,
    pub score: f64,
    pub exit_code: i32,
    pub violations: Vec<SlaViolation>,
    pub checks: CheckSummary,
    pub metrics: SlaMetrics,
    pub summary: String,
}

impl SlaResult {
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn detailed_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SLA Validation Report ({})", self.gates);
        let _ = writeln!(out, "====================");
        let _ = writeln!(out, "Result: {}", self.summary);
        let _ = writeln!(out, "Score: {:.2}/1.0", self.score);
        let _ = writeln!(
            out,
            "Checks: {} total, {} passed, {} warning, {} critical, {} unreported",
            self.checks.total_checks,
            self.checks.passed_checks,
            self.checks.warning_checks,
            self.checks.critical_checks,
            self.checks.unreported_checks
        );
        out.push('\n');

        if self.violations.is_empty() {
            out.push_str("No violations found, all metrics within SLA limits\n");
            return out;
        }

        out.push_str("Violations:\n-----------\n");
        for (i, v) in self.violations.iter().enumerate() {
            let _ = writeln!(out, "{}. [{}] {}", i + 1, v.severity, v.metric);
            let actual = v
                .actual
                .map_or_else(|| "not reported".to_string(), |a| format!("{a:.2}"));
            let _ = writeln!(out, "   Expected: {:.2}, Actual: {}", v.expected, actual);
            let _ = writeln!(out, "   {}\n", v.message);
        }
        out
    }
}

/// 2 if any critical violation, else 1 if any warning, else 0.
pub fn exit_code(violations: &[SlaViolation]) -> i32 {
    match violations.iter().map(|v| v.severity).max() {
        Some(Severity::Critical) => 2,
        Some(Severity::Warning) => 1,
        _ => 0,
    }
}

/// `clamp(1 - 0.3·critical - 0.1·warning - 0.05·info, 0, 1)`.
pub fn score(violations: &[SlaViolation]) -> f64 {
    let penalty: f64 = violations.iter().map(|v| v.severity.penalty()).sum();
    (1.0 - penalty).clamp(0.0, 1.0)
}

fn active(limit: Option<f64>) -> Option<f64> {
    limit.filter(|l| l.is_finite() && *l > 0.0)
}

#[derive(Default)]
struct Checks {
    violations: Vec<SlaViolation>,
    summary: CheckSummary,
}

impl Checks {
    fn unreported(&mut self, metric: SlaMetric, limit: f64) {
        self.summary.total_checks += 1;
        self.summary.unreported_checks += 1;
        self.violations.push(SlaViolation {
            metric,
            expected: limit,
            actual: None,
            severity: Severity::Info,
            message: format!("{} not reported, limit {}", metric.label(), metric.render(limit)),
        });
    }

    fn record(&mut self, metric: SlaMetric, limit: f64, actual: f64, severity: Severity, message: String) {
        match severity {
            Severity::Critical => self.summary.critical_checks += 1,
            Severity::Warning => self.summary.warning_checks += 1,
            Severity::Info => self.summary.unreported_checks += 1,
        }
        self.violations.push(SlaViolation {
            metric,
            expected: limit,
            actual: Some(actual),
            severity,
            message,
        });
    }

    fn at_most(&mut self, metric: SlaMetric, limit: Option<f64>, actual: Option<f64>, severity: Severity) {
        let Some(limit) = active(limit) else { return };
        let Some(actual) = actual else {
            return self.unreported(metric, limit);
        };
        self.summary.total_checks += 1;
        if actual > limit {
            let message = format!(
                "{} {} exceeds limit {}",
                metric.label(),
                metric.render(actual),
                metric.render(limit)
            );
            self.record(metric, limit, actual, severity, message);
        } else {
            self.summary.passed_checks += 1;
        }
    }

    fn at_least(&mut self, metric: SlaMetric, limit: Option<f64>, actual: Option<f64>, severity: Severity) {
        let Some(limit) = active(limit) else { return };
        let Some(actual) = actual else {
            return self.unreported(metric, limit);
        };
        self.summary.total_checks += 1;
        if actual < limit {
            let message = format!(
                "{} {} below minimum {}",
                metric.label(),
                metric.render(actual),
                metric.render(limit)
            );
            self.record(metric, limit, actual, severity, message);
        } else {
            self.summary.passed_checks += 1;
        }
    }

    /// Lower and upper bound on one metric; a single check either way.
    fn bounds(
        &mut self,
        metric: SlaMetric,
        min: Option<f64>,
        max: Option<f64>,
        actual: Option<f64>,
        severity: Severity,
    ) {
        let (min, max) = (active(min), active(max));
        let Some(first) = min.or(max) else { return };
        let Some(actual) = actual else {
            return self.unreported(metric, first);
        };
        if let Some(lo) = min.filter(|lo| actual < *lo) {
            return self.at_least(metric, Some(lo), Some(actual), severity);
        }
        if max.is_some() {
            return self.at_most(metric, max, Some(actual), severity);
        }
        self.summary.total_checks += 1;
        self.summary.passed_checks += 1;
    }

    /// Soft limit is a warning, hard limit a critical. One check either way.
    fn loss(&mut self, soft: Option<f64>, hard: Option<f64>, actual: Option<f64>) {
        let (soft, hard) = (active(soft), active(hard));
        let Some(tightest) = soft.or(hard) else { return };
        let Some(actual) = actual else {
            return self.unreported(SlaMetric::LossRate, tightest);
        };
        self.summary.total_checks += 1;
        let m = SlaMetric::LossRate;
        match (soft, hard) {
            (_, Some(h)) if actual > h => {
                let message = format!(
                    "{} {} exceeds hard limit {}",
                    m.label(),
                    m.render(actual),
                    m.render(h)
                );
                self.record(m, h, actual, Severity::Critical, message);
            }
            (Some(s), _) if actual > s => {
                let message =
                    format!("{} {} exceeds limit {}", m.label(), m.render(actual), m.render(s));
                self.record(m, s, actual, Severity::Warning, message);
            }
            _ => self.summary.passed_checks += 1,
        }
    }
}

/// Evaluates metrics against one immutable gate set.
#[derive(Debug, Clone)]
pub struct SlaValidator {
    gates: Arc<SlaGateSet>,
}

impl SlaValidator {
    pub fn new(gates: Arc<SlaGateSet>) -> Self {
        Self { gates }
    }

    pub fn gates(&self) -> &SlaGateSet {
        &self.gates
    }

    /// Pure: the same metrics always produce the same result.
    pub fn validate(&self, m: &SlaMetrics) -> SlaResult {
        use Severity::{Critical, Warning};
        let g = &*self.gates;
        let int = |v: Option<u64>| v.map(|v| v as f64);
        let mut c = Checks::default();

        c.at_most(SlaMetric::RttP95, g.max_rtt_p95_ms, m.rtt_p95_ms, Critical);
        c.at_most(SlaMetric::RttP99, g.max_rtt_p99_ms, m.rtt_p99_ms, Critical);
        c.at_most(SlaMetric::RttMax, g.max_rtt_ms, m.rtt_max_ms, Critical);
        c.at_most(SlaMetric::RttMean, g.max_rtt_mean_ms, m.rtt_mean_ms, Warning);
        c.at_most(SlaMetric::JitterP99, g.max_jitter_p99_ms, m.jitter_p99_ms, Warning);

        c.loss(g.max_loss_percent, g.max_loss_hard_percent, m.loss_rate_percent);
        c.at_most(SlaMetric::BurstLoss, g.max_burst_loss_percent, m.burst_loss_percent, Warning);

        c.at_least(SlaMetric::Goodput, g.min_goodput_mbps, m.goodput_mbps, Critical);
        c.at_least(SlaMetric::Throughput, g.min_throughput_mbps, m.throughput_mbps, Warning);
        c.at_least(SlaMetric::Bandwidth, g.min_bandwidth_bps, m.bandwidth_bps, Critical);

        c.bounds(
            SlaMetric::Cwnd,
            int(g.min_cwnd_bytes),
            int(g.max_cwnd_bytes),
            int(m.cwnd_bytes),
            Warning,
        );

        c.at_most(SlaMetric::AckDelay, g.max_ack_delay_ms, m.ack_delay_ms, Warning);
        c.at_least(
            SlaMetric::AckFrequency,
            g.min_ack_frequency.map(f64::from),
            m.ack_frequency.map(f64::from),
            Warning,
        );

        c.at_most(SlaMetric::FecRedundancy, g.max_fec_redundancy, m.fec_redundancy, Warning);
        c.at_least(SlaMetric::FecRecovery, g.min_fec_recovery_rate, m.fec_recovery_rate, Warning);

        c.at_most(SlaMetric::Retransmits, int(g.max_retransmits), int(m.retransmits), Warning);
        c.at_most(SlaMetric::StreamResets, int(g.max_stream_resets), int(m.stream_resets), Warning);
        c.at_most(
            SlaMetric::ConnectionDrops,
            int(g.max_connection_drops),
            int(m.connection_drops),
            Critical,
        );
        c.at_least(SlaMetric::Uptime, g.min_uptime_percent, m.uptime_percent, Critical);

        let Checks {
            violations,
            summary: checks,
        } = c;

        let score = score(&violations);
        let exit_code = exit_code(&violations);
        let passed = !violations.iter().any(|v| v.severity == Critical);

        let count = |s: Severity| violations.iter().filter(|v| v.severity == s).count();
        let summary = format!(
            "SLA {} (score {:.2}): {} critical, {} warning, {} info",
            if passed { "PASSED" } else { "FAILED" },
            score,
            count(Critical),
            count(Warning),
            count(Severity::Info)
        );

        tracing::debug!(
            gates = %g.name,
            score,
            exit_code,
            violations = violations.len(),
            "SLA evaluated"
        );

        SlaResult {
            gates: g.name.clone(),
            passed,
            score,
            exit_code,
            violations,
            checks,
            metrics: m.clone(),
            summary,
        }
    }
}
