use crate::stats::{self, LatencySummary};
use serde::{Deserialize, Serialize};

/// What the protocol client persisted for one scenario (`metrics.json`).
///
/// Every field is optional. `None` means the client did not report it,
/// which is different from a measured zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioMetrics {
    pub goodput_mbps: Option<f64>,
    pub throughput_mbps: Option<f64>,
    /// Raw RTT samples in arrival order.
    pub rtt_samples_ms: Vec<f64>,
    pub latency_min_ms: Option<f64>,
    pub latency_mean_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub loss_rate_percent: Option<f64>,
    pub burst_loss_percent: Option<f64>,
    pub packets_sent: Option<u64>,
    pub packets_lost: Option<u64>,
    pub packets_received: Option<u64>,
    pub bandwidth_bps: Option<f64>,
    pub cwnd_bytes: Option<u64>,
    pub pacing_rate_bps: Option<f64>,
    pub ack_delay_ms: Option<f64>,
    pub ack_frequency: Option<u32>,
    pub fec_redundancy: Option<f64>,
    pub fec_recovery_rate: Option<f64>,
    pub retransmits: Option<u64>,
    pub stream_resets: Option<u64>,
    pub connection_drops: Option<u64>,
    pub uptime_percent: Option<f64>,
    /// Per-flow throughput, used for the fairness index.
    pub flow_throughput_mbps: Vec<f64>,
}

impl ScenarioMetrics {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn latency_summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_samples(&self.rtt_samples_ms)
    }

    /// Reported loss, else derived from packet counters.
    pub fn loss_rate(&self) -> Option<f64> {
        if self.loss_rate_percent.is_some() {
            return self.loss_rate_percent;
        }
        match (self.packets_sent, self.packets_lost) {
            (Some(sent), Some(lost)) if sent > 0 => Some(lost as f64 / sent as f64 * 100.0),
            _ => None,
        }
    }

    pub fn fairness_index(&self) -> Option<f64> {
        (!self.flow_throughput_mbps.is_empty())
            .then(|| stats::jain_fairness_index(&self.flow_throughput_mbps))
    }

    /// Collapses the record into validator input. Statistics computed from
    /// raw samples take precedence over the client's own aggregates.
    pub fn to_sla_metrics(&self) -> SlaMetrics {
        let summary = self.latency_summary();
        let from_samples = |f: fn(&LatencySummary) -> f64| summary.as_ref().map(f);

        SlaMetrics {
            rtt_p95_ms: from_samples(|s| s.percentiles.p95).or(self.latency_p95_ms),
            rtt_p99_ms: from_samples(|s| s.percentiles.p99).or(self.latency_p99_ms),
            rtt_max_ms: from_samples(|s| s.max).or(self.latency_max_ms),
            rtt_mean_ms: from_samples(|s| s.mean).or(self.latency_mean_ms),
            jitter_p99_ms: summary.as_ref().filter(|s| s.count > 1).map(|s| s.jitter_p99),
            loss_rate_percent: self.loss_rate(),
            burst_loss_percent: self.burst_loss_percent,
            goodput_mbps: self.goodput_mbps,
            throughput_mbps: self.throughput_mbps,
            bandwidth_bps: self.bandwidth_bps,
            cwnd_bytes: self.cwnd_bytes,
            ack_delay_ms: self.ack_delay_ms,
            ack_frequency: self.ack_frequency,
            fec_redundancy: self.fec_redundancy,
            fec_recovery_rate: self.fec_recovery_rate,
            retransmits: self.retransmits,
            stream_resets: self.stream_resets,
            connection_drops: self.connection_drops,
            uptime_percent: self.uptime_percent,
        }
    }
}

/// Flat validator input. Fields left `None` are reported as unmeasured
/// wherever a gate is configured for them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaMetrics {
    pub rtt_p95_ms: Option<f64>,
    pub rtt_p99_ms: Option<f64>,
    pub rtt_max_ms: Option<f64>,
    pub rtt_mean_ms: Option<f64>,
    pub jitter_p99_ms: Option<f64>,
    pub loss_rate_percent: Option<f64>,
    pub burst_loss_percent: Option<f64>,
    pub goodput_mbps: Option<f64>,
    pub throughput_mbps: Option<f64>,
    pub bandwidth_bps: Option<f64>,
    pub cwnd_bytes: Option<u64>,
    pub ack_delay_ms: Option<f64>,
    pub ack_frequency: Option<u32>,
    /// Fraction in `[0, 1]`.
    pub fec_redundancy: Option<f64>,
    /// Fraction in `[0, 1]`.
    pub fec_recovery_rate: Option<f64>,
    pub retransmits: Option<u64>,
    pub stream_resets: Option<u64>,
    pub connection_drops: Option<u64>,
    pub uptime_percent: Option<f64>,
}
