use crate::matrix::TestScenario;
use chrono::{DateTime, Utc};
use quicperf_sla::{ScenarioMetrics, SlaResult};
use serde::{Deserialize, Serialize};

/// Measured (or, where flagged in `estimated_fields`, estimated) figures for
/// one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasuredMetrics {
    pub goodput_mbps: f64,
    pub throughput_mbps: f64,
    pub latency_min_ms: f64,
    pub latency_mean_ms: f64,
    pub latency_max_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub jitter_ms: Option<f64>,
    pub loss_rate_percent: f64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub packets_received: u64,
    pub bandwidth_bps: f64,
    pub cwnd_bytes: u64,
    pub pacing_rate_bps: f64,
    pub ack_delay_ms: f64,
    pub ack_frequency: u32,
    pub fec_redundancy: f64,
    pub fec_recovery_rate: f64,
    pub fairness_index: Option<f64>,
}

const EST_CWND_BYTES: u64 = 1460 * 20;
const EST_ACK_DELAY_MS: f64 = 25.0;
const EST_ACK_FREQUENCY: u32 = 2;
const EST_FEC_REDUNDANCY: f64 = 0.1;
const EST_FEC_RECOVERY: f64 = 0.9;

/// Builds the measured record from what the client reported, filling gaps
/// with scenario-derived estimates. Returns the names of estimated fields.
pub fn measure(
    scenario: &TestScenario,
    reported: Option<&ScenarioMetrics>,
) -> (MeasuredMetrics, Vec<String>) {
    let empty = ScenarioMetrics::default();
    let r = reported.unwrap_or(&empty);
    let mut estimated = Vec::new();

    let mut pick = |name: &str, value: Option<f64>, fallback: f64| -> f64 {
        value.unwrap_or_else(|| {
            estimated.push(name.to_string());
            fallback
        })
    };

    let rtt = scenario.rtt_ms as f64;
    let offered_mbps = scenario.packet_rate as f64
        * scenario.connections as f64
        * scenario.packet_size as f64
        * 8.0
        / 1e6;
    let summary = r.latency_summary();
    let from = |f: fn(&quicperf_sla::stats::LatencySummary) -> f64| summary.as_ref().map(f);

    let goodput = pick("goodput_mbps", r.goodput_mbps, offered_mbps);
    let throughput = pick("throughput_mbps", r.throughput_mbps, goodput * 1.1);
    let latency_mean = pick(
        "latency_mean_ms",
        from(|s| s.mean).or(r.latency_mean_ms),
        rtt + 1.0,
    );
    let latency_min = pick("latency_min_ms", from(|s| s.min).or(r.latency_min_ms), rtt * 0.8);
    let latency_max = pick("latency_max_ms", from(|s| s.max).or(r.latency_max_ms), rtt * 1.5);
    let latency_p95 = pick(
        "latency_p95_ms",
        from(|s| s.percentiles.p95).or(r.latency_p95_ms),
        rtt * 1.2,
    );
    let latency_p99 = pick(
        "latency_p99_ms",
        from(|s| s.percentiles.p99).or(r.latency_p99_ms),
        rtt * 1.4,
    );
    let loss = pick("loss_rate_percent", r.loss_rate(), scenario.loss_rate_percent);
    let bandwidth = pick("bandwidth_bps", r.bandwidth_bps, throughput * 1e6);
    let pacing = pick("pacing_rate_bps", r.pacing_rate_bps, bandwidth);
    let ack_delay = pick("ack_delay_ms", r.ack_delay_ms, EST_ACK_DELAY_MS);
    let fec_redundancy = pick("fec_redundancy", r.fec_redundancy, EST_FEC_REDUNDANCY);
    let fec_recovery = pick("fec_recovery_rate", r.fec_recovery_rate, EST_FEC_RECOVERY);

    let packets_sent = r.packets_sent.unwrap_or_else(|| {
        estimated.push("packets_sent".into());
        scenario.packet_rate as u64 * scenario.connections as u64 * scenario.duration_secs
    });
    let packets_lost = r.packets_lost.unwrap_or_else(|| {
        estimated.push("packets_lost".into());
        (packets_sent as f64 * loss / 100.0).round() as u64
    });
    let packets_received = r.packets_received.unwrap_or_else(|| {
        estimated.push("packets_received".into());
        packets_sent.saturating_sub(packets_lost)
    });
    let cwnd_bytes = r.cwnd_bytes.unwrap_or_else(|| {
        estimated.push("cwnd_bytes".into());
        EST_CWND_BYTES
    });
    let ack_frequency = r.ack_frequency.unwrap_or_else(|| {
        estimated.push("ack_frequency".into());
        EST_ACK_FREQUENCY
    });

    let metrics = MeasuredMetrics {
        goodput_mbps: goodput,
        throughput_mbps: throughput,
        latency_min_ms: latency_min,
        latency_mean_ms: latency_mean,
        latency_max_ms: latency_max,
        latency_p95_ms: latency_p95,
        latency_p99_ms: latency_p99,
        jitter_ms: summary.as_ref().map(|s| s.jitter),
        loss_rate_percent: loss,
        packets_sent,
        packets_lost,
        packets_received,
        bandwidth_bps: bandwidth,
        cwnd_bytes,
        pacing_rate_bps: pacing,
        ack_delay_ms: ack_delay,
        ack_frequency,
        fec_redundancy,
        fec_recovery_rate: fec_recovery,
        fairness_index: r.fairness_index(),
    };
    (metrics, estimated)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub metrics: MeasuredMetrics,
    pub estimated_fields: Vec<String>,
    /// SLA passed and nothing went wrong while running.
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sla: SlaResult,
}

impl ScenarioResult {
    pub fn has_runtime_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
