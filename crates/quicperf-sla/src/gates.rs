//! SLA threshold tables and the built-in profiles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const GATES_VERSION: &str = "1.0";

/// Named, versioned set of optional thresholds.
///
/// A threshold is active only when it is set and positive; everything else
/// is skipped by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaGateSet {
    pub name: String,
    pub version: String,

    pub max_rtt_p95_ms: Option<f64>,
    pub max_rtt_p99_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub max_rtt_mean_ms: Option<f64>,
    pub max_jitter_p99_ms: Option<f64>,

    /// Soft loss limit (warning).
    pub max_loss_percent: Option<f64>,
    /// Hard loss limit (critical).
    pub max_loss_hard_percent: Option<f64>,
    pub max_burst_loss_percent: Option<f64>,

    pub min_goodput_mbps: Option<f64>,
    pub min_throughput_mbps: Option<f64>,
    pub min_bandwidth_bps: Option<f64>,

    pub min_cwnd_bytes: Option<u64>,
    pub max_cwnd_bytes: Option<u64>,

    pub max_ack_delay_ms: Option<f64>,
    pub min_ack_frequency: Option<u32>,

    pub max_fec_redundancy: Option<f64>,
    pub min_fec_recovery_rate: Option<f64>,

    pub max_retransmits: Option<u64>,
    pub max_stream_resets: Option<u64>,
    pub max_connection_drops: Option<u64>,
    pub min_uptime_percent: Option<f64>,
}

impl Default for SlaGateSet {
    fn default() -> Self {
        SlaProfile::Normal.gates()
    }
}

impl SlaGateSet {
    /// A set with no thresholds at all.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: GATES_VERSION.to_string(),
            max_rtt_p95_ms: None,
            max_rtt_p99_ms: None,
            max_rtt_ms: None,
            max_rtt_mean_ms: None,
            max_jitter_p99_ms: None,
            max_loss_percent: None,
            max_loss_hard_percent: None,
            max_burst_loss_percent: None,
            min_goodput_mbps: None,
            min_throughput_mbps: None,
            min_bandwidth_bps: None,
            min_cwnd_bytes: None,
            max_cwnd_bytes: None,
            max_ack_delay_ms: None,
            min_ack_frequency: None,
            max_fec_redundancy: None,
            min_fec_recovery_rate: None,
            max_retransmits: None,
            max_stream_resets: None,
            max_connection_drops: None,
            min_uptime_percent: None,
        }
    }

    pub fn with_overrides(mut self, overrides: &SlaOverrides) -> Self {
        if overrides.is_empty() {
            return self;
        }
        let o = overrides;
        if let Some(v) = o.p95_rtt_ms {
            self.max_rtt_p95_ms = Some(v);
        }
        if let Some(v) = o.max_rtt_ms {
            self.max_rtt_ms = Some(v);
        }
        if let Some(v) = o.mean_rtt_ms {
            self.max_rtt_mean_ms = Some(v);
        }
        if let Some(v) = o.loss_percent {
            self.max_loss_hard_percent = Some(v);
            self.max_loss_percent = Some(self.max_loss_percent.map_or(v, |soft| soft.min(v)));
        }
        if let Some(v) = o.goodput_mbps {
            self.min_goodput_mbps = Some(v);
        }
        if let Some(v) = o.throughput_mbps {
            self.min_throughput_mbps = Some(v);
        }
        if let Some(v) = o.bandwidth_bps {
            self.min_bandwidth_bps = Some(v);
        }
        if let Some(v) = o.ack_delay_ms {
            self.max_ack_delay_ms = Some(v);
        }
        self.name = format!("{}+overrides", self.name);
        self
    }
}

/// Built-in gate profiles, tightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaProfile {
    Strict,
    Normal,
    Lenient,
}

impl SlaProfile {
    pub const ALL: [SlaProfile; 3] = [SlaProfile::Strict, SlaProfile::Normal, SlaProfile::Lenient];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlaProfile::Strict => "strict",
            SlaProfile::Normal => "normal",
            SlaProfile::Lenient => "lenient",
        }
    }

    pub fn gates(&self) -> SlaGateSet {
        let base = SlaGateSet::empty(self.as_str());
        match self {
            SlaProfile::Strict => SlaGateSet {
                max_rtt_p95_ms: Some(50.0),
                max_rtt_p99_ms: Some(75.0),
                max_rtt_ms: Some(100.0),
                max_rtt_mean_ms: Some(25.0),
                max_loss_percent: Some(0.1),
                max_loss_hard_percent: Some(1.0),
                min_goodput_mbps: Some(50.0),
                min_throughput_mbps: Some(60.0),
                min_bandwidth_bps: Some(5_000_000.0),
                min_cwnd_bytes: Some(50_000),
                max_cwnd_bytes: Some(1_000_000),
                max_ack_delay_ms: Some(10.0),
                min_ack_frequency: Some(2),
                max_fec_redundancy: Some(0.1),
                min_fec_recovery_rate: Some(0.9),
                ..base
            },
            SlaProfile::Normal => SlaGateSet {
                max_rtt_p95_ms: Some(100.0),
                max_rtt_p99_ms: Some(150.0),
                max_rtt_ms: Some(200.0),
                max_rtt_mean_ms: Some(50.0),
                max_loss_percent: Some(1.0),
                max_loss_hard_percent: Some(5.0),
                min_goodput_mbps: Some(10.0),
                min_throughput_mbps: Some(15.0),
                min_bandwidth_bps: Some(1_000_000.0),
                min_cwnd_bytes: Some(10_000),
                max_cwnd_bytes: Some(1_000_000),
                max_ack_delay_ms: Some(25.0),
                min_ack_frequency: Some(1),
                max_fec_redundancy: Some(0.2),
                min_fec_recovery_rate: Some(0.8),
                ..base
            },
            SlaProfile::Lenient => SlaGateSet {
                max_rtt_p95_ms: Some(500.0),
                max_rtt_p99_ms: Some(750.0),
                max_rtt_ms: Some(1000.0),
                max_rtt_mean_ms: Some(200.0),
                max_loss_percent: Some(5.0),
                max_loss_hard_percent: Some(10.0),
                min_goodput_mbps: Some(1.0),
                min_throughput_mbps: Some(2.0),
                min_bandwidth_bps: Some(100_000.0),
                min_cwnd_bytes: Some(1_000),
                max_cwnd_bytes: Some(10_000_000),
                max_ack_delay_ms: Some(100.0),
                min_ack_frequency: Some(1),
                max_fec_redundancy: Some(0.5),
                min_fec_recovery_rate: Some(0.5),
                ..base
            },
        }
    }
}

impl fmt::Display for SlaProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown SLA profile '{0}' (expected strict, normal or lenient)")]
pub struct UnknownProfile(pub String);

impl FromStr for SlaProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(SlaProfile::Strict),
            "normal" => Ok(SlaProfile::Normal),
            "lenient" => Ok(SlaProfile::Lenient),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// User-supplied patches applied on top of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaOverrides {
    pub p95_rtt_ms: Option<f64>,
    /// Becomes the hard (critical) loss limit; the soft limit is lowered to
    /// match when it would otherwise exceed it.
    pub loss_percent: Option<f64>,
    pub goodput_mbps: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub mean_rtt_ms: Option<f64>,
    pub throughput_mbps: Option<f64>,
    pub bandwidth_bps: Option<f64>,
    pub ack_delay_ms: Option<f64>,
}

impl SlaOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fields set in `other` win.
    pub fn merged(&self, other: &SlaOverrides) -> SlaOverrides {
        SlaOverrides {
            p95_rtt_ms: other.p95_rtt_ms.or(self.p95_rtt_ms),
            loss_percent: other.loss_percent.or(self.loss_percent),
            goodput_mbps: other.goodput_mbps.or(self.goodput_mbps),
            max_rtt_ms: other.max_rtt_ms.or(self.max_rtt_ms),
            mean_rtt_ms: other.mean_rtt_ms.or(self.mean_rtt_ms),
            throughput_mbps: other.throughput_mbps.or(self.throughput_mbps),
            bandwidth_bps: other.bandwidth_bps.or(self.bandwidth_bps),
            ack_delay_ms: other.ack_delay_ms.or(self.ack_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper_bounds(g: &SlaGateSet) -> Vec<Option<f64>> {
        vec![
            g.max_rtt_p95_ms,
            g.max_rtt_p99_ms,
            g.max_rtt_ms,
            g.max_rtt_mean_ms,
            g.max_jitter_p99_ms,
            g.max_loss_percent,
            g.max_loss_hard_percent,
            g.max_burst_loss_percent,
            g.max_cwnd_bytes.map(|v| v as f64),
            g.max_ack_delay_ms,
            g.max_fec_redundancy,
            g.max_retransmits.map(|v| v as f64),
            g.max_stream_resets.map(|v| v as f64),
            g.max_connection_drops.map(|v| v as f64),
        ]
    }

    fn lower_bounds(g: &SlaGateSet) -> Vec<Option<f64>> {
        vec![
            g.min_goodput_mbps,
            g.min_throughput_mbps,
            g.min_bandwidth_bps,
            g.min_cwnd_bytes.map(|v| v as f64),
            g.min_ack_frequency.map(f64::from),
            g.min_fec_recovery_rate,
            g.min_uptime_percent,
        ]
    }

    #[test]
    fn profiles_are_monotonic() {
        let [s, n, l] = SlaProfile::ALL.map(|p| p.gates());
        for ((a, b), c) in upper_bounds(&s)
            .into_iter()
            .zip(upper_bounds(&n))
            .zip(upper_bounds(&l))
        {
            assert_eq!(a.is_some(), c.is_some());
            if let (Some(a), Some(b), Some(c)) = (a, b, c) {
                assert!(a <= b && b <= c, "upper bound {a} {b} {c}");
            }
        }
        for ((a, b), c) in lower_bounds(&s)
            .into_iter()
            .zip(lower_bounds(&n))
            .zip(lower_bounds(&l))
        {
            if let (Some(a), Some(b), Some(c)) = (a, b, c) {
                assert!(a >= b && b >= c, "lower bound {a} {b} {c}");
            }
        }
    }

    #[test]
    fn soft_loss_never_exceeds_hard() {
        for p in SlaProfile::ALL {
            let g = p.gates();
            assert!(g.max_loss_percent.unwrap() <= g.max_loss_hard_percent.unwrap());
        }
    }

    #[test]
    fn parse_profile() {
        assert_eq!("STRICT".parse::<SlaProfile>(), Ok(SlaProfile::Strict));
        assert!("tight".parse::<SlaProfile>().is_err());
    }

    #[test]
    fn overrides_patch_profile() {
        let g = SlaProfile::Normal.gates().with_overrides(&SlaOverrides {
            p95_rtt_ms: Some(80.0),
            loss_percent: Some(0.5),
            ..Default::default()
        });
        assert_eq!(g.max_rtt_p95_ms, Some(80.0));
        assert_eq!(g.max_loss_hard_percent, Some(0.5));
        assert_eq!(g.max_loss_percent, Some(0.5));
        assert_eq!(g.max_rtt_ms, Some(200.0));
        assert_eq!(g.name, "normal+overrides");
    }

    #[test]
    fn empty_overrides_keep_name() {
        let g = SlaProfile::Lenient
            .gates()
            .with_overrides(&SlaOverrides::default());
        assert_eq!(g, SlaProfile::Lenient.gates());
    }

    #[test]
    fn merged_prefers_other() {
        let base = SlaOverrides {
            goodput_mbps: Some(1.0),
            p95_rtt_ms: Some(10.0),
            ..Default::default()
        };
        let cli = SlaOverrides {
            goodput_mbps: Some(5.0),
            ..Default::default()
        };
        let m = base.merged(&cli);
        assert_eq!(m.goodput_mbps, Some(5.0));
        assert_eq!(m.p95_rtt_ms, Some(10.0));
    }
}
