//! Cartesian test matrix over load and network dimensions.

use crate::error::HarnessError;
use quicperf_sim::NetworkCondition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One fully-specified run of the protocol pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    pub id: String,
    pub index: usize,
    pub packet_rate: u32,
    pub connections: u32,
    pub loss_rate_percent: f64,
    pub rtt_ms: u64,
    pub packet_size: u32,
    pub duration_secs: u64,
    pub streams_per_connection: u32,
    pub expected_goodput_mbps: f64,
    pub expected_latency_ms: f64,
    pub expected_loss_rate_percent: f64,
    pub description: String,
}

impl TestScenario {
    pub fn rtt(&self) -> Duration {
        Duration::from_millis(self.rtt_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Impairment applied while this scenario runs: half the RTT as
    /// one-way delay plus the scenario's loss rate.
    pub fn network_condition(&self) -> NetworkCondition {
        NetworkCondition {
            latency: self.rtt() / 2,
            loss_rate: self.loss_rate_percent / 100.0,
            ..NetworkCondition::CLEAR
        }
    }
}

/// Goodput degradation by path RTT.
pub fn rtt_factor(rtt_ms: u64) -> f64 {
    match rtt_ms {
        0..=50 => 1.0,
        51..=100 => 0.8,
        _ => 0.6,
    }
}

pub fn expected_goodput_mbps(
    packet_rate: u32,
    connections: u32,
    packet_size: u32,
    loss_rate_percent: f64,
    rtt_ms: u64,
) -> f64 {
    let offered = packet_rate as f64 * connections as f64 * packet_size as f64 * 8.0 / 1e6;
    offered * (1.0 - loss_rate_percent / 100.0) * rtt_factor(rtt_ms)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestMatrix {
    pub packet_rates: Vec<u32>,
    pub connection_counts: Vec<u32>,
    pub loss_rates_percent: Vec<f64>,
    pub rtts: Vec<Duration>,
    pub packet_size: u32,
    pub duration: Duration,
    pub streams_per_connection: u32,
    pub warmup: Duration,
    pub cooldown: Duration,
    pub iterations: u32,
}

impl Default for TestMatrix {
    fn default() -> Self {
        MatrixPreset::Default.matrix()
    }
}

impl TestMatrix {
    pub fn total_scenarios(&self) -> usize {
        self.packet_rates.len()
            * self.connection_counts.len()
            * self.loss_rates_percent.len()
            * self.rtts.len()
    }

    /// Wall-clock estimate: `count × (duration + warmup + cooldown) × iterations`.
    /// Saturates at `Duration::MAX`.
    pub fn estimated_duration(&self) -> Duration {
        let per = self
            .duration
            .saturating_add(self.warmup)
            .saturating_add(self.cooldown);
        let runs = (self.total_scenarios() as u64).saturating_mul(u64::from(self.iterations));
        if per.is_zero() || runs == 0 {
            return Duration::ZERO;
        }
        u32::try_from(runs)
            .ok()
            .and_then(|runs| per.checked_mul(runs))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let dims = [
            ("packet_rates", self.packet_rates.is_empty()),
            ("connection_counts", self.connection_counts.is_empty()),
            ("loss_rates_percent", self.loss_rates_percent.is_empty()),
            ("rtts", self.rtts.is_empty()),
        ];
        if let Some(&(name, _)) = dims.iter().find(|(_, empty)| *empty) {
            return Err(HarnessError::EmptyDimension(name));
        }
        if self.packet_size == 0 {
            return Err(HarnessError::InvalidMatrix("packet_size must be positive".into()));
        }
        if self.duration.is_zero() {
            return Err(HarnessError::InvalidMatrix("duration must be positive".into()));
        }
        if let Some(bad) = self
            .loss_rates_percent
            .iter()
            .find(|l| !(0.0..=100.0).contains(*l))
        {
            return Err(HarnessError::InvalidMatrix(format!(
                "loss rate {bad}% outside [0, 100]"
            )));
        }
        Ok(())
    }

    /// Packet rate outermost, RTT innermost. Ids are `test_001`, `test_002`,
    /// ... in that order, so the same matrix always yields the same list.
    pub fn generate_scenarios(&self) -> Vec<TestScenario> {
        let mut out = Vec::with_capacity(self.total_scenarios());
        for &rate in &self.packet_rates {
            for &conns in &self.connection_counts {
                for &loss in &self.loss_rates_percent {
                    for rtt in &self.rtts {
                        let index = out.len();
                        let rtt_ms = rtt.as_millis() as u64;
                        out.push(TestScenario {
                            id: format!("test_{:03}", index + 1),
                            index,
                            packet_rate: rate,
                            connections: conns,
                            loss_rate_percent: loss,
                            rtt_ms,
                            packet_size: self.packet_size,
                            duration_secs: self.duration.as_secs(),
                            streams_per_connection: self.streams_per_connection,
                            expected_goodput_mbps: expected_goodput_mbps(
                                rate,
                                conns,
                                self.packet_size,
                                loss,
                                rtt_ms,
                            ),
                            expected_latency_ms: rtt_ms as f64 + 1.0,
                            expected_loss_rate_percent: loss,
                            description: format!(
                                "{rate} pps x {conns} conn, {loss}% loss, {rtt_ms}ms RTT"
                            ),
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixPreset {
    Default,
    Light,
    Heavy,
}

fn ms(v: &[u64]) -> Vec<Duration> {
    v.iter().copied().map(Duration::from_millis).collect()
}

impl MatrixPreset {
    pub const ALL: [MatrixPreset; 3] = [MatrixPreset::Default, MatrixPreset::Light, MatrixPreset::Heavy];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixPreset::Default => "default",
            MatrixPreset::Light => "light",
            MatrixPreset::Heavy => "heavy",
        }
    }

    pub fn matrix(&self) -> TestMatrix {
        match self {
            MatrixPreset::Default => TestMatrix {
                packet_rates: vec![100, 300, 600, 1000],
                connection_counts: vec![1, 2, 4, 8],
                loss_rates_percent: vec![0.0, 1.0, 3.0, 5.0],
                rtts: ms(&[5, 30, 100]),
                packet_size: 1200,
                duration: Duration::from_secs(30),
                streams_per_connection: 1,
                warmup: Duration::from_secs(5),
                cooldown: Duration::from_secs(2),
                iterations: 3,
            },
            MatrixPreset::Light => TestMatrix {
                packet_rates: vec![100, 300],
                connection_counts: vec![1, 2],
                loss_rates_percent: vec![0.0, 1.0],
                rtts: ms(&[5, 30]),
                packet_size: 1200,
                duration: Duration::from_secs(10),
                streams_per_connection: 1,
                warmup: Duration::from_secs(2),
                cooldown: Duration::from_secs(1),
                iterations: 1,
            },
            MatrixPreset::Heavy => TestMatrix {
                packet_rates: vec![100, 300, 600, 1000, 2000],
                connection_counts: vec![1, 2, 4, 8, 16],
                loss_rates_percent: vec![0.0, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0],
                rtts: ms(&[1, 5, 30, 100, 200]),
                packet_size: 1200,
                duration: Duration::from_secs(60),
                streams_per_connection: 4,
                warmup: Duration::from_secs(10),
                cooldown: Duration::from_secs(5),
                iterations: 5,
            },
        }
    }
}

impl fmt::Display for MatrixPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatrixPreset {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatrixPreset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarnessError::UnknownMatrixPreset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_matrix_is_complete() {
        let m = TestMatrix::default();
        let s = m.generate_scenarios();
        assert_eq!(m.total_scenarios(), 4 * 4 * 4 * 3);
        assert_eq!(s.len(), 192);
        let ids: HashSet<_> = s.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), s.len());
        assert_eq!(s[0].id, "test_001");
        assert_eq!(s[191].id, "test_192");
    }

    #[test]
    fn nesting_order_rate_outermost_rtt_innermost() {
        let s = MatrixPreset::Light.matrix().generate_scenarios();
        assert_eq!(s.len(), 16);
        assert_eq!((s[0].packet_rate, s[0].rtt_ms), (100, 5));
        assert_eq!((s[1].packet_rate, s[1].rtt_ms), (100, 30));
        assert_eq!(s[2].loss_rate_percent, 1.0);
        assert_eq!(s[4].connections, 2);
        assert_eq!(s[8].packet_rate, 300);
    }

    #[test]
    fn generation_is_reproducible() {
        let m = MatrixPreset::Heavy.matrix();
        assert_eq!(m.generate_scenarios(), m.generate_scenarios());
    }

    #[test]
    fn expectations_for_light_first_scenario() {
        let m = TestMatrix {
            packet_rates: vec![100],
            connection_counts: vec![2],
            loss_rates_percent: vec![0.0],
            rtts: ms(&[5]),
            ..MatrixPreset::Light.matrix()
        };
        let s = &m.generate_scenarios()[0];
        assert!((s.expected_goodput_mbps - 1.92).abs() < 1e-9);
        assert_eq!(s.expected_latency_ms, 6.0);
    }

    #[test]
    fn rtt_factor_boundaries() {
        assert_eq!(rtt_factor(50), 1.0);
        assert_eq!(rtt_factor(51), 0.8);
        assert_eq!(rtt_factor(100), 0.8);
        assert_eq!(rtt_factor(101), 0.6);
        let g = expected_goodput_mbps(1000, 1, 1000, 10.0, 200);
        assert!((g - 8.0 * 0.9 * 0.6).abs() < 1e-9);
    }

    #[test]
    fn estimated_duration_formula() {
        let m = TestMatrix::default();
        let expected = Duration::from_secs(192 * (30 + 5 + 2) * 3);
        assert_eq!(m.estimated_duration(), expected);
        let light = MatrixPreset::Light.matrix();
        assert_eq!(light.estimated_duration(), Duration::from_secs(16 * 13));
    }

    #[test]
    fn estimated_duration_saturates() {
        let many_iterations = TestMatrix {
            iterations: u32::MAX,
            ..TestMatrix::default()
        };
        assert_eq!(many_iterations.estimated_duration(), Duration::MAX);

        let long_runs = TestMatrix {
            duration: Duration::MAX,
            ..MatrixPreset::Light.matrix()
        };
        assert_eq!(long_runs.estimated_duration(), Duration::MAX);

        let none = TestMatrix {
            iterations: 0,
            ..TestMatrix::default()
        };
        assert_eq!(none.estimated_duration(), Duration::ZERO);
    }

    #[test]
    fn empty_dimension_yields_nothing_and_fails_validation() {
        let m = TestMatrix {
            connection_counts: vec![],
            ..TestMatrix::default()
        };
        assert!(m.generate_scenarios().is_empty());
        assert_eq!(m.total_scenarios(), 0);
        assert!(matches!(
            m.validate(),
            Err(HarnessError::EmptyDimension("connection_counts"))
        ));
        assert!(TestMatrix::default().validate().is_ok());
    }

    #[test]
    fn scenario_condition_uses_half_rtt() {
        let s = &MatrixPreset::Light.matrix().generate_scenarios()[3];
        let c = s.network_condition();
        assert_eq!(c.latency, Duration::from_millis(15));
        assert!((c.loss_rate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn parse_preset() {
        assert_eq!("heavy".parse::<MatrixPreset>().unwrap(), MatrixPreset::Heavy);
        assert!("huge".parse::<MatrixPreset>().is_err());
    }
}
