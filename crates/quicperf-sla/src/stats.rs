//! Sample statistics over `f64` slices.
//!
//! Non-finite samples (NaN, ±inf) are dropped before any computation.

use serde::{Deserialize, Serialize};

fn sorted_finite(samples: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Nearest-rank percentile, `q` in `[0, 1]`. `None` for empty input.
pub fn percentile(samples: &[f64], q: f64) -> Option<f64> {
    let v = sorted_finite(samples);
    if v.is_empty() {
        return None;
    }
    Some(nearest_rank(&v, q))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
}

impl Percentiles {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let v = sorted_finite(samples);
        if v.is_empty() {
            return None;
        }
        Some(Self {
            p50: nearest_rank(&v, 0.50),
            p95: nearest_rank(&v, 0.95),
            p99: nearest_rank(&v, 0.99),
            p999: nearest_rank(&v, 0.999),
        })
    }
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    let mut n = 0usize;
    let mut sum = 0.0;
    for x in samples.iter().filter(|x| x.is_finite()) {
        n += 1;
        sum += x;
    }
    (n > 0).then(|| sum / n as f64)
}

/// Population standard deviation. `None` for empty input.
pub fn jitter(samples: &[f64]) -> Option<f64> {
    let m = mean(samples)?;
    let finite: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    let var = finite.iter().map(|x| (x - m).powi(2)).sum::<f64>() / finite.len() as f64;
    Some(var.sqrt())
}

/// Absolute differences between consecutive samples, in arrival order.
/// Fewer than two samples yields an empty vector.
pub fn interarrival_jitter(samples: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    finite.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}

/// Jain's fairness index `(Σx)² / (n·Σx²)` over per-flow throughputs.
///
/// 1.0 is perfectly fair, `1/n` maximally unfair. Negative values count as
/// zero; empty input or an all-zero allocation yields 0.
pub fn jain_fairness_index(throughputs: &[f64]) -> f64 {
    let v: Vec<f64> = throughputs
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| x.max(0.0))
        .collect();
    match v.len() {
        0 => return 0.0,
        1 => return 1.0,
        _ => {}
    }
    let sum: f64 = v.iter().sum();
    let sum_sq: f64 = v.iter().map(|x| x * x).sum();
    if sum_sq == 0.0 {
        return 0.0;
    }
    (sum * sum) / (v.len() as f64 * sum_sq)
}

/// Aggregate view of a latency sample set (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub percentiles: Percentiles,
    /// Standard deviation of the samples.
    pub jitter: f64,
    /// p99 of consecutive-sample deltas; 0 with fewer than two samples.
    pub jitter_p99: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let v = sorted_finite(samples);
        let (&min, &max) = (v.first()?, v.last()?);
        Some(Self {
            count: v.len(),
            min,
            max,
            mean: mean(&v)?,
            percentiles: Percentiles::from_samples(&v)?,
            jitter: jitter(&v)?,
            jitter_p99: percentile(&interarrival_jitter(samples), 0.99).unwrap_or(0.0),
        })
    }
}
