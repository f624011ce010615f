use std::path::{Path, PathBuf};
use std::time::Duration;

use quicperf_sla::{SlaGateSet, SlaOverrides, SlaProfile};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::matrix::{MatrixPreset, TestMatrix};
use crate::runner::{RunnerConfig, BINARY_ENV};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub version: u32,
    pub output_dir: Option<PathBuf>,
    pub matrix: MatrixInput,
    pub runner: RunnerInput,
    pub sla: SlaInput,
}

/// Starts from `preset` (default `default`); any list or scalar given
/// replaces the preset's value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatrixInput {
    pub preset: Option<String>,
    pub packet_rates: Option<Vec<u32>>,
    pub connection_counts: Option<Vec<u32>>,
    pub loss_rates_percent: Option<Vec<f64>>,
    pub rtts_ms: Option<Vec<u64>>,
    pub packet_size: Option<u32>,
    pub duration_secs: Option<u64>,
    pub streams_per_connection: Option<u32>,
    pub warmup_secs: Option<u64>,
    pub cooldown_secs: Option<u64>,
    pub iterations: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerInput {
    pub binary: Option<PathBuf>,
    pub server_addr: Option<String>,
    pub client_addr: Option<String>,
    pub congestion_control: Option<String>,
    pub ack_frequency: Option<u32>,
    pub fec: Option<bool>,
    pub fec_redundancy: Option<f64>,
    pub greasing: Option<bool>,
    pub verbose: Option<bool>,
    pub settle_ms: Option<u64>,
    pub client_grace_secs: Option<u64>,
    pub teardown_grace_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub emulate: Option<bool>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlaInput {
    pub profile: Option<String>,
    #[serde(flatten)]
    pub overrides: SlaOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub version: u32,
    pub output_dir: PathBuf,
    pub matrix: TestMatrix,
    pub runner: RunnerConfig,
    pub sla_profile: SlaProfile,
    pub sla_overrides: SlaOverrides,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let matrix = TestMatrix::default();
        Self {
            version: CONFIG_VERSION,
            output_dir: PathBuf::from("test-results"),
            runner: RunnerConfig {
                cooldown: matrix.cooldown,
                ..RunnerConfig::default()
            },
            matrix,
            sla_profile: SlaProfile::Normal,
            sla_overrides: SlaOverrides::default(),
        }
    }
}

impl MatrixInput {
    fn resolve(self) -> Result<TestMatrix, ConfigError> {
        let preset = match self.preset.as_deref() {
            Some(name) => name.parse::<MatrixPreset>()?,
            None => MatrixPreset::Default,
        };
        let base = preset.matrix();
        Ok(TestMatrix {
            packet_rates: self.packet_rates.unwrap_or(base.packet_rates),
            connection_counts: self.connection_counts.unwrap_or(base.connection_counts),
            loss_rates_percent: self.loss_rates_percent.unwrap_or(base.loss_rates_percent),
            rtts: self
                .rtts_ms
                .map(|v| v.into_iter().map(Duration::from_millis).collect())
                .unwrap_or(base.rtts),
            packet_size: self.packet_size.unwrap_or(base.packet_size),
            duration: self
                .duration_secs
                .map(Duration::from_secs)
                .unwrap_or(base.duration),
            streams_per_connection: self
                .streams_per_connection
                .unwrap_or(base.streams_per_connection),
            warmup: self.warmup_secs.map(Duration::from_secs).unwrap_or(base.warmup),
            cooldown: self
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(base.cooldown),
            iterations: self.iterations.unwrap_or(base.iterations).max(1),
        })
    }
}

impl RunnerInput {
    fn resolve(self, cooldown: Duration) -> RunnerConfig {
        let d = RunnerConfig::default();
        let non_empty = |s: Option<String>| {
            s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        RunnerConfig {
            binary: self.binary.unwrap_or(d.binary),
            server_addr: non_empty(self.server_addr).unwrap_or(d.server_addr),
            client_addr: non_empty(self.client_addr).unwrap_or(d.client_addr),
            congestion_control: non_empty(self.congestion_control)
                .unwrap_or(d.congestion_control),
            ack_frequency: self.ack_frequency.unwrap_or(d.ack_frequency),
            fec: self.fec.unwrap_or(d.fec),
            fec_redundancy: self
                .fec_redundancy
                .unwrap_or(d.fec_redundancy)
                .clamp(0.0, 1.0),
            greasing: self.greasing.unwrap_or(d.greasing),
            verbose: self.verbose.unwrap_or(d.verbose),
            settle: self.settle_ms.map(Duration::from_millis).unwrap_or(d.settle),
            client_grace: self
                .client_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(d.client_grace),
            teardown_grace: self
                .teardown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(d.teardown_grace),
            cooldown,
            poll_interval: self
                .poll_interval_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(d.poll_interval),
            emulate: self.emulate.unwrap_or(d.emulate),
            interface: non_empty(self.interface),
        }
    }
}

impl HarnessConfigInput {
    pub fn resolve(self) -> Result<HarnessConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Version(version));
        }

        let matrix = self.matrix.resolve()?;
        matrix.validate()?;
        let runner = self.runner.resolve(matrix.cooldown);
        let sla_profile = match self.sla.profile.as_deref() {
            Some(p) => p.parse()?,
            None => SlaProfile::Normal,
        };

        Ok(HarnessConfig {
            version,
            output_dir: self
                .output_dir
                .unwrap_or_else(|| HarnessConfig::default().output_dir),
            matrix,
            runner,
            sla_profile,
            sla_overrides: self.sla.overrides,
        })
    }
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }
        let parsed: HarnessConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// The profile with overrides applied.
    pub fn gates(&self) -> SlaGateSet {
        self.sla_profile.gates().with_overrides(&self.sla_overrides)
    }

    /// Replace the binary path when `value` is a non-empty string.
    pub fn override_binary(&mut self, value: Option<String>) {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            self.runner.binary = PathBuf::from(v);
        }
    }

    /// Applies `QUICPERF_BIN` if set.
    pub fn apply_env(&mut self) {
        self.override_binary(std::env::var(BINARY_ENV).ok());
    }

    /// Swaps in a matrix preset, keeping the runner's cooldown in step.
    pub fn use_matrix_preset(&mut self, preset: MatrixPreset) {
        self.matrix = preset.matrix();
        self.runner.cooldown = self.matrix.cooldown;
    }
}
