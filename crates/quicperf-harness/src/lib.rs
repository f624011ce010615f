//! QUIC performance-regression harness.
//!
//! Generates a [`TestMatrix`] of load/network scenarios, runs the protocol
//! client/server pair through each one with [`ScenarioRunner`], gates the
//! reported metrics against SLA thresholds and folds everything into a
//! [`MatrixSummary`] whose exit code drives CI.

pub mod config;
pub mod context;
pub mod error;
pub mod matrix;
pub mod process;
pub mod report;
pub mod result;
pub mod runner;

pub use config::HarnessConfig;
pub use context::RunContext;
pub use error::{ConfigError, HarnessError};
pub use matrix::{MatrixPreset, TestMatrix, TestScenario};
pub use process::{LaunchSpec, ProcessHandle, ProcessLauncher, SystemLauncher};
pub use report::MatrixSummary;
pub use result::{MeasuredMetrics, ScenarioResult};
pub use runner::{RunnerConfig, ScenarioRunner};
