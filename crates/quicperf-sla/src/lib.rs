//! SLA gating for QUIC performance runs.
//!
//! [`ScenarioMetrics`] is what a protocol client reports; it collapses into
//! [`SlaMetrics`], which an [`SlaValidator`] checks against an
//! [`SlaGateSet`] (one of the built-in [`SlaProfile`]s, optionally patched
//! with [`SlaOverrides`]). The result carries a score, a pass flag and a
//! CI exit code.

pub mod gates;
pub mod metrics;
pub mod stats;
pub mod validator;

pub use gates::{SlaGateSet, SlaOverrides, SlaProfile, UnknownProfile};
pub use metrics::{ScenarioMetrics, SlaMetrics};
pub use validator::{
    exit_code, score, CheckSummary, Severity, SlaMetric, SlaResult, SlaValidator, SlaViolation,
};
