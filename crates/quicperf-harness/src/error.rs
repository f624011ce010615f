use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("test matrix dimension `{0}` is empty")]
    EmptyDimension(&'static str),
    #[error("invalid test matrix: {0}")]
    InvalidMatrix(String),
    #[error("unknown matrix preset: {0} (expected default, light or heavy)")]
    UnknownMatrixPreset(String),
    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("run cancelled")]
    Cancelled,
}

impl HarnessError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        HarnessError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    Version(u32),
    #[error(transparent)]
    Profile(#[from] quicperf_sla::UnknownProfile),
    #[error(transparent)]
    Matrix(#[from] HarnessError),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
