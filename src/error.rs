//! Error types for the NPT driver.
//!
//! Physics-fatal conditions (`NumericalInstability`) stop the run, artifact
//! problems (`CorruptArtifact`) stop a resume before it starts, and I/O
//! failures on the output sinks are reported per sink so the driver can retry
//! them at the next cadence tick.

use thiserror::Error;

/// Unified error type for all library operations.
#[derive(Error, Debug)]
pub enum NptError {
    /// Stress, forces or the rescaled cell became non-finite or out of band
    #[error("numerical instability at step {step}: {quantity} = {value}")]
    NumericalInstability {
        step: u64,
        quantity: String,
        value: f64,
    },

    /// A restart artifact is unreadable or does not match the structure
    #[error("corrupt restart artifact: {0}")]
    CorruptArtifact(String),

    /// Requested hardware backend is absent
    #[error("device `{0}` is not available")]
    DeviceUnavailable(String),

    /// Missing or invalid configuration option
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed structure file
    #[error("structure error: {0}")]
    Structure(String),

    /// Write failure on one of the output sinks
    #[error("I/O failure on {sink}: {source}")]
    Io {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NptError {
    pub fn instability(step: u64, quantity: impl Into<String>, value: f64) -> Self {
        NptError::NumericalInstability {
            step,
            quantity: quantity.into(),
            value,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        NptError::Config(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        NptError::CorruptArtifact(message.into())
    }

    pub fn io(sink: &'static str, source: std::io::Error) -> Self {
        NptError::Io { sink, source }
    }
}

impl From<csv::Error> for NptError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(source) => NptError::io("thermo table", source),
            other => NptError::Serialization(format!("{other:?}")),
        }
    }
}

impl From<serde_json::Error> for NptError {
    fn from(err: serde_json::Error) -> Self {
        NptError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NptError>;
