//! Crate-wide error type
//!
//! One variant per failure category so callers can dispatch on kind.
//! Validation errors are raised eagerly by constructors/builders; kernel
//! errors propagate to the driver, which surfaces the first failure.

use thiserror::Error;

/// Errors across simulation, storage, summaries and ABC.
#[derive(Error, Debug)]
pub enum SimError {
    /// A config knob or formula set that cannot describe a runnable model.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// Model string matched no backend detector.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// Model string + formula names matched more than one backend.
    #[error("ambiguous model '{model}': matches {candidates:?} — specify the backend directly")]
    AmbiguousModel {
        model: String,
        candidates: Vec<&'static str>,
    },

    /// A formula value whose length is neither 1, `n`, nor a divisor of `n`.
    #[error("length mismatch for '{name}': got {got}, need {need} (or a divisor)")]
    LengthMismatch {
        name: String,
        got: usize,
        need: usize,
    },

    /// Malformed per-item parameter vectors handed to an integrator kernel.
    #[error("invalid kernel input: {0}")]
    InvalidKernelInput(String),

    /// Filesystem / columnar-codec failures, including rehydration of a
    /// directory that is not a recognizable simulation output.
    #[error("io: {0}")]
    Io(String),

    /// Joining applied summary tables whose `wider_by` metadata differs.
    #[error("wider_by mismatch: {left:?} vs {right:?}")]
    WiderByMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    /// Resampling without replacement cannot draw more than the pool holds.
    #[error("resample size {requested} exceeds pool of {available} without replacement")]
    ResampleSizeExceeded { requested: usize, available: usize },

    /// An operation that requires a non-empty posterior / summary pool.
    #[error("empty results: {0}")]
    EmptyResults(String),
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for SimError {
    fn from(err: arrow::error::ArrowError) -> Self {
        SimError::Io(format!("arrow: {err}"))
    }
}

impl From<parquet::errors::ParquetError> for SimError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        SimError::Io(format!("parquet: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
