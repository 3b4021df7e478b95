//! Error type shared by every stage of the mortality pipeline

use thiserror::Error;

/// Errors raised while loading, calibrating, forecasting or scoring mortality data.
///
/// Non-convergence of the Newton-Raphson calibrator is deliberately absent:
/// it is reported through `CalibrationStatus`, not as an error.
#[derive(Debug, Error)]
pub enum LeeCarterError {
    /// Matrices or vectors of inconsistent length
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    Shape {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// A value outside the domain of a logarithm, division or exponential
    #[error("domain error: {0}")]
    Domain(String),

    /// Input is well-formed but carries no usable signal (e.g. a zero-sum sensitivity vector)
    #[error("degenerate input: {0}")]
    Degenerate(String),

    /// The k_t minimiser reported a failure
    #[error("k_t optimisation failed: {0}")]
    OptimizerFailed(String),

    /// A distribution could not be constructed for a diagnostic test
    #[error("statistics error: {0}")]
    Statistics(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A catalogue cell received no source rows
    #[error("no data for age group {age} in period {period}")]
    MissingCell { age: String, period: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LeeCarterError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        LeeCarterError::Shape {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LeeCarterError>;
