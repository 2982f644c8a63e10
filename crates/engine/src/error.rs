//! Error types for the backtest simulator

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

/// Errors a backtest run can fail with
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("insufficient history: need at least {required} points, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("forecaster failed at step {step}: {source}")]
    Forecaster {
        step: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("backtest cancelled")]
    Cancelled,
}

impl BacktestError {
    /// Stable machine-readable kind, used by API error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            BacktestError::InvalidParameters(_) => "invalid_parameters",
            BacktestError::InsufficientHistory { .. } => "insufficient_history",
            BacktestError::DataIntegrity(_) => "data_integrity",
            BacktestError::Forecaster { .. } => "forecaster_failure",
            BacktestError::Cancelled => "cancelled",
        }
    }
}
