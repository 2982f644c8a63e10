//! Trendlab Engine — walk-forward forecaster backtesting
//!
//! Provides:
//! - A day-by-day backtest simulator replaying a forecaster over daily bars
//! - The `Forecaster` capability trait plus an EMA-momentum implementation
//! - A Binance public API client for daily market data
//! - Price series validation

pub mod api;
pub mod error;
pub mod forecaster;
pub mod series;
pub mod simulator;
pub mod types;

// Re-exports for convenience
pub use api::BinanceClient;
pub use error::{BacktestError, Result};
pub use forecaster::{EmaMomentumForecaster, Forecaster};
pub use simulator::Simulator;
pub use types::*;
