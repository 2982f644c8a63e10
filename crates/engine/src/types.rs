//! Types for the walk-forward backtest simulator

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single daily OHLCV bar as returned by the market data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    /// Reduce the bar to the (date, close, volume) shape the simulator consumes
    pub fn price_point(&self) -> PricePoint {
        PricePoint {
            date: self.date,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// One day of price history: the forecaster feature set plus its date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: f64,
}

/// Parameters for a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestParams {
    /// Lookback window fed to the forecaster, in days
    pub window_length: usize,
    /// Number of trailing days to replay
    pub evaluation_days: usize,
    pub initial_capital: f64,
    /// Minimum predicted return required to open a long (0.005 = 0.5%)
    pub entry_threshold: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            window_length: 60,
            evaluation_days: 30,
            initial_capital: 10_000.0,
            entry_threshold: 0.005,
        }
    }
}

/// A closed round-trip trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
    pub pnl: f64,
}

/// One point on the equity curve; `price` is the close the sample was taken at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySample {
    pub date: NaiveDate,
    pub equity: f64,
    pub price: f64,
}

/// Result of a backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquitySample>,
    pub trades: Vec<Trade>,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    pub profit_factor: f64,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
}
