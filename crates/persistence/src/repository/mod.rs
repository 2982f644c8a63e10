//! Repositories over the SQLite schema

pub mod prices;
pub mod runs;

pub use prices::{DailyBarRecord, PriceRepository};
pub use runs::{BacktestRunRecord, RunRepository};
