//! Forecaster capability and the built-in EMA-momentum implementation
//!
//! The simulator only needs `predict_next_close`; anything satisfying the
//! trait (a wrapped neural model, a statistical projection, a constant
//! predictor in tests) is a valid forecaster.

use anyhow::{bail, Result};
use ta::indicators::ExponentialMovingAverage;
use ta::Next;

use crate::types::PricePoint;

/// One-step-ahead close price forecaster.
///
/// Implementations must be pure within a run: the same window always yields
/// the same prediction.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &str;

    /// Predict the next close from a fixed-length lookback window of
    /// (close, volume) observations.
    fn predict_next_close(&self, window: &[PricePoint]) -> Result<f64>;
}

/// Projects the next close by extending the latest EMA step forward.
///
/// Smooths the window's closes with an EMA, then adds the last EMA increment
/// on top of the final smoothed value. A rising window predicts continued
/// rise, a flat window predicts no change.
pub struct EmaMomentumForecaster {
    period: usize,
}

impl EmaMomentumForecaster {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            bail!("EMA period must be positive");
        }
        Ok(Self { period })
    }
}

impl Default for EmaMomentumForecaster {
    fn default() -> Self {
        Self { period: 10 }
    }
}

impl Forecaster for EmaMomentumForecaster {
    fn name(&self) -> &str {
        "ema_momentum"
    }

    fn predict_next_close(&self, window: &[PricePoint]) -> Result<f64> {
        if window.len() < 2 {
            bail!(
                "window too short for EMA momentum: {} points, need at least 2",
                window.len()
            );
        }

        // Stateless across calls: a fresh indicator per prediction
        let mut ema = ExponentialMovingAverage::new(self.period).expect("period checked in new()");

        let mut prev = window[0].close;
        let mut last = prev;
        for point in window {
            prev = last;
            last = ema.next(point.close);
        }

        let predicted = last + (last - prev);
        if !predicted.is_finite() {
            bail!("EMA momentum produced non-finite prediction {predicted}");
        }
        Ok(predicted)
    }
}
