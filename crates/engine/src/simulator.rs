//! Day-by-day walk-forward backtest simulator
//!
//! Replays a forecaster over the trailing slice of a daily price series,
//! derives a buy/flat signal from its one-step-ahead prediction, and tracks
//! a single-position account. Entry and exit are mutually exclusive within
//! one step: a position opened at step `i` is never closed at step `i`.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{BacktestError, Result};
use crate::forecaster::Forecaster;
use crate::series;
use crate::types::*;

/// Open long position state during simulation
struct OpenPosition {
    entry_price: f64,
    entry_date: NaiveDate,
}

/// Walk-forward backtest simulator
pub struct Simulator;

impl Simulator {
    /// Run a backtest over the trailing
    /// `window_length + evaluation_days` points of `series`.
    pub fn run(
        params: &BacktestParams,
        series: &[PricePoint],
        forecaster: &dyn Forecaster,
    ) -> Result<BacktestResult> {
        let never = AtomicBool::new(false);
        Self::run_with_cancel(params, series, forecaster, &never)
    }

    /// Same as [`Simulator::run`], but checks `cancelled` at the top of every
    /// simulated day so long replays stay interruptible.
    pub fn run_with_cancel(
        params: &BacktestParams,
        series: &[PricePoint],
        forecaster: &dyn Forecaster,
        cancelled: &AtomicBool,
    ) -> Result<BacktestResult> {
        if params.initial_capital <= 0.0 || !params.initial_capital.is_finite() {
            return Err(BacktestError::InvalidParameters(format!(
                "initial capital must be positive, got {}",
                params.initial_capital
            )));
        }
        if params.window_length == 0 {
            return Err(BacktestError::InvalidParameters(
                "window length must be positive".to_string(),
            ));
        }
        if params.evaluation_days == 0 {
            return Err(BacktestError::InvalidParameters(
                "evaluation days must be positive".to_string(),
            ));
        }

        let required = params.window_length + params.evaluation_days;
        if series.len() < required {
            return Err(BacktestError::InsufficientHistory {
                required,
                available: series.len(),
            });
        }

        // Anchor the simulation to the most recent history; every evaluated
        // day then has a full lookback window.
        let slice = &series[series.len() - required..];
        series::validate(slice)?;

        info!(
            forecaster = forecaster.name(),
            days = params.evaluation_days,
            window = params.window_length,
            capital = params.initial_capital,
            "Starting backtest"
        );

        let mut capital = params.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut wins: u32 = 0;
        let mut losses: u32 = 0;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquitySample> = Vec::new();

        // The last index is reserved so a next-day actual always exists
        for i in params.window_length..=slice.len() - 2 {
            if cancelled.load(Ordering::Relaxed) {
                return Err(BacktestError::Cancelled);
            }

            let window = &slice[i - params.window_length..i];
            let predicted = forecaster
                .predict_next_close(window)
                .map_err(|source| BacktestError::Forecaster { step: i, source })?;
            if !predicted.is_finite() {
                return Err(BacktestError::Forecaster {
                    step: i,
                    source: anyhow::anyhow!("non-finite predicted close {predicted}"),
                });
            }

            let current = slice[i].close;
            let next_actual = slice[i + 1].close;
            let predicted_return = (predicted - current) / current;

            if position.is_none() && predicted_return > params.entry_threshold {
                // Fully-collateralized single-unit notional: no capital is
                // deducted at entry.
                position = Some(OpenPosition {
                    entry_price: current,
                    entry_date: slice[i].date,
                });
                debug!(price = current, date = %slice[i].date, "Opened long");
            } else if let Some(pos) = position.take() {
                let (pnl, win) = Self::close_position(
                    &pos,
                    next_actual,
                    slice[i + 1].date,
                    &mut capital,
                    &mut trades,
                );
                if win {
                    wins += 1;
                } else {
                    losses += 1;
                }
                debug!(entry = pos.entry_price, exit = next_actual, pnl, "Closed long");
            }

            equity_curve.push(EquitySample {
                date: slice[i].date,
                equity: capital,
                price: current,
            });
        }

        // Force-close a surviving position against the final close. Affects
        // capital and the win/loss split, but appends no equity sample.
        if let Some(pos) = position.take() {
            let last = &slice[slice.len() - 1];
            let (pnl, win) =
                Self::close_position(&pos, last.close, last.date, &mut capital, &mut trades);
            if win {
                wins += 1;
            } else {
                losses += 1;
            }
            debug!(exit = last.close, pnl, "Force-closed open position at end of run");
        }

        let total_trades = wins + losses;
        let total_return_pct =
            (capital - params.initial_capital) / params.initial_capital * 100.0;
        let win_rate_pct = if total_trades > 0 {
            f64::from(wins) / f64::from(total_trades) * 100.0
        } else {
            0.0
        };
        let max_drawdown_pct = max_drawdown_pct(&equity_curve);
        let profit_factor = profit_factor(&trades);

        info!(
            total_trades,
            wins,
            losses,
            final_capital = capital,
            total_return_pct,
            max_drawdown_pct,
            "Backtest complete"
        );

        Ok(BacktestResult {
            equity_curve,
            trades,
            initial_capital: params.initial_capital,
            final_capital: capital,
            total_return_pct,
            win_rate_pct,
            max_drawdown_pct,
            profit_factor,
            total_trades,
            wins,
            losses,
        })
    }

    /// Realize a position against `exit_price`, mutate capital, record the
    /// trade, and report whether it was a win.
    fn close_position(
        pos: &OpenPosition,
        exit_price: f64,
        exit_date: NaiveDate,
        capital: &mut f64,
        trades: &mut Vec<Trade>,
    ) -> (f64, bool) {
        let actual_return = (exit_price - pos.entry_price) / pos.entry_price;
        let pnl = *capital * actual_return;
        *capital += pnl;

        trades.push(Trade {
            entry_date: pos.entry_date,
            exit_date,
            entry_price: pos.entry_price,
            exit_price,
            return_pct: actual_return * 100.0,
            pnl,
        });

        (pnl, actual_return > 0.0)
    }
}

/// Running-peak max drawdown over the equity curve, in percent.
fn max_drawdown_pct(curve: &[EquitySample]) -> f64 {
    let Some(first) = curve.first() else {
        return 0.0;
    };
    let mut peak = first.equity;
    let mut max_dd = 0.0;
    for sample in curve {
        if sample.equity > peak {
            peak = sample.equity;
        }
        let dd = (peak - sample.equity) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Gross profit over gross loss.
///
/// Keeps the reference policy of the original engine: with no trades at all
/// the divisor collapses to 1 (so the ratio is 0), and with trades but zero
/// gross loss the ratio is defined as 0 rather than infinite.
fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = if trades.is_empty() {
        1.0
    } else {
        trades
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl.abs())
            .sum()
    };

    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::EmaMomentumForecaster;
    use anyhow::anyhow;
    use chrono::NaiveDate;

    fn make_series(closes: &[f64]) -> Vec<PricePoint> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
                close,
                volume: 100.0,
            })
            .collect()
    }

    fn params(window: usize, days: usize) -> BacktestParams {
        BacktestParams {
            window_length: window,
            evaluation_days: days,
            initial_capital: 10_000.0,
            entry_threshold: 0.005,
        }
    }

    /// Predicts the last window close scaled by a fixed ratio
    struct RatioForecaster(f64);

    impl Forecaster for RatioForecaster {
        fn name(&self) -> &str {
            "ratio"
        }

        fn predict_next_close(&self, window: &[PricePoint]) -> anyhow::Result<f64> {
            Ok(window.last().map(|p| p.close).unwrap_or_default() * self.0)
        }
    }

    /// Always fails or returns a fixed (possibly non-finite) value
    struct BrokenForecaster(Option<f64>);

    impl Forecaster for BrokenForecaster {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict_next_close(&self, _window: &[PricePoint]) -> anyhow::Result<f64> {
            match self.0 {
                Some(v) => Ok(v),
                None => Err(anyhow!("model inference failed")),
            }
        }
    }

    #[test]
    fn rising_series_with_bullish_forecaster_wins_every_trade() {
        // 8 points for window=3, days=5; the ~2% bullish prediction clears
        // the 0.5% entry threshold at every flat step
        let series = make_series(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 107.0]);
        let result = Simulator::run(&params(3, 5), &series, &RatioForecaster(1.02)).unwrap();

        assert_eq!(result.total_trades, 2);
        assert_eq!(result.wins, 2);
        assert_eq!(result.losses, 0);
        assert_eq!(result.win_rate_pct, 100.0);
        assert!(result.total_return_pct > 0.0);
        assert!(result.final_capital > result.initial_capital);
        // entries at steps 3 and 5, exits at steps 4 and 6, then one sample
        // per simulated day
        assert_eq!(result.equity_curve.len(), 4);
        // all-win run has zero gross loss, which the policy maps to 0
        assert_eq!(result.profit_factor, 0.0);
        assert_eq!(result.max_drawdown_pct, 0.0);
    }

    #[test]
    fn flat_series_never_opens_a_position() {
        let series = make_series(&[100.0; 30]);
        let forecaster = EmaMomentumForecaster::new(10).unwrap();
        let result = Simulator::run(&params(20, 10), &series, &forecaster).unwrap();

        assert_eq!(result.total_trades, 0);
        assert!(result.trades.is_empty());
        assert_eq!(result.final_capital, result.initial_capital);
        assert_eq!(result.win_rate_pct, 0.0);
        assert_eq!(result.profit_factor, 0.0);
        assert_eq!(result.max_drawdown_pct, 0.0);
        assert_eq!(result.equity_curve.len(), 9);
        assert!(result.equity_curve.iter().all(|s| s.equity == 10_000.0));
    }

    #[test]
    fn falling_series_with_bullish_forecaster_loses() {
        let closes: Vec<f64> = (0..12).map(|i| 200.0 - 5.0 * i as f64).collect();
        let series = make_series(&closes);
        let result = Simulator::run(&params(3, 9), &series, &RatioForecaster(2.0)).unwrap();

        assert!(result.total_trades > 0);
        assert_eq!(result.wins, 0);
        assert_eq!(result.losses, result.total_trades);
        assert!(result.final_capital < result.initial_capital);
        assert!(result.total_return_pct < 0.0);
        assert!(result.max_drawdown_pct > 0.0);
        assert_eq!(result.profit_factor, 0.0);
    }

    #[test]
    fn exact_minimum_length_succeeds() {
        let series = make_series(&[100.0; 8]);
        assert!(Simulator::run(&params(3, 5), &series, &RatioForecaster(1.0)).is_ok());
    }

    #[test]
    fn one_point_short_is_insufficient_history() {
        let series = make_series(&[100.0; 7]);
        let err = Simulator::run(&params(3, 5), &series, &RatioForecaster(1.0)).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InsufficientHistory {
                required: 8,
                available: 7
            }
        ));
    }

    #[test]
    fn non_positive_capital_is_rejected() {
        let series = make_series(&[100.0; 100]);
        for capital in [0.0, -50.0] {
            let p = BacktestParams {
                initial_capital: capital,
                ..params(3, 5)
            };
            let err = Simulator::run(&p, &series, &RatioForecaster(1.0)).unwrap_err();
            assert!(matches!(err, BacktestError::InvalidParameters(_)));
        }
    }

    #[test]
    fn zero_window_or_days_is_rejected() {
        let series = make_series(&[100.0; 100]);
        for (window, days) in [(0, 5), (3, 0)] {
            let p = BacktestParams {
                window_length: window,
                evaluation_days: days,
                ..params(3, 5)
            };
            let err = Simulator::run(&p, &series, &RatioForecaster(1.0)).unwrap_err();
            assert!(matches!(err, BacktestError::InvalidParameters(_)));
        }
    }

    #[test]
    fn forecaster_error_aborts_the_run() {
        let series = make_series(&[100.0; 10]);
        let err = Simulator::run(&params(3, 7), &series, &BrokenForecaster(None)).unwrap_err();
        assert!(matches!(err, BacktestError::Forecaster { step: 3, .. }));
    }

    #[test]
    fn non_finite_prediction_aborts_the_run() {
        let series = make_series(&[100.0; 10]);
        for bad in [f64::NAN, f64::INFINITY] {
            let err =
                Simulator::run(&params(3, 7), &series, &BrokenForecaster(Some(bad))).unwrap_err();
            assert!(matches!(err, BacktestError::Forecaster { .. }));
        }
    }

    #[test]
    fn unsorted_series_is_a_data_integrity_error() {
        let mut series = make_series(&[100.0; 10]);
        series.swap(4, 5);
        let err = Simulator::run(&params(3, 7), &series, &RatioForecaster(1.0)).unwrap_err();
        assert!(matches!(err, BacktestError::DataIntegrity(_)));
    }

    #[test]
    fn integrity_is_checked_only_on_the_evaluated_slice() {
        // A bad point outside the trailing window+days slice is ignored
        let mut series = make_series(&[100.0; 20]);
        series[0].close = f64::NAN;
        assert!(Simulator::run(&params(3, 5), &series, &RatioForecaster(1.0)).is_ok());
    }

    #[test]
    fn open_position_is_force_closed_at_end_of_run() {
        // window=3, days=4: entry at step 3, exit at step 4, re-entry at
        // step 5 (the last simulated day) survives the loop
        let series = make_series(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0]);
        let result = Simulator::run(&params(3, 4), &series, &RatioForecaster(2.0)).unwrap();

        assert_eq!(result.total_trades, 2);
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.equity_curve.len(), 3);
        let forced = result.trades.last().unwrap();
        assert_eq!(forced.exit_price, 106.0);
        assert_eq!(forced.entry_price, 105.0);
        // forced close settles capital without an extra equity sample
        assert!(result.final_capital > result.equity_curve.last().unwrap().equity);
    }

    #[test]
    fn identical_inputs_produce_bit_identical_results() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let series = make_series(&closes);
        let forecaster = EmaMomentumForecaster::new(8).unwrap();
        let p = params(20, 20);

        let a = Simulator::run(&p, &series, &forecaster).unwrap();
        let b = Simulator::run(&p, &series, &forecaster).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cancellation_is_observed_between_steps() {
        let series = make_series(&[100.0; 50]);
        let cancelled = AtomicBool::new(true);
        let err = Simulator::run_with_cancel(
            &params(10, 40),
            &series,
            &RatioForecaster(1.0),
            &cancelled,
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::Cancelled));
    }

    #[test]
    fn random_walk_preserves_accounting_invariants() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let mut close = 100.0_f64;
        let closes: Vec<f64> = (0..200)
            .map(|_| {
                close *= 1.0 + rng.gen_range(-0.03..0.03);
                close
            })
            .collect();
        let series = make_series(&closes);
        let forecaster = EmaMomentumForecaster::new(10).unwrap();
        let p = params(60, 140);

        let result = Simulator::run(&p, &series, &forecaster).unwrap();

        assert_eq!(result.wins + result.losses, result.total_trades);
        assert_eq!(result.trades.len() as u32, result.total_trades);
        assert_eq!(result.equity_curve.len(), p.evaluation_days - 1);
        // percentage-based P&L cannot take capital negative
        assert!(result.final_capital > 0.0);
        assert!(result.equity_curve.iter().all(|s| s.equity > 0.0));
        assert!((0.0..=100.0).contains(&result.max_drawdown_pct));
        assert!((0.0..=100.0).contains(&result.win_rate_pct));
    }

    #[test]
    fn max_drawdown_is_monotone_over_growing_prefixes() {
        let equities = [100.0, 120.0, 90.0, 110.0, 80.0, 130.0, 95.0];
        let curve: Vec<EquitySample> = make_series(&equities)
            .into_iter()
            .map(|p| EquitySample {
                date: p.date,
                equity: p.close,
                price: p.close,
            })
            .collect();

        let mut prev = 0.0;
        for end in 1..=curve.len() {
            let dd = max_drawdown_pct(&curve[..end]);
            assert!(dd >= prev, "drawdown shrank from {prev} to {dd}");
            prev = dd;
        }
    }

    #[test]
    fn drawdown_of_empty_curve_is_zero() {
        assert_eq!(max_drawdown_pct(&[]), 0.0);
    }

    #[test]
    fn profit_factor_balances_gross_profit_and_loss() {
        // one winning and one losing trade of equal magnitude
        let series = make_series(&[100.0, 100.0, 100.0, 100.0, 110.0, 120.0, 99.0, 99.0]);
        let result = Simulator::run(&params(3, 5), &series, &RatioForecaster(2.0)).unwrap();

        assert!(result.wins >= 1);
        assert!(result.losses >= 1);
        assert!(result.profit_factor > 0.0);
        assert!(result.profit_factor.is_finite());
    }
}
