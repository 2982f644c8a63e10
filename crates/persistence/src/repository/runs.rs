//! Backtest run summary repository

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::DbResult;

/// Summary of one completed backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub forecaster: String,
    pub window_length: i64,
    pub evaluation_days: i64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    pub profit_factor: f64,
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub created_at: Option<i64>,
}

/// Repository for backtest run summaries
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a run summary, returning its row id
    pub async fn save(&self, record: &BacktestRunRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO backtest_runs (
                symbol, forecaster, window_length, evaluation_days,
                initial_capital, final_capital,
                total_return_pct, win_rate_pct, max_drawdown_pct, profit_factor,
                total_trades, wins, losses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(&record.forecaster)
        .bind(record.window_length)
        .bind(record.evaluation_days)
        .bind(record.initial_capital)
        .bind(record.final_capital)
        .bind(record.total_return_pct)
        .bind(record.win_rate_pct)
        .bind(record.max_drawdown_pct)
        .bind(record.profit_factor)
        .bind(record.total_trades)
        .bind(record.wins)
        .bind(record.losses)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent runs, newest first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<BacktestRunRecord>> {
        let records = sqlx::query_as::<_, BacktestRunRecord>(
            r#"
            SELECT id, symbol, forecaster, window_length, evaluation_days,
                   initial_capital, final_capital,
                   total_return_pct, win_rate_pct, max_drawdown_pct, profit_factor,
                   total_trades, wins, losses, created_at
            FROM backtest_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(symbol: &str, total_return_pct: f64) -> BacktestRunRecord {
        BacktestRunRecord {
            id: None,
            symbol: symbol.to_string(),
            forecaster: "ema_momentum".to_string(),
            window_length: 60,
            evaluation_days: 30,
            initial_capital: 10_000.0,
            final_capital: 10_000.0 * (1.0 + total_return_pct / 100.0),
            total_return_pct,
            win_rate_pct: 50.0,
            max_drawdown_pct: 4.2,
            profit_factor: 1.3,
            total_trades: 10,
            wins: 5,
            losses: 5,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn save_assigns_ids_and_recent_orders_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        let first = repo.save(&record("BTCUSDT", 1.0)).await.unwrap();
        let second = repo.save(&record("ETHUSDT", -2.0)).await.unwrap();
        assert!(second > first);

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].symbol, "ETHUSDT");
        assert_eq!(recent[1].symbol, "BTCUSDT");
        assert!(recent[0].created_at.is_some());
        assert_eq!(recent[1].total_return_pct, 1.0);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        for i in 0..5 {
            repo.save(&record("BTCUSDT", i as f64)).await.unwrap();
        }

        let recent = repo.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].total_return_pct, 4.0);
    }
}
