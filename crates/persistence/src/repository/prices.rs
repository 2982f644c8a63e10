//! Daily price history repository

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::DbResult;

/// One stored daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyBarRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Repository for daily price history
pub struct PriceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PriceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a batch of bars in one transaction
    pub async fn upsert_bars(&self, bars: &[DailyBarRecord]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO daily_prices
                    (symbol, date, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(count = bars.len(), "Upserted daily bars");
        Ok(bars.len() as u64)
    }

    /// Fetch bars for a symbol ordered by ascending date.
    ///
    /// With `limit` set, returns only the trailing `limit` bars (still
    /// ascending).
    pub async fn get_series(
        &self,
        symbol: &str,
        limit: Option<i64>,
    ) -> DbResult<Vec<DailyBarRecord>> {
        let records = match limit {
            Some(limit) => {
                let mut trailing = sqlx::query_as::<_, DailyBarRecord>(
                    r#"
                    SELECT symbol, date, open, high, low, close, volume
                    FROM daily_prices
                    WHERE symbol = ?
                    ORDER BY date DESC
                    LIMIT ?
                    "#,
                )
                .bind(symbol)
                .bind(limit)
                .fetch_all(self.pool)
                .await?;
                trailing.reverse();
                trailing
            }
            None => {
                sqlx::query_as::<_, DailyBarRecord>(
                    r#"
                    SELECT symbol, date, open, high, low, close, volume
                    FROM daily_prices
                    WHERE symbol = ?
                    ORDER BY date ASC
                    "#,
                )
                .bind(symbol)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(records)
    }

    /// Most recent stored date for a symbol, if any
    pub async fn last_date(&self, symbol: &str) -> DbResult<Option<NaiveDate>> {
        // MAX() yields a single row with NULL when no bars exist
        let row: (Option<NaiveDate>,) =
            sqlx::query_as("SELECT MAX(date) FROM daily_prices WHERE symbol = ?")
                .bind(symbol)
                .fetch_one(self.pool)
                .await?;

        Ok(row.0)
    }

    /// Number of stored bars for a symbol
    pub async fn count(&self, symbol: &str) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM daily_prices WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn bar(day: u32, close: f64) -> DailyBarRecord {
        DailyBarRecord {
            symbol: "BTCUSDT".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 100.0,
        }
    }

    #[tokio::test]
    async fn upsert_and_read_back_ascending() {
        let db = Database::in_memory().await.unwrap();
        let repo = PriceRepository::new(db.pool());

        // Inserted out of order; read back sorted by date
        repo.upsert_bars(&[bar(3, 102.0), bar(1, 100.0), bar(2, 101.0)])
            .await
            .unwrap();

        let series = repo.get_series("BTCUSDT", None).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].close, 100.0);
        assert_eq!(series[2].close, 102.0);
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_date() {
        let db = Database::in_memory().await.unwrap();
        let repo = PriceRepository::new(db.pool());

        repo.upsert_bars(&[bar(1, 100.0)]).await.unwrap();
        repo.upsert_bars(&[bar(1, 250.0)]).await.unwrap();

        let series = repo.get_series("BTCUSDT", None).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 250.0);
    }

    #[tokio::test]
    async fn limit_returns_trailing_bars_ascending() {
        let db = Database::in_memory().await.unwrap();
        let repo = PriceRepository::new(db.pool());

        let bars: Vec<_> = (1..=10).map(|d| bar(d, 100.0 + d as f64)).collect();
        repo.upsert_bars(&bars).await.unwrap();

        let series = repo.get_series("BTCUSDT", Some(3)).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(series[2].date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[tokio::test]
    async fn last_date_and_count() {
        let db = Database::in_memory().await.unwrap();
        let repo = PriceRepository::new(db.pool());

        assert_eq!(repo.last_date("BTCUSDT").await.unwrap(), None);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 0);

        repo.upsert_bars(&[bar(1, 100.0), bar(5, 104.0)]).await.unwrap();

        assert_eq!(
            repo.last_date("BTCUSDT").await.unwrap(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
        );
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 2);
        assert_eq!(repo.count("ETHUSDT").await.unwrap(), 0);
    }
}
