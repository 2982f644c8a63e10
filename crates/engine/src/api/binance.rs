//! Binance public API client for daily market data (no authentication required)

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use tracing::debug;

use crate::types::DailyBar;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, serde::Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

/// Binance ticker price response
#[derive(Debug, serde::Deserialize)]
#[allow(dead_code)]
struct TickerPrice {
    symbol: String,
    price: String,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client against a custom base URL (tests, proxies)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new()
        }
    }

    /// Fetch the trailing `limit` daily bars for a symbol, oldest first
    pub async fn get_daily_bars(&self, symbol: &str, limit: u32) -> Result<Vec<DailyBar>> {
        let limit = limit.min(MAX_KLINES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval=1d&limit={}",
            self.base_url, symbol, limit
        );

        debug!(symbol, limit, "Fetching daily klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;

        let bars = raw_klines
            .into_iter()
            .map(|raw| bar_from_raw(symbol, raw))
            .collect::<Result<Vec<_>>>()?;

        debug!(count = bars.len(), "Fetched daily bars");
        Ok(bars)
    }

    /// Get the current price for a symbol
    pub async fn get_latest_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let ticker: TickerPrice = response.json().await?;
        ticker
            .price
            .parse::<f64>()
            .with_context(|| format!("malformed ticker price {:?}", ticker.price))
    }
}

/// Convert one raw kline row into a daily bar, failing on malformed fields
fn bar_from_raw(symbol: &str, raw: RawKline) -> Result<DailyBar> {
    let date = date_from_millis(raw.0)
        .with_context(|| format!("kline open time {} out of range", raw.0))?;

    let parse = |label: &str, value: &str| -> Result<f64> {
        value
            .parse::<f64>()
            .with_context(|| format!("malformed {label} {value:?} in kline at {date}"))
    };

    Ok(DailyBar {
        symbol: symbol.to_string(),
        date,
        open: parse("open", &raw.1)?,
        high: parse("high", &raw.2)?,
        low: parse("low", &raw.3)?,
        close: parse("close", &raw.4)?,
        volume: parse("volume", &raw.5)?,
    })
}

fn date_from_millis(ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}
