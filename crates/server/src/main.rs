//! Trendlab — walk-forward evaluation service for price-direction forecasters
//!
//! Usage:
//!   trendlab serve --port 3001                  — Launch the web server
//!   trendlab sync --symbol BTCUSDT --days 365   — Sync daily price history
//!   trendlab backtest --days 30                 — Run a backtest from the CLI

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    BacktestError, BacktestParams, BacktestResult, BinanceClient, EmaMomentumForecaster,
    Forecaster, PricePoint, Simulator,
};
use persistence::repository::{BacktestRunRecord, DailyBarRecord, PriceRepository, RunRepository};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SYMBOL: &str = "BTCUSDT";

#[derive(Parser)]
#[command(name = "trendlab")]
#[command(about = "Walk-forward evaluation service for price forecasters", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the web server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Fetch daily price history from Binance into the local database
    Sync {
        /// Symbol to sync
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        symbol: String,
        /// Number of trailing days to fetch (max 1000)
        #[arg(long, default_value_t = 365)]
        days: u32,
    },
    /// Run a backtest from the CLI (no web server)
    Backtest {
        /// Symbol to backtest
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        symbol: String,
        /// Number of trailing days to evaluate
        #[arg(long, default_value_t = 30)]
        days: usize,
        /// Starting capital
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        /// Forecaster lookback window in days
        #[arg(long, default_value_t = 60)]
        window: usize,
        /// Entry threshold on predicted return (0.005 = 0.5%)
        #[arg(long, default_value_t = 0.005)]
        threshold: f64,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    binance: Arc<BinanceClient>,
    forecaster: Arc<dyn Forecaster>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,trendlab=debug")
    } else {
        EnvFilter::new("info,engine=info,trendlab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("TRENDLAB_DB_PATH").unwrap_or_else(|_| "data/trendlab.db".to_string())
}

async fn open_database() -> anyhow::Result<persistence::Database> {
    let path = db_path();
    let db = persistence::Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", path);
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Sync { symbol, days } => {
            cmd_sync(&symbol, days).await?;
        }
        Commands::Backtest {
            symbol,
            days,
            capital,
            window,
            threshold,
        } => {
            cmd_backtest(&symbol, days, capital, window, threshold).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Trendlab v{} starting...", APP_VERSION);

    let db = open_database().await?;

    let state = AppState {
        db: Arc::new(db),
        binance: Arc::new(BinanceClient::new()),
        forecaster: Arc::new(EmaMomentumForecaster::default()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/backtest", get(api_backtest))
        .route("/predict", get(api_predict))
        .route("/historical", get(api_historical))
        .route("/runs", get(api_runs))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new("dist"))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Trendlab v{} ===", APP_VERSION);
    println!("Forecaster Evaluation Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET /api/health      - Health check");
    println!("  GET /api/backtest    - Run a walk-forward backtest");
    println!("  GET /api/predict     - One-step-ahead prediction");
    println!("  GET /api/historical  - Stored daily bars");
    println!("  GET /api/runs        - Recent backtest summaries");
    println!("\n  Database: {}", db_path());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn backtest_error_response(err: &BacktestError) -> ApiError {
    let status = match err {
        BacktestError::InvalidParameters(_) | BacktestError::InsufficientHistory { .. } => {
            StatusCode::BAD_REQUEST
        }
        BacktestError::DataIntegrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BacktestError::Forecaster { .. } => StatusCode::BAD_GATEWAY,
        BacktestError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({
            "kind": err.kind(),
            "message": err.to_string(),
        })),
    )
}

fn internal_error(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "kind": "internal",
            "message": message.to_string(),
        })),
    )
}

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let repo = PriceRepository::new(state.db.pool());
    let bars = repo.count(DEFAULT_SYMBOL).await.unwrap_or(0);

    Json(serde_json::json!({
        "status": "ok",
        "service": "trendlab",
        "version": APP_VERSION,
        "forecaster": state.forecaster.name(),
        "price_bars": bars,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
struct BacktestQuery {
    symbol: Option<String>,
    days: Option<usize>,
    capital: Option<f64>,
    window: Option<usize>,
    threshold: Option<f64>,
}

/// GET /api/backtest — replay the forecaster over stored history
async fn api_backtest(
    State(state): State<AppState>,
    Query(query): Query<BacktestQuery>,
) -> Result<Json<BacktestResult>, ApiError> {
    let symbol = query.symbol.unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
    let params = BacktestParams {
        evaluation_days: query.days.unwrap_or(30),
        initial_capital: query.capital.unwrap_or(10_000.0),
        window_length: query.window.unwrap_or(60),
        entry_threshold: query.threshold.unwrap_or(0.005),
    };

    info!(
        symbol = %symbol,
        days = params.evaluation_days,
        capital = params.initial_capital,
        "Backtest requested"
    );

    let series = load_price_points(&state, &symbol).await?;
    let result = run_simulation(state.forecaster.clone(), params.clone(), series).await?;
    persist_run(&state, &symbol, &params, &result).await;

    Ok(Json(result))
}

#[derive(Deserialize)]
struct PredictQuery {
    symbol: Option<String>,
}

/// GET /api/predict — one-step-ahead prediction from the latest stored window
async fn api_predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let symbol = query.symbol.unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
    let params = BacktestParams::default();

    let series = load_price_points(&state, &symbol).await?;
    if series.len() < params.window_length {
        let err = BacktestError::InsufficientHistory {
            required: params.window_length,
            available: series.len(),
        };
        return Err(backtest_error_response(&err));
    }

    let window = &series[series.len() - params.window_length..];
    let predicted = state
        .forecaster
        .predict_next_close(window)
        .map_err(|source| {
            backtest_error_response(&BacktestError::Forecaster {
                step: series.len(),
                source,
            })
        })?;

    // Prefer the live ticker; fall back to the last stored close
    let last_close = window[window.len() - 1].close;
    let current = match state.binance.get_latest_price(&symbol).await {
        Ok(price) => price,
        Err(e) => {
            warn!("Live ticker unavailable, using last stored close: {}", e);
            last_close
        }
    };

    let predicted_return = (predicted - current) / current;
    let signal = if predicted_return > params.entry_threshold {
        "buy"
    } else {
        "flat"
    };

    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "forecaster": state.forecaster.name(),
        "predicted_close": predicted,
        "current_close": current,
        "predicted_return_pct": predicted_return * 100.0,
        "signal": signal,
        "window_length": params.window_length,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

#[derive(Deserialize)]
struct HistoricalQuery {
    symbol: Option<String>,
    limit: Option<i64>,
}

/// GET /api/historical — stored daily bars for charting
async fn api_historical(
    State(state): State<AppState>,
    Query(query): Query<HistoricalQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let symbol = query.symbol.unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let repo = PriceRepository::new(state.db.pool());
    let bars = repo
        .get_series(&symbol, Some(limit))
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "count": bars.len(),
        "data": bars,
    })))
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

/// GET /api/runs — recent persisted backtest summaries
async fn api_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);

    let repo = RunRepository::new(state.db.pool());
    let runs = repo.recent(limit).await.map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "count": runs.len(),
        "runs": runs,
    })))
}

// ============================================================================
// Shared backtest plumbing
// ============================================================================

async fn load_price_points(state: &AppState, symbol: &str) -> Result<Vec<PricePoint>, ApiError> {
    let repo = PriceRepository::new(state.db.pool());
    let bars = repo.get_series(symbol, None).await.map_err(internal_error)?;
    Ok(bars.iter().map(price_point).collect())
}

fn price_point(bar: &DailyBarRecord) -> PricePoint {
    PricePoint {
        date: bar.date,
        close: bar.close,
        volume: bar.volume,
    }
}

/// Run the synchronous simulator off the async runtime
async fn run_simulation(
    forecaster: Arc<dyn Forecaster>,
    params: BacktestParams,
    series: Vec<PricePoint>,
) -> Result<BacktestResult, ApiError> {
    let result = tokio::task::spawn_blocking(move || {
        Simulator::run(&params, &series, forecaster.as_ref())
    })
    .await
    .map_err(internal_error)?;

    result.map_err(|e| backtest_error_response(&e))
}

/// Best-effort persistence of a run summary; failures are logged, not fatal
async fn persist_run(state: &AppState, symbol: &str, params: &BacktestParams, result: &BacktestResult) {
    let record = run_record(symbol, state.forecaster.name(), params, result);
    let repo = RunRepository::new(state.db.pool());
    if let Err(e) = repo.save(&record).await {
        warn!("Failed to persist backtest run: {}", e);
    }
}

fn run_record(
    symbol: &str,
    forecaster: &str,
    params: &BacktestParams,
    result: &BacktestResult,
) -> BacktestRunRecord {
    BacktestRunRecord {
        id: None,
        symbol: symbol.to_string(),
        forecaster: forecaster.to_string(),
        window_length: params.window_length as i64,
        evaluation_days: params.evaluation_days as i64,
        initial_capital: result.initial_capital,
        final_capital: result.final_capital,
        total_return_pct: result.total_return_pct,
        win_rate_pct: result.win_rate_pct,
        max_drawdown_pct: result.max_drawdown_pct,
        profit_factor: result.profit_factor,
        total_trades: result.total_trades as i64,
        wins: result.wins as i64,
        losses: result.losses as i64,
        created_at: None,
    }
}

// ============================================================================
// Sync command — fetch daily history into SQLite
// ============================================================================

async fn cmd_sync(symbol: &str, days: u32) -> anyhow::Result<()> {
    println!("\n=== Trendlab v{} ===", APP_VERSION);

    let db = open_database().await?;
    let binance = BinanceClient::new();

    info!(symbol, days, "Syncing daily price history");
    let bars = binance.get_daily_bars(symbol, days).await?;
    if bars.is_empty() {
        anyhow::bail!("Binance returned no daily bars for {}", symbol);
    }

    let records: Vec<DailyBarRecord> = bars
        .iter()
        .map(|b| DailyBarRecord {
            symbol: b.symbol.clone(),
            date: b.date,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        })
        .collect();

    let repo = PriceRepository::new(db.pool());
    let written = repo.upsert_bars(&records).await?;
    let total = repo.count(symbol).await?;
    let last = repo.last_date(symbol).await?;

    println!(
        "Synced {} bars for {} ({} stored, latest {})",
        written,
        symbol,
        total,
        last.map(|d| d.to_string()).unwrap_or_default()
    );

    Ok(())
}

// ============================================================================
// Backtest command — CLI mode (no web server)
// ============================================================================

async fn cmd_backtest(
    symbol: &str,
    days: usize,
    capital: f64,
    window: usize,
    threshold: f64,
) -> anyhow::Result<()> {
    println!("\n=== Trendlab v{} ===", APP_VERSION);

    let db = open_database().await?;
    let repo = PriceRepository::new(db.pool());
    let bars = repo.get_series(symbol, None).await?;
    if bars.is_empty() {
        anyhow::bail!("No price history for {} — run `trendlab sync` first", symbol);
    }
    let series: Vec<PricePoint> = bars.iter().map(price_point).collect();

    let params = BacktestParams {
        window_length: window,
        evaluation_days: days,
        initial_capital: capital,
        entry_threshold: threshold,
    };
    let forecaster: Arc<dyn Forecaster> = Arc::new(EmaMomentumForecaster::default());

    println!(
        "Symbol: {} | Days: {} | Window: {} | Capital: {:.2} | Threshold: {:.2}%",
        symbol,
        days,
        window,
        capital,
        threshold * 100.0
    );

    // Ctrl+C flips the flag; the simulator observes it between steps
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_for_ctrlc = cancelled.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, cancelling backtest...");
        cancelled_for_ctrlc.store(true, Ordering::Relaxed);
    });

    let params_for_run = params.clone();
    let cancelled_for_run = cancelled.clone();
    let forecaster_for_run = forecaster.clone();
    let result = tokio::task::spawn_blocking(move || {
        Simulator::run_with_cancel(
            &params_for_run,
            &series,
            forecaster_for_run.as_ref(),
            &cancelled_for_run,
        )
    })
    .await??;

    print_result(&result);

    let record = run_record(symbol, forecaster.name(), &params, &result);
    let runs = RunRepository::new(db.pool());
    runs.save(&record).await?;

    Ok(())
}

fn print_result(result: &BacktestResult) {
    println!("\nBacktest Result:");
    println!("  {}", "-".repeat(44));
    println!("  {:<22} {:>20.2}", "Initial capital", result.initial_capital);
    println!("  {:<22} {:>20.2}", "Final capital", result.final_capital);
    println!("  {:<22} {:>19.2}%", "Total return", result.total_return_pct);
    println!("  {:<22} {:>19.2}%", "Win rate", result.win_rate_pct);
    println!("  {:<22} {:>19.2}%", "Max drawdown", result.max_drawdown_pct);
    println!("  {:<22} {:>20.2}", "Profit factor", result.profit_factor);
    println!(
        "  {:<22} {:>20}",
        "Trades (wins/losses)",
        format!("{} ({}/{})", result.total_trades, result.wins, result.losses)
    );
    println!("  {:<22} {:>20}", "Equity samples", result.equity_curve.len());
}
