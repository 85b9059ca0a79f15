//! Scan pipeline: universe, paginated fetch, alignment, signals, filter.
//!
//! `run_scan` is the single entry point used by the CLI. Every provider call
//! in a run goes through one `HistoricalFetcher`, so the whole run shares a
//! single request budget. A transport failure aborts the run; running out of
//! usable data does not, and is reported as `ScanOutcome::InsufficientData`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pairscan_core::data::{
    align_series, CleanError, CleanReport, DataError, FetchProgress, HistoricalFetcher,
    InstrumentSeries, Interval, MarketDataProvider, RateLimiter, Sleeper, ThreadSleeper,
    UniverseSelector,
};
use pairscan_core::signal::{CorrelationMatrix, DivergenceRecord, SignalEngine};

use crate::config::{ConfigError, ScanConfig};

/// Errors that abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("cleaning error: {0}")]
    Clean(#[from] CleanError),
}

/// Current schema version for persisted scan reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Everything a completed scan produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub provider: String,
    /// Built from the synthetic market, not real prices.
    pub synthetic: bool,
    pub interval: Interval,
    pub lookback_days: i64,
    /// Symbols requested, in fetch order.
    pub universe: Vec<String>,
    /// Symbols that survived cleaning, in column order.
    pub symbols: Vec<String>,
    pub dataset_hash: String,
    pub clean_report: CleanReport,
    pub row_count: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub entry_row_time: Option<DateTime<Utc>>,
    pub change_start_time: Option<DateTime<Utc>>,
    pub changes: BTreeMap<String, Option<f64>>,
    pub correlation: CorrelationMatrix,
    pub recent_correlation: CorrelationMatrix,
    pub records: Vec<DivergenceRecord>,
    pub filtered: Vec<DivergenceRecord>,
    pub rate_limit_cooldowns: u32,
}

/// How a scan ended.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(Box<ScanReport>),
    /// Not enough data to evaluate. No report is produced.
    InsufficientData { reason: String },
}

/// Runtime inputs that are not part of the config file.
#[derive(Clone)]
pub struct ScanOptions {
    /// End of the history window.
    pub now: DateTime<Utc>,
    pub synthetic: bool,
    /// Used for cooldowns and inter-page pauses.
    pub sleeper: Arc<dyn Sleeper>,
}

impl ScanOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            synthetic: false,
            sleeper: Arc::new(ThreadSleeper),
        }
    }
}

/// Run a full scan against `provider`.
pub fn run_scan(
    config: &ScanConfig,
    provider: &dyn MarketDataProvider,
    opts: &ScanOptions,
    progress: Option<&dyn FetchProgress>,
) -> Result<ScanOutcome, ScanError> {
    config.validate()?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_config(), opts.sleeper.clone()));
    let fetcher = HistoricalFetcher::new(provider, limiter, config.fetch_config())
        .with_sleeper(opts.sleeper.clone());

    let universe = resolve_universe(config, &fetcher)?;
    if universe.is_empty() {
        return Ok(ScanOutcome::InsufficientData {
            reason: format!(
                "no {} instruments available from {}",
                config.universe.quote_asset,
                fetcher.provider_name()
            ),
        });
    }
    tracing::info!(symbols = universe.len(), "universe selected");

    let series = fetch_universe(
        &fetcher,
        &universe,
        config.history.interval,
        config.history.lookback_days,
        opts.now,
        config.history.parallel,
        progress,
    )?;

    let aligned = align_series(series);
    for (symbol, missing) in aligned.missing_counts() {
        if missing > 0 {
            tracing::info!(symbol = %symbol, missing, rows = aligned.row_count(), "missing values");
        }
    }

    let (table, clean_report) = match aligned.clean(config.cleaning.max_missing_ratio) {
        Ok(cleaned) => cleaned,
        Err(CleanError::InsufficientData { reason }) => {
            tracing::warn!(%reason, "not enough data to evaluate");
            return Ok(ScanOutcome::InsufficientData { reason });
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(
        columns = clean_report.kept_columns,
        rows = clean_report.kept_rows,
        dropped_rows = clean_report.dropped_rows,
        "aligned and cleaned"
    );

    let current_prices = current_prices(&fetcher, table.symbols())?;

    let engine = SignalEngine::new(config.signal_config());
    let output = engine.evaluate(&table, config.report.entry_time, &current_prices);
    let filtered = config.report_filter().apply(&output.records);
    tracing::info!(
        pairs = output.records.len(),
        actionable = output.actionable().count(),
        reported = filtered.len(),
        "signals evaluated"
    );

    // Non-empty table guaranteed by clean().
    let (Some(start), Some(end)) = (table.first_timestamp(), table.last_timestamp()) else {
        return Ok(ScanOutcome::InsufficientData {
            reason: "cleaned table has no rows".into(),
        });
    };

    let (change_start_time, changes) = match output.changes {
        Some(c) => (Some(c.start_time), c.changes),
        None => (None, BTreeMap::new()),
    };

    Ok(ScanOutcome::Completed(Box::new(ScanReport {
        schema_version: SCHEMA_VERSION,
        generated_at: opts.now,
        provider: fetcher.provider_name().to_string(),
        synthetic: opts.synthetic,
        interval: config.history.interval,
        lookback_days: config.history.lookback_days,
        universe,
        symbols: table.symbols().to_vec(),
        dataset_hash: table.dataset_hash(),
        clean_report,
        row_count: table.row_count(),
        start,
        end,
        entry_row_time: output.entry_row_time,
        change_start_time,
        changes,
        correlation: output.long,
        recent_correlation: output.recent,
        records: output.records,
        filtered,
        rate_limit_cooldowns: fetcher.limiter().cooldowns(),
    })))
}

/// Explicit symbols from the config, or the top instruments by quote volume.
pub fn resolve_universe(
    config: &ScanConfig,
    fetcher: &HistoricalFetcher<'_>,
) -> Result<Vec<String>, DataError> {
    if !config.universe.symbols.is_empty() {
        let mut seen = HashSet::new();
        return Ok(config
            .universe
            .symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect());
    }
    let tickers = fetcher.ticker_snapshot()?;
    let selector = UniverseSelector::new(config.universe.quote_asset.clone(), config.universe.size);
    Ok(selector.select(&tickers))
}

/// Fetch the lookback window of every symbol, in universe order.
///
/// In parallel mode rayon workers share the fetcher and therefore its rate
/// limiter. No new symbol is started once a fetch has failed; the failure with
/// the lowest universe index among those attempted is returned.
pub fn fetch_universe(
    fetcher: &HistoricalFetcher<'_>,
    symbols: &[String],
    interval: Interval,
    lookback_days: i64,
    now: DateTime<Utc>,
    parallel: bool,
    progress: Option<&dyn FetchProgress>,
) -> Result<Vec<InstrumentSeries>, DataError> {
    let total = symbols.len();
    let fetch_one = |index: usize, symbol: &String| -> Result<InstrumentSeries, DataError> {
        if let Some(p) = progress {
            p.on_start(symbol, index, total);
        }
        let result = fetcher.fetch_lookback(symbol, interval, lookback_days, now);
        if let Some(p) = progress {
            let summary = result.as_ref().map(Vec::len).map_err(DataError::clone);
            p.on_complete(symbol, index, total, &summary);
        }
        let klines = result?;
        if klines.is_empty() {
            tracing::warn!(symbol = %symbol, "no klines in the lookback window");
        }
        Ok(InstrumentSeries::from_klines(symbol.clone(), &klines))
    };

    let failed = AtomicBool::new(false);
    let fetch_unless_failed = |index: usize, symbol: &String| {
        if failed.load(Ordering::Relaxed) {
            return None;
        }
        let result = fetch_one(index, symbol);
        if result.is_err() {
            failed.store(true, Ordering::Relaxed);
        }
        Some(result)
    };

    // Symbols skipped after a failure come back as None.
    let results: Vec<Option<Result<InstrumentSeries, DataError>>> = if parallel {
        symbols
            .par_iter()
            .enumerate()
            .map(|(i, s)| fetch_unless_failed(i, s))
            .collect()
    } else {
        symbols
            .iter()
            .enumerate()
            .map(|(i, s)| fetch_unless_failed(i, s))
            .collect()
    };

    if let Some(p) = progress {
        let succeeded = results.iter().flatten().filter(|r| r.is_ok()).count();
        p.on_batch_complete(succeeded, total);
    }

    results.into_iter().flatten().collect()
}

/// Live prices for `symbols` from a fresh ticker snapshot.
fn current_prices(
    fetcher: &HistoricalFetcher<'_>,
    symbols: &[String],
) -> Result<HashMap<String, f64>, DataError> {
    let tickers = fetcher.ticker_snapshot()?;
    let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
    let prices: HashMap<String, f64> = tickers
        .into_iter()
        .filter(|t| wanted.contains(t.symbol.as_str()) && t.last_price.is_finite())
        .map(|t| (t.symbol, t.last_price))
        .collect();
    for symbol in symbols {
        if !prices.contains_key(symbol) {
            tracing::warn!(symbol = %symbol, "no live price, profit/loss not available");
        }
    }
    Ok(prices)
}
