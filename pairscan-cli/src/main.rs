//! Pairscan CLI: correlation-divergence scans over Binance spot pairs.
//!
//! Commands:
//! - `scan`: fetch the universe, evaluate every pair, save artifacts
//! - `universe`: print the instruments a scan would use
//! - `fetch`: paginated kline download for one symbol, as CSV
//! - `init-config`: write the default TOML config

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pairscan_core::data::{
    BinanceProvider, HistoricalFetcher, Interval, LogProgress, MarketDataProvider, RateLimiter,
    SyntheticProvider, ThreadSleeper, UniverseSelector,
};
use pairscan_runner::config::MAX_LOOKBACK_DAYS;
use pairscan_runner::export::export_klines_csv;
use pairscan_runner::{run_scan, save_artifacts, ScanConfig, ScanOptions, ScanOutcome, ScanReport};

#[derive(Parser)]
#[command(
    name = "pairscan",
    about = "Pairscan CLI: correlation-divergence scanner for crypto spot pairs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch history for the universe, evaluate every pair, and save a report.
    Scan {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the built-in synthetic market instead of the live API.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Output directory. Overrides `report.output_dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Entry timestamp for P&L (RFC 3339 or `YYYY-MM-DD HH:MM:SS`, UTC).
        #[arg(long)]
        entry_time: Option<String>,
    },
    /// Print the ranked universe.
    Universe {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        synthetic: bool,
    },
    /// Download klines for one symbol, following pagination.
    Fetch {
        /// Symbol, e.g. BTCUSDT.
        symbol: String,

        /// Interval code (1m, 5m, 15m, 1h, 4h, 1d, ...).
        #[arg(long, default_value = "15m")]
        interval: String,

        /// Days of history ending now.
        #[arg(long, default_value_t = 30)]
        days: i64,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// CSV output file. Prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write the default configuration as TOML.
    InitConfig {
        /// Output file. Prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            config,
            synthetic,
            output_dir,
            entry_time,
        } => run_scan_cmd(config, synthetic, output_dir, entry_time),
        Commands::Universe { config, synthetic } => run_universe_cmd(config, synthetic),
        Commands::Fetch {
            symbol,
            interval,
            days,
            config,
            synthetic,
            output,
        } => run_fetch_cmd(&symbol, &interval, days, config, synthetic, output),
        Commands::InitConfig { output } => run_init_config(output.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ScanConfig> {
    match path {
        Some(p) => Ok(ScanConfig::from_file(p)?),
        None => Ok(ScanConfig::default()),
    }
}

fn build_provider(
    config: &ScanConfig,
    interval: Interval,
    synthetic: bool,
    now: DateTime<Utc>,
) -> Result<Box<dyn MarketDataProvider>> {
    if synthetic {
        tracing::warn!("using the synthetic market; prices are not real");
        return Ok(Box::new(SyntheticProvider::demo(interval, now)));
    }
    let provider = BinanceProvider::new(
        config.api.base_url.clone(),
        config.api.api_key(),
        config.api.timeout(),
    )?;
    Ok(Box::new(provider))
}

fn parse_entry_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("invalid entry time '{s}'"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn run_scan_cmd(
    config_path: Option<PathBuf>,
    synthetic: bool,
    output_dir: Option<PathBuf>,
    entry_time: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    if let Some(dir) = output_dir {
        config.report.output_dir = dir;
    }
    if let Some(ts) = entry_time.as_deref() {
        config.report.entry_time = Some(parse_entry_time(ts)?);
    }

    let now = Utc::now();
    let provider = build_provider(&config, config.history.interval, synthetic, now)?;
    let opts = ScanOptions {
        synthetic,
        ..ScanOptions::new(now)
    };

    match run_scan(&config, provider.as_ref(), &opts, Some(&LogProgress))? {
        ScanOutcome::InsufficientData { reason } => {
            println!("Not enough data to evaluate: {reason}");
            println!("No report was written.");
            Ok(())
        }
        ScanOutcome::Completed(report) => {
            print_summary(&report);
            let run_dir = save_artifacts(&report, &config.report.output_dir)?;
            println!("Artifacts saved to: {}", run_dir.display());
            Ok(())
        }
    }
}

fn print_summary(report: &ScanReport) {
    println!();
    println!(
        "Scanned {} symbols over {} rows ({} to {})",
        report.symbols.len(),
        report.row_count,
        report.start.format("%Y-%m-%d %H:%M"),
        report.end.format("%Y-%m-%d %H:%M"),
    );
    if report.synthetic {
        println!("Data: SYNTHETIC");
    }
    for (symbol, ratio) in &report.clean_report.dropped_columns {
        println!("Dropped {symbol}: {:.1}% missing", ratio * 100.0);
    }
    println!(
        "{} pairs evaluated, {} reported",
        report.records.len(),
        report.filtered.len()
    );

    if report.filtered.is_empty() {
        return;
    }
    println!();
    println!(
        "{:<12} {:<12} {:>9} {:>9} {:>10} {:<5} {:>10}",
        "Symbol 1", "Symbol 2", "Long", "Recent", "Diverg %", "Pos", "P&L %"
    );
    println!("{}", "-".repeat(73));
    for r in &report.filtered {
        println!(
            "{:<12} {:<12} {:>9} {:>9} {:>10} {:<5} {:>10}",
            r.symbol_1,
            r.symbol_2,
            fmt_opt(r.long_correlation, 4),
            fmt_opt(r.recent_correlation, 4),
            fmt_opt(r.divergence, 2),
            r.position.to_string(),
            r.profit_loss.percent().map_or("-".to_string(), |p| format!("{p:.2}")),
        );
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or("-".to_string(), |v| format!("{v:.precision$}"))
}

fn run_universe_cmd(config_path: Option<PathBuf>, synthetic: bool) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let provider = build_provider(&config, config.history.interval, synthetic, Utc::now())?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_config(), Arc::new(ThreadSleeper)));
    let fetcher = HistoricalFetcher::new(provider.as_ref(), limiter, config.fetch_config());
    let tickers = fetcher.ticker_snapshot()?;

    let selector = UniverseSelector::new(config.universe.quote_asset.clone(), config.universe.size);
    let ranked = selector.ranked(&tickers);
    if ranked.is_empty() {
        println!("No {} instruments found.", config.universe.quote_asset);
        return Ok(());
    }

    println!("{:>4} {:<14} {:>20} {:>16}", "Rank", "Symbol", "Quote Volume", "Last Price");
    println!("{}", "-".repeat(57));
    for (i, t) in ranked.iter().take(config.universe.size).enumerate() {
        println!(
            "{:>4} {:<14} {:>20.0} {:>16}",
            i + 1,
            t.symbol,
            t.quote_volume,
            t.last_price
        );
    }
    if ranked.len() > config.universe.size {
        println!("({} more not selected)", ranked.len() - config.universe.size);
    }
    Ok(())
}

fn run_fetch_cmd(
    symbol: &str,
    interval: &str,
    days: i64,
    config_path: Option<PathBuf>,
    synthetic: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
        bail!("--days must be within 1..={MAX_LOOKBACK_DAYS}, got {days}");
    }
    let interval: Interval = interval.parse()?;
    let config = load_config(config_path.as_deref())?;
    let now = Utc::now();
    let provider = build_provider(&config, interval, synthetic, now)?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_config(), Arc::new(ThreadSleeper)));
    let fetcher = HistoricalFetcher::new(provider.as_ref(), limiter, config.fetch_config());
    let klines = fetcher.fetch_lookback(symbol, interval, days, now)?;
    tracing::info!(symbol, klines = klines.len(), "fetched");

    let csv = export_klines_csv(&klines)?;
    match output {
        Some(path) => {
            std::fs::write(&path, csv)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} klines to {}", klines.len(), path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

fn run_init_config(output: Option<&Path>) -> Result<()> {
    let toml = ScanConfig::default().to_toml()?;
    match output {
        Some(path) => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(path, toml)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
        None => print!("{toml}"),
    }
    Ok(())
}
