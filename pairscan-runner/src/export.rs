//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! - **JSON**: the full `ScanReport`, with schema versioning
//! - **CSV**: the filtered report, every evaluated pair, the correlation
//!   matrix, and raw klines for the `fetch` command
//! - **Markdown**: a human-readable scan summary
//!
//! Unknown schema versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pairscan_core::data::Kline;
use pairscan_core::signal::{CorrelationMatrix, DivergenceRecord};

use crate::pipeline::{ScanReport, SCHEMA_VERSION};

/// Report CSV columns, in order.
pub const REPORT_COLUMNS: [&str; 9] = [
    "symbol_1",
    "symbol_2",
    "long_correlation",
    "divergence_pct",
    "position",
    "entry_price",
    "current_price",
    "profit_loss",
    "recent_correlation",
];

fn opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_default()
}

fn price(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &ScanReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize ScanReport to JSON")
}

/// Deserialize a `ScanReport`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<ScanReport> {
    let report: ScanReport =
        serde_json::from_str(json).context("failed to deserialize ScanReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Pair records as CSV. Undefined numbers are empty cells; a P&L that does
/// not apply is `-`.
pub fn export_records_csv(records: &[DivergenceRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(REPORT_COLUMNS)?;

    for r in records {
        wtr.write_record([
            r.symbol_1.as_str(),
            r.symbol_2.as_str(),
            &opt(r.long_correlation, 6),
            &opt(r.divergence, 4),
            &r.position.to_string(),
            &price(r.entry_price),
            &price(r.current_price),
            &r.profit_loss.to_string(),
            &opt(r.recent_correlation, 6),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Square correlation matrix with a leading `symbol` column.
pub fn export_correlation_csv(matrix: &CorrelationMatrix) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["symbol".to_string()];
    header.extend(matrix.symbols().iter().cloned());
    wtr.write_record(&header)?;

    for (symbol, row) in matrix.symbols().iter().zip(matrix.rows()) {
        let mut record = vec![symbol.clone()];
        record.extend(row.iter().map(|v| opt(*v, 6)));
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Raw klines, one row per candle.
pub fn export_klines_csv(klines: &[Kline]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "open_time",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "close_time",
        "quote_volume",
        "trades",
    ])?;
    for k in klines {
        wtr.write_record([
            k.open_time.to_rfc3339(),
            k.open.to_string(),
            k.high.to_string(),
            k.low.to_string(),
            k.close.to_string(),
            k.volume.to_string(),
            k.close_time.to_rfc3339(),
            k.quote_volume.to_string(),
            k.trades.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for one scan.
///
/// Creates `scan_{timestamp}/` under `output_dir` containing:
/// - `report.csv`: filtered pairs
/// - `all_pairs.csv`: every evaluated pair
/// - `correlation.csv`: long-window correlation matrix
/// - `manifest.json`: the full `ScanReport`
/// - `summary.md`: Markdown summary
///
/// Returns the path to the created directory.
pub fn save_artifacts(report: &ScanReport, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!("scan_{}", report.generated_at.format("%Y%m%d_%H%M%S"));
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("report.csv", export_records_csv(&report.filtered)?),
        ("all_pairs.csv", export_records_csv(&report.records)?),
        ("correlation.csv", export_correlation_csv(&report.correlation)?),
        ("manifest.json", export_json(report)?),
        ("summary.md", generate_summary(report)),
    ];
    for (name, contents) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    tracing::info!(dir = %run_dir.display(), "artifacts saved");
    Ok(run_dir)
}

/// Load a `ScanReport` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<ScanReport> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown summary ───────────────────────────────────────────────

pub fn generate_summary(report: &ScanReport) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Pair Scan Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Generated | {} |\n", report.generated_at.to_rfc3339()));
    md.push_str(&format!("| Provider | {} |\n", report.provider));
    md.push_str(&format!(
        "| Interval | {} ({} days) |\n",
        report.interval, report.lookback_days
    ));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        report.start.to_rfc3339(),
        report.end.to_rfc3339()
    ));
    md.push_str(&format!(
        "| Symbols | {} requested, {} kept |\n",
        report.universe.len(),
        report.symbols.len()
    ));
    md.push_str(&format!(
        "| Rows | {} ({} dropped) |\n",
        report.row_count, report.clean_report.dropped_rows
    ));
    if let Some(entry) = report.entry_row_time {
        md.push_str(&format!("| Entry | {} |\n", entry.to_rfc3339()));
    }
    md.push_str(&format!("| Dataset Hash | {} |\n", report.dataset_hash));
    if report.rate_limit_cooldowns > 0 {
        md.push_str(&format!(
            "| Rate-limit cooldowns | {} |\n",
            report.rate_limit_cooldowns
        ));
    }
    if report.synthetic {
        md.push_str("| Data | **SYNTHETIC** |\n");
    }
    md.push('\n');

    if !report.clean_report.dropped_columns.is_empty() {
        md.push_str("## Dropped Symbols\n\n");
        for (symbol, ratio) in &report.clean_report.dropped_columns {
            md.push_str(&format!("- {symbol} ({:.1}% missing)\n", ratio * 100.0));
        }
        md.push('\n');
    }

    md.push_str("## Signals\n\n");
    if report.filtered.is_empty() {
        md.push_str("No pair passed the report filter.\n");
        return md;
    }
    md.push_str("| Pair | Position | Long Corr | Recent Corr | Divergence | P&L |\n");
    md.push_str("| --- | --- | ---: | ---: | ---: | ---: |\n");
    for r in &report.filtered {
        md.push_str(&format!(
            "| {}/{} | {} | {} | {} | {} | {} |\n",
            r.symbol_1,
            r.symbol_2,
            r.position,
            opt(r.long_correlation, 3),
            opt(r.recent_correlation, 3),
            opt(r.divergence, 2),
            r.profit_loss,
        ));
    }
    md
}
