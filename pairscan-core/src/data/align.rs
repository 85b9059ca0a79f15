//! Multi-symbol time alignment and cleaning.
//!
//! Closing-price series are outer-joined on timestamp. Missing cells stay
//! missing (no forward-fill). Cleaning then drops sparse columns and any row
//! that still has a gap, producing a [`CleanTable`] with no missing cells.

use super::provider::Kline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors from alignment and cleaning.
#[derive(Debug, Error, PartialEq)]
pub enum CleanError {
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("malformed table: {0}")]
    Shape(String),
}

/// Closing prices of one instrument, keyed by candle close time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentSeries {
    pub symbol: String,
    points: BTreeMap<DateTime<Utc>, f64>,
}

impl InstrumentSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            points: BTreeMap::new(),
        }
    }

    /// Series of close prices keyed by each kline's close time.
    pub fn from_klines(symbol: impl Into<String>, klines: &[Kline]) -> Self {
        let mut series = Self::new(symbol);
        for k in klines {
            series.insert(k.close_time, k.close);
        }
        series
    }

    /// Later inserts at the same timestamp overwrite earlier ones.
    pub fn insert(&mut self, at: DateTime<Utc>, close: f64) {
        self.points.insert(at, close);
    }

    pub fn get(&self, at: &DateTime<Utc>) -> Option<f64> {
        self.points.get(at).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in ascending time order.
    pub fn iter(&self) -> impl Iterator<Item = (&DateTime<Utc>, &f64)> {
        self.points.iter()
    }
}

/// Outer join of several series on timestamp. Cells may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTable {
    timestamps: Vec<DateTime<Utc>>,
    symbols: Vec<String>,
    /// Column-major: `columns[c][r]`.
    columns: Vec<Vec<Option<f64>>>,
}

/// What cleaning removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Dropped columns with their missing ratio.
    pub dropped_columns: Vec<(String, f64)>,
    pub dropped_rows: usize,
    pub kept_columns: usize,
    pub kept_rows: usize,
}

/// Align multiple series to the union of their timestamps.
///
/// Column order follows input order. A symbol given twice is merged into a
/// single column.
pub fn align_series(series: Vec<InstrumentSeries>) -> AlignedTable {
    let mut all_times = BTreeSet::new();
    for s in &series {
        all_times.extend(s.points.keys().copied());
    }
    let timestamps: Vec<DateTime<Utc>> = all_times.into_iter().collect();

    let mut merged: Vec<InstrumentSeries> = Vec::with_capacity(series.len());
    let mut position: HashMap<String, usize> = HashMap::new();
    for s in series {
        match position.get(&s.symbol) {
            Some(&i) => merged[i].points.extend(s.points),
            None => {
                position.insert(s.symbol.clone(), merged.len());
                merged.push(s);
            }
        }
    }

    let symbols = merged.iter().map(|s| s.symbol.clone()).collect();
    let columns = merged
        .iter()
        .map(|s| timestamps.iter().map(|t| s.get(t)).collect())
        .collect();

    AlignedTable {
        timestamps,
        symbols,
        columns,
    }
}

impl AlignedTable {
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column(&self, symbol: &str) -> Option<&[Option<f64>]> {
        let i = self.symbols.iter().position(|s| s == symbol)?;
        Some(&self.columns[i])
    }

    /// Missing cells per column, in column order.
    pub fn missing_counts(&self) -> Vec<(String, usize)> {
        self.symbols
            .iter()
            .zip(&self.columns)
            .map(|(s, col)| (s.clone(), col.iter().filter(|v| v.is_none()).count()))
            .collect()
    }

    /// Drop sparse columns, then every row with a remaining gap.
    ///
    /// A column survives only if its missing ratio is strictly below
    /// `max_missing_ratio`. Row pruning is strict: no interpolation.
    pub fn clean(&self, max_missing_ratio: f64) -> Result<(CleanTable, CleanReport), CleanError> {
        let rows = self.row_count();
        if rows == 0 || self.symbols.is_empty() {
            return Err(CleanError::InsufficientData {
                reason: "no price data was aligned".into(),
            });
        }

        let mut report = CleanReport::default();
        let mut kept: Vec<usize> = Vec::new();
        for (c, (symbol, missing)) in self.missing_counts().into_iter().enumerate() {
            let ratio = missing as f64 / rows as f64;
            if ratio < max_missing_ratio {
                kept.push(c);
            } else {
                tracing::warn!(symbol = %symbol, missing_ratio = ratio, "dropping sparse column");
                report.dropped_columns.push((symbol, ratio));
            }
        }

        if kept.is_empty() {
            return Err(CleanError::InsufficientData {
                reason: format!(
                    "every column has at least {:.0}% missing rows",
                    max_missing_ratio * 100.0
                ),
            });
        }

        let complete_rows: Vec<usize> = (0..rows)
            .filter(|&r| kept.iter().all(|&c| self.columns[c][r].is_some()))
            .collect();
        report.dropped_rows = rows - complete_rows.len();

        if complete_rows.is_empty() {
            return Err(CleanError::InsufficientData {
                reason: "no timestamp has a price for every remaining symbol".into(),
            });
        }

        let timestamps = complete_rows.iter().map(|&r| self.timestamps[r]).collect();
        let symbols = kept.iter().map(|&c| self.symbols[c].clone()).collect();
        let columns = kept
            .iter()
            .map(|&c| {
                complete_rows
                    .iter()
                    .filter_map(|&r| self.columns[c][r])
                    .collect()
            })
            .collect();

        report.kept_columns = kept.len();
        report.kept_rows = complete_rows.len();

        Ok((
            CleanTable {
                timestamps,
                symbols,
                columns,
            },
            report,
        ))
    }
}

/// Time-indexed price table with no missing cells.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanTable {
    timestamps: Vec<DateTime<Utc>>,
    symbols: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl CleanTable {
    /// Build a table directly. Timestamps must be strictly ascending and every
    /// column as long as the timestamp axis.
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        symbols: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, CleanError> {
        if symbols.len() != columns.len() {
            return Err(CleanError::Shape(format!(
                "{} symbols but {} columns",
                symbols.len(),
                columns.len()
            )));
        }
        if let Some((s, col)) = symbols
            .iter()
            .zip(&columns)
            .find(|(_, col)| col.len() != timestamps.len())
        {
            return Err(CleanError::Shape(format!(
                "column {s} has {} rows, expected {}",
                col.len(),
                timestamps.len()
            )));
        }
        if timestamps.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CleanError::Shape(
                "timestamps must be strictly ascending".into(),
            ));
        }
        Ok(Self {
            timestamps,
            symbols,
            columns,
        })
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.symbols.is_empty()
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        let i = self.symbols.iter().position(|s| s == symbol)?;
        Some(&self.columns[i])
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    /// Prices of every symbol at `row`.
    pub fn row(&self, row: usize) -> Option<HashMap<String, f64>> {
        if row >= self.row_count() {
            return None;
        }
        Some(
            self.symbols
                .iter()
                .zip(&self.columns)
                .map(|(s, col)| (s.clone(), col[row]))
                .collect(),
        )
    }

    /// The last `n` rows (all rows if fewer).
    pub fn tail(&self, n: usize) -> CleanTable {
        let start = self.row_count().saturating_sub(n);
        CleanTable {
            timestamps: self.timestamps[start..].to_vec(),
            symbols: self.symbols.clone(),
            columns: self.columns.iter().map(|c| c[start..].to_vec()).collect(),
        }
    }

    /// Row whose timestamp is closest to `target`.
    pub fn nearest_row(&self, target: DateTime<Utc>) -> Option<usize> {
        nearest_index(&self.timestamps, target)
    }

    /// BLAKE3 over symbols, timestamps and prices, in column order.
    pub fn dataset_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for t in &self.timestamps {
            hasher.update(&t.timestamp_millis().to_le_bytes());
        }
        for (symbol, col) in self.symbols.iter().zip(&self.columns) {
            hasher.update(symbol.as_bytes());
            for v in col {
                hasher.update(&v.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Index of the timestamp closest to `target` by absolute time distance.
///
/// `timestamps` must be ascending. On an exact tie the earlier timestamp
/// wins. Returns `None` only for an empty slice.
pub fn nearest_index(timestamps: &[DateTime<Utc>], target: DateTime<Utc>) -> Option<usize> {
    if timestamps.is_empty() {
        return None;
    }
    let after = timestamps.partition_point(|t| *t < target);
    if after == 0 {
        return Some(0);
    }
    if after == timestamps.len() {
        return Some(timestamps.len() - 1);
    }
    let before = after - 1;
    let d_before = target - timestamps[before];
    let d_after = timestamps[after] - target;
    if d_after < d_before {
        Some(after)
    } else {
        Some(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn series(symbol: &str, points: &[(i64, f64)]) -> InstrumentSeries {
        let mut s = InstrumentSeries::new(symbol);
        for &(m, p) in points {
            s.insert(ts(m), p);
        }
        s
    }

    #[test]
    fn align_fills_missing_with_none() {
        let aligned = align_series(vec![
            series("BTCUSDT", &[(0, 100.0), (15, 101.0), (30, 102.0)]),
            series("ETHUSDT", &[(0, 200.0), (30, 202.0)]),
        ]);

        assert_eq!(aligned.row_count(), 3);
        assert_eq!(aligned.symbols(), ["BTCUSDT", "ETHUSDT"]);
        assert_eq!(aligned.column("BTCUSDT").unwrap()[1], Some(101.0));
        assert_eq!(aligned.column("ETHUSDT").unwrap()[1], None);
        assert_eq!(
            aligned.missing_counts(),
            vec![("BTCUSDT".to_string(), 0), ("ETHUSDT".to_string(), 1)]
        );
    }

    #[test]
    fn duplicate_symbol_merges_into_one_column() {
        let aligned = align_series(vec![
            series("BTCUSDT", &[(0, 100.0)]),
            series("BTCUSDT", &[(15, 101.0)]),
        ]);
        assert_eq!(aligned.symbols().len(), 1);
        assert_eq!(aligned.column("BTCUSDT").unwrap(), [Some(100.0), Some(101.0)]);
    }

    #[test]
    fn from_klines_keys_by_close_time() {
        let open_time = ts(0);
        let kline = Kline {
            open_time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            close_time: open_time + Duration::minutes(15) - Duration::milliseconds(1),
            quote_volume: 15.0,
            trades: 3,
        };
        let s = InstrumentSeries::from_klines("BTCUSDT", &[kline.clone()]);
        assert_eq!(s.get(&kline.close_time), Some(1.5));
        assert_eq!(s.get(&open_time), None);
    }

    #[test]
    fn clean_drops_sparse_column_then_gappy_rows() {
        // 10 rows. ETH misses 1 (10%: dropped at the 0.10 threshold),
        // SOL misses 0, XRP misses 5.
        let full: Vec<(i64, f64)> = (0..10).map(|i| (i * 15, 100.0 + i as f64)).collect();
        let eth: Vec<(i64, f64)> = full.iter().copied().filter(|(m, _)| *m != 45).collect();
        let xrp: Vec<(i64, f64)> = full.iter().copied().take(5).collect();

        let aligned = align_series(vec![
            series("BTCUSDT", &full),
            series("ETHUSDT", &eth),
            series("SOLUSDT", &full),
            series("XRPUSDT", &xrp),
        ]);
        let (clean, report) = aligned.clean(0.10).unwrap();

        assert_eq!(clean.symbols(), ["BTCUSDT", "SOLUSDT"]);
        assert_eq!(clean.row_count(), 10);
        assert_eq!(report.dropped_columns.len(), 2);
        assert_eq!(report.dropped_columns[0].0, "ETHUSDT");
        assert_eq!(report.dropped_rows, 0);
    }

    #[test]
    fn clean_removes_rows_with_remaining_gaps() {
        let a: Vec<(i64, f64)> = (0..20).map(|i| (i, 1.0)).collect();
        let b: Vec<(i64, f64)> = (0..20).filter(|i| *i != 7).map(|i| (i, 2.0)).collect();
        let aligned = align_series(vec![series("A", &a), series("B", &b)]);

        let (clean, report) = aligned.clean(0.10).unwrap();
        assert_eq!(clean.row_count(), 19);
        assert_eq!(report.dropped_rows, 1);
        assert!(!clean.timestamps().contains(&ts(7)));
    }

    #[test]
    fn clean_of_empty_table_is_insufficient() {
        let aligned = align_series(vec![]);
        assert!(matches!(
            aligned.clean(0.1),
            Err(CleanError::InsufficientData { .. })
        ));
    }

    #[test]
    fn clean_with_all_columns_sparse_is_insufficient() {
        let aligned = align_series(vec![series("A", &[(0, 1.0)]), series("B", &[(1, 1.0)])]);
        assert!(matches!(
            aligned.clean(0.1),
            Err(CleanError::InsufficientData { .. })
        ));
    }

    #[test]
    fn clean_table_rejects_bad_shapes() {
        let one = || vec!["A".to_string()];
        assert!(CleanTable::new(vec![ts(0)], one(), vec![vec![1.0, 2.0]]).is_err());
        assert!(CleanTable::new(vec![ts(1), ts(0)], one(), vec![vec![1.0, 2.0]]).is_err());
        let two = vec!["A".to_string(), "B".to_string()];
        assert!(CleanTable::new(vec![ts(0)], two, vec![vec![1.0]]).is_err());
    }

    #[test]
    fn tail_keeps_last_rows() {
        let table = CleanTable::new(
            (0..5).map(ts).collect(),
            vec!["A".into()],
            vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]],
        )
        .unwrap();
        let tail = table.tail(2);
        assert_eq!(tail.column("A").unwrap(), [4.0, 5.0]);
        assert_eq!(tail.timestamps(), [ts(3), ts(4)]);
        assert_eq!(table.tail(99).row_count(), 5);
    }

    #[test]
    fn nearest_prefers_exact_match() {
        let times = vec![ts(0), ts(15), ts(30)];
        assert_eq!(nearest_index(&times, ts(15)), Some(1));
    }

    #[test]
    fn nearest_picks_closest_by_time() {
        let times = vec![ts(0), ts(15), ts(30)];
        assert_eq!(nearest_index(&times, ts(4)), Some(0));
        assert_eq!(nearest_index(&times, ts(11)), Some(1));
        assert_eq!(nearest_index(&times, ts(-100)), Some(0));
        assert_eq!(nearest_index(&times, ts(500)), Some(2));
    }

    #[test]
    fn nearest_tie_goes_to_earlier() {
        let times = vec![ts(0), ts(10)];
        assert_eq!(nearest_index(&times, ts(5)), Some(0));
    }

    #[test]
    fn nearest_on_empty_is_none() {
        assert_eq!(nearest_index(&[], ts(0)), None);
    }

    #[test]
    fn dataset_hash_is_deterministic_and_sensitive() {
        let make = |last: f64| {
            CleanTable::new(vec![ts(0), ts(1)], vec!["A".into()], vec![vec![1.0, last]]).unwrap()
        };
        assert_eq!(make(2.0).dataset_hash(), make(2.0).dataset_hash());
        assert_ne!(make(2.0).dataset_hash(), make(2.5).dataset_hash());
    }
}
