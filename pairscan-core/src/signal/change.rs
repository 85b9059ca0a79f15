//! Percentage change over a lookback window.
//!
//! change = (end - start) / start * 100, where `end` is the last row and
//! `start` is the row nearest in time to `last - lookback`.

use crate::data::CleanTable;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Percentage change from `start` to `end`. Undefined unless `start > 0`.
pub fn percentage_change(start: f64, end: f64) -> Option<f64> {
    if start.is_nan() || start <= 0.0 || !end.is_finite() {
        return None;
    }
    Some((end - start) / start * 100.0)
}

/// Per-symbol change over one lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookbackChanges {
    /// Timestamp of the row used as the start price.
    pub start_time: DateTime<Utc>,
    /// Timestamp of the last row.
    pub end_time: DateTime<Utc>,
    pub changes: BTreeMap<String, Option<f64>>,
}

impl LookbackChanges {
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.changes.get(symbol).copied().flatten()
    }

    /// `change(a) - change(b)`, undefined if either side is.
    pub fn divergence(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.get(a)? - self.get(b)?)
    }
}

/// Change of every symbol over `lookback`, ending at the table's last row.
///
/// Returns `None` for an empty table or a lookback reaching past the
/// representable date range.
pub fn lookback_changes(table: &CleanTable, lookback: Duration) -> Option<LookbackChanges> {
    let end_time = table.last_timestamp()?;
    let end_row = table.row_count() - 1;
    let start_row = table.nearest_row(end_time.checked_sub_signed(lookback)?)?;
    let start_time = table.timestamps()[start_row];

    let changes = table
        .symbols()
        .iter()
        .zip(table.columns())
        .map(|(symbol, col)| {
            (
                symbol.clone(),
                percentage_change(col[start_row], col[end_row]),
            )
        })
        .collect();

    Some(LookbackChanges {
        start_time,
        end_time,
        changes,
    })
}
