//! Pair evaluation: correlation, divergence, classification and P&L for
//! every ordered pair of a clean table.

use crate::data::CleanTable;
use crate::signal::change::{lookback_changes, LookbackChanges};
use crate::signal::correlation::CorrelationMatrix;
use crate::signal::position::{classify, profit_loss, ClassifyThresholds, Position, ProfitLoss};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Rows in the recent correlation window.
    pub recent_window: usize,
    /// Lookback of the percentage change, in days.
    pub change_lookback_days: i64,
    pub classify: ClassifyThresholds,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            recent_window: 30,
            change_lookback_days: 30,
            classify: ClassifyThresholds::default(),
        }
    }
}

/// One evaluated ordered pair. The position refers to `symbol_1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub symbol_1: String,
    pub symbol_2: String,
    pub long_correlation: Option<f64>,
    pub recent_correlation: Option<f64>,
    /// change(symbol_1) - change(symbol_2), percentage points.
    pub divergence: Option<f64>,
    pub position: Position,
    pub entry_price: Option<f64>,
    pub current_price: Option<f64>,
    pub profit_loss: ProfitLoss,
}

/// Everything computed for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOutput {
    pub long: CorrelationMatrix,
    pub recent: CorrelationMatrix,
    pub changes: Option<LookbackChanges>,
    /// Row whose prices were used as entry prices.
    pub entry_row_time: Option<DateTime<Utc>>,
    /// All ordered pairs (A, B), A != B, in column order.
    pub records: Vec<DivergenceRecord>,
}

impl SignalOutput {
    pub fn actionable(&self) -> impl Iterator<Item = &DivergenceRecord> {
        self.records.iter().filter(|r| r.position.is_actionable())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Evaluate every ordered pair of `table`.
    ///
    /// Entry prices come from the row at (or nearest to) `entry_time`, or the
    /// last row when `entry_time` is `None`. Current prices are looked up in
    /// `current_prices`; a symbol missing from it has no P&L.
    pub fn evaluate(
        &self,
        table: &CleanTable,
        entry_time: Option<DateTime<Utc>>,
        current_prices: &HashMap<String, f64>,
    ) -> SignalOutput {
        let long = CorrelationMatrix::from_table(table);
        let recent = CorrelationMatrix::from_table(&table.tail(self.config.recent_window));
        let changes = Duration::try_days(self.config.change_lookback_days)
            .and_then(|lookback| lookback_changes(table, lookback));

        let entry_row = match entry_time {
            Some(ts) => table.nearest_row(ts),
            None => table.row_count().checked_sub(1),
        };
        let entry_row_time = entry_row.map(|i| table.timestamps()[i]);
        let entry_prices = entry_row.and_then(|i| table.row(i)).unwrap_or_default();

        let symbols = table.symbols();
        let mut records = Vec::with_capacity(symbols.len() * symbols.len().saturating_sub(1));

        for (i, a) in symbols.iter().enumerate() {
            let entry_price = entry_prices.get(a).copied();
            let current_price = current_prices.get(a).copied();
            for (j, b) in symbols.iter().enumerate() {
                if i == j {
                    continue;
                }
                let long_correlation = long.at(i, j);
                let divergence = changes.as_ref().and_then(|c| c.divergence(a, b));
                let position = classify(long_correlation, divergence, &self.config.classify);
                records.push(DivergenceRecord {
                    symbol_1: a.clone(),
                    symbol_2: b.clone(),
                    long_correlation,
                    recent_correlation: recent.at(i, j),
                    divergence,
                    position,
                    entry_price,
                    current_price,
                    profit_loss: profit_loss(position, entry_price, current_price),
                });
            }
        }

        tracing::debug!(
            pairs = records.len(),
            rows = table.row_count(),
            recent_rows = recent_rows(table, self.config.recent_window),
            "evaluated pairs"
        );

        SignalOutput {
            long,
            recent,
            changes,
            entry_row_time,
            records,
        }
    }
}

fn recent_rows(table: &CleanTable, window: usize) -> usize {
    table.row_count().min(window)
}
