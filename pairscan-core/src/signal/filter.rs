//! Report filter: the subset of evaluated pairs worth acting on.

use crate::signal::engine::DivergenceRecord;
use serde::{Deserialize, Serialize};

/// Keeps pairs that were strongly correlated over the full history, have
/// decoupled recently, and diverged enough to be classified BUY or SELL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    /// Long correlation must be strictly above this.
    pub min_correlation: f64,
    /// Recent correlation must be strictly below this.
    pub max_recent_correlation: f64,
    /// |divergence| must be at least this.
    pub min_divergence: f64,
}

impl Default for ReportFilter {
    fn default() -> Self {
        Self {
            min_correlation: 0.875,
            max_recent_correlation: 0.0,
            min_divergence: 30.0,
        }
    }
}

impl ReportFilter {
    pub fn accepts(&self, record: &DivergenceRecord) -> bool {
        let (Some(long), Some(recent), Some(divergence)) = (
            record.long_correlation,
            record.recent_correlation,
            record.divergence,
        ) else {
            return false;
        };
        long > self.min_correlation
            && recent < self.max_recent_correlation
            && divergence.abs() >= self.min_divergence
            && record.position.is_actionable()
    }

    /// Matching records, in input order.
    pub fn apply(&self, records: &[DivergenceRecord]) -> Vec<DivergenceRecord> {
        records.iter().filter(|r| self.accepts(r)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::position::{Position, ProfitLoss};

    fn record(long: f64, recent: f64, divergence: f64, position: Position) -> DivergenceRecord {
        DivergenceRecord {
            symbol_1: "AAAUSDT".into(),
            symbol_2: "BBBUSDT".into(),
            long_correlation: Some(long),
            recent_correlation: Some(recent),
            divergence: Some(divergence),
            position,
            entry_price: Some(1.0),
            current_price: Some(1.0),
            profit_loss: ProfitLoss::Percent(0.0),
        }
    }

    #[test]
    fn accepts_decoupled_divergent_pair() {
        let f = ReportFilter::default();
        assert!(f.accepts(&record(0.9, -0.2, 35.0, Position::Sell)));
        assert!(f.accepts(&record(0.9, -0.2, -30.0, Position::Buy)));
    }

    #[test]
    fn rejects_on_each_threshold() {
        let f = ReportFilter::default();
        assert!(!f.accepts(&record(0.875, -0.2, 35.0, Position::Sell)));
        assert!(!f.accepts(&record(0.9, 0.0, 35.0, Position::Sell)));
        assert!(!f.accepts(&record(0.9, -0.2, 29.9, Position::Sell)));
    }

    #[test]
    fn rejects_hold() {
        // |divergence| == 30 passes the filter threshold but classifies HOLD.
        let f = ReportFilter::default();
        assert!(!f.accepts(&record(0.9, -0.2, 30.0, Position::Hold)));
    }

    #[test]
    fn rejects_undefined_values() {
        let mut r = record(0.9, -0.2, 35.0, Position::Sell);
        r.recent_correlation = None;
        assert!(!ReportFilter::default().accepts(&r));
    }

    #[test]
    fn apply_preserves_order() {
        let mut first = record(0.9, -0.5, 40.0, Position::Sell);
        first.symbol_1 = "ZZZUSDT".into();
        let records = vec![
            first,
            record(0.5, -0.5, 40.0, Position::Hold),
            record(0.95, -0.1, -45.0, Position::Buy),
        ];
        let kept = ReportFilter::default().apply(&records);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].symbol_1, "ZZZUSDT");
        assert_eq!(kept[1].position, Position::Buy);
    }
}
