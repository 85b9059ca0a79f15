//! Universe selection: the most liquid instruments of one quote asset.

use super::provider::Ticker;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How the scan universe is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSelector {
    /// Quote asset suffix, e.g. `USDT`.
    pub quote_asset: String,
    /// Number of symbols to keep.
    pub size: usize,
}

impl Default for UniverseSelector {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".into(),
            size: 50,
        }
    }
}

impl UniverseSelector {
    pub fn new(quote_asset: impl Into<String>, size: usize) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            size,
        }
    }

    /// Top `size` symbols quoted in `quote_asset`, by descending quote volume.
    ///
    /// The sort is stable: equal volumes keep snapshot order. NaN volumes
    /// rank last.
    pub fn select(&self, tickers: &[Ticker]) -> Vec<String> {
        self.ranked(tickers)
            .into_iter()
            .take(self.size)
            .map(|t| t.symbol.clone())
            .collect()
    }

    /// Every matching ticker, ranked.
    pub fn ranked<'t>(&self, tickers: &'t [Ticker]) -> Vec<&'t Ticker> {
        let mut matching: Vec<&Ticker> = tickers
            .iter()
            .filter(|t| t.symbol.ends_with(self.quote_asset.as_str()))
            .collect();
        matching.sort_by(|a, b| by_volume_desc(a.quote_volume, b.quote_volume));
        matching
    }
}

fn by_volume_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, quote_volume: f64) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            last_price: 1.0,
            quote_volume,
        }
    }

    #[test]
    fn filters_by_quote_suffix() {
        let tickers = vec![
            ticker("BTCUSDT", 10.0),
            ticker("ETHBTC", 100.0),
            ticker("ETHUSDT", 5.0),
        ];
        let picked = UniverseSelector::new("USDT", 50).select(&tickers);
        assert_eq!(picked, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn sorts_descending_and_truncates() {
        let tickers = vec![
            ticker("AUSDT", 1.0),
            ticker("BUSDT", 3.0),
            ticker("CUSDT", 2.0),
            ticker("DUSDT", 4.0),
        ];
        let picked = UniverseSelector::new("USDT", 2).select(&tickers);
        assert_eq!(picked, vec!["DUSDT", "BUSDT"]);
    }

    #[test]
    fn ties_keep_snapshot_order() {
        let tickers = vec![
            ticker("ZUSDT", 7.0),
            ticker("AUSDT", 7.0),
            ticker("MUSDT", 7.0),
        ];
        let picked = UniverseSelector::new("USDT", 3).select(&tickers);
        assert_eq!(picked, vec!["ZUSDT", "AUSDT", "MUSDT"]);
    }

    #[test]
    fn nan_volume_ranks_last() {
        let tickers = vec![ticker("AUSDT", f64::NAN), ticker("BUSDT", 1.0)];
        let picked = UniverseSelector::new("USDT", 2).select(&tickers);
        assert_eq!(picked, vec!["BUSDT", "AUSDT"]);
    }

    #[test]
    fn empty_snapshot_gives_empty_universe() {
        assert!(UniverseSelector::default().select(&[]).is_empty());
    }
}
