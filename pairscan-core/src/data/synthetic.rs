//! Synthetic market for offline runs and tests.
//!
//! Prices are a closed-form function of (symbol, candle index): a shared
//! market factor scaled by a per-symbol beta, a per-symbol cycle, seeded
//! noise, and for some symbols a drift over the final 30 days. Because no
//! state is carried between candles, any page of any range is reproducible,
//! which is what pagination tests need.
//!
//! These are clearly fake prices. Reports built on them are tagged synthetic.

use super::provider::{DataError, Interval, Kline, KlineQuery, MarketDataProvider, Ticker};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::TAU;

/// Symbols of the demo market, roughly ordered by liquidity.
const DEMO_SYMBOLS: [&str; 64] = [
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT", "AVAXUSDT",
    "LINKUSDT", "TRXUSDT", "DOTUSDT", "MATICUSDT", "LTCUSDT", "BCHUSDT", "NEARUSDT", "UNIUSDT",
    "ATOMUSDT", "APTUSDT", "ARBUSDT", "OPUSDT", "FILUSDT", "ETCUSDT", "INJUSDT", "SUIUSDT",
    "SEIUSDT", "TIAUSDT", "RNDRUSDT", "STXUSDT", "IMXUSDT", "LDOUSDT", "AAVEUSDT", "MKRUSDT",
    "GRTUSDT", "SANDUSDT", "MANAUSDT", "AXSUSDT", "FTMUSDT", "ALGOUSDT", "XLMUSDT", "VETUSDT",
    "EOSUSDT", "XTZUSDT", "THETAUSDT", "EGLDUSDT", "FLOWUSDT", "CHZUSDT", "KAVAUSDT", "ZECUSDT",
    "DASHUSDT", "NEOUSDT", "IOTAUSDT", "ONEUSDT", "ZILUSDT", "ENJUSDT", "CRVUSDT", "SNXUSDT",
    "COMPUSDT", "YFIUSDT", "SUSHIUSDT", "1INCHUSDT", "ETHBTC", "BNBBTC", "SOLBTC", "XRPBTC",
];

/// One instrument of the synthetic market.
#[derive(Debug, Clone)]
pub struct SyntheticSymbol {
    pub symbol: String,
    pub quote_volume: f64,
    /// Candles before this time do not exist.
    pub listed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct SymbolParams {
    seed: u64,
    base_price: f64,
    beta: f64,
    cycle_amplitude: f64,
    cycle_period: f64,
    cycle_phase: f64,
    noise: f64,
    final_month_drift: f64,
}

impl SymbolParams {
    fn derive(symbol: &str) -> Self {
        // Deterministic seed from symbol name
        let hash = blake3::hash(symbol.as_bytes());
        let seed_bytes: [u8; 32] = *hash.as_bytes();
        let mut rng = StdRng::from_seed(seed_bytes);

        let drift = if rng.gen_bool(0.3) {
            let magnitude = rng.gen_range(0.35..0.6);
            if rng.gen_bool(0.5) {
                magnitude
            } else {
                -magnitude
            }
        } else {
            0.0
        };

        Self {
            seed: rng.gen(),
            base_price: 10f64.powf(rng.gen_range(-1.0..4.5)),
            beta: rng.gen_range(0.6..1.4),
            cycle_amplitude: rng.gen_range(0.0..0.25),
            cycle_period: rng.gen_range(2_000.0..40_000.0),
            cycle_phase: rng.gen_range(0.0..TAU),
            noise: rng.gen_range(0.001..0.01),
            final_month_drift: drift,
        }
    }
}

/// Deterministic synthetic market.
pub struct SyntheticProvider {
    symbols: Vec<SyntheticSymbol>,
    params: HashMap<String, SymbolParams>,
    interval: Interval,
    now: DateTime<Utc>,
}

impl SyntheticProvider {
    /// A market quoting `symbols` on `interval`; no candle opens after `now`.
    pub fn new(symbols: Vec<SyntheticSymbol>, interval: Interval, now: DateTime<Utc>) -> Self {
        let params = symbols
            .iter()
            .map(|s| (s.symbol.clone(), SymbolParams::derive(&s.symbol)))
            .collect();
        Self {
            symbols,
            params,
            interval,
            now,
        }
    }

    /// Demo market with ~60 USDT pairs and a few BTC-quoted pairs.
    pub fn demo(interval: Interval, now: DateTime<Utc>) -> Self {
        let symbols = DEMO_SYMBOLS
            .iter()
            .enumerate()
            .map(|(i, s)| SyntheticSymbol {
                symbol: s.to_string(),
                quote_volume: 5.0e9 / (i as f64 + 1.0),
                listed_at: None,
            })
            .collect();
        Self::new(symbols, interval, now)
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    fn candle_millis(&self) -> i64 {
        self.interval.duration().num_milliseconds()
    }

    /// Close price of candle `k` (open time = k * interval since the epoch).
    fn close_at(&self, p: &SymbolParams, k: i64) -> f64 {
        let t = k as f64;
        let market = 0.35 * (TAU * t / 35_040.0).sin() + 0.15 * (TAU * t / 8_760.0).sin();
        let cycle = p.cycle_amplitude * (TAU * t / p.cycle_period + p.cycle_phase).sin();

        let salt = (k as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(p.seed ^ salt);
        let noise = rng.gen_range(-p.noise..p.noise);

        let now_k = self.now.timestamp_millis().div_euclid(self.candle_millis());
        let month_candles = (Duration::days(30).num_milliseconds() / self.candle_millis()).max(1);
        let drift_start = now_k - month_candles;
        let drift = if k > drift_start {
            p.final_month_drift * ((k - drift_start) as f64 / month_candles as f64).min(1.0)
        } else {
            0.0
        };

        p.base_price * (p.beta * market + cycle + noise + drift).exp()
    }

    fn kline_at(&self, p: &SymbolParams, k: i64) -> Option<Kline> {
        let step = self.candle_millis();
        let open_time = DateTime::from_timestamp_millis(k * step)?;
        let close_time = DateTime::from_timestamp_millis(k * step + step - 1)?;
        let open = self.close_at(p, k - 1);
        let close = self.close_at(p, k);
        let volume = p.base_price.recip() * 1.0e6 * (1.0 + (k % 7) as f64 / 10.0);
        Some(Kline {
            open_time,
            open,
            high: open.max(close) * 1.001,
            low: open.min(close) * 0.999,
            close,
            volume,
            close_time,
            quote_volume: volume * close,
            trades: 100 + (k % 50) as u64,
        })
    }

    fn lookup(&self, symbol: &str) -> Result<(&SyntheticSymbol, &SymbolParams), DataError> {
        let entry = self.symbols.iter().find(|s| s.symbol == symbol);
        match (entry, self.params.get(symbol)) {
            (Some(s), Some(p)) => Ok((s, p)),
            _ => Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
        }
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn ticker_snapshot(&self) -> Result<Vec<Ticker>, DataError> {
        let now_k = self.now.timestamp_millis().div_euclid(self.candle_millis());
        Ok(self
            .symbols
            .iter()
            .filter_map(|s| {
                let p = self.params.get(&s.symbol)?;
                Some(Ticker {
                    symbol: s.symbol.clone(),
                    last_price: self.close_at(p, now_k),
                    quote_volume: s.quote_volume,
                })
            })
            .collect())
    }

    fn klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, DataError> {
        if query.interval != self.interval {
            return Err(DataError::Other(format!(
                "synthetic market quotes {} candles, got {}",
                self.interval, query.interval
            )));
        }
        let (symbol, params) = self.lookup(&query.symbol)?;

        let step = self.candle_millis();
        let mut start = query.start;
        if let Some(listed) = symbol.listed_at {
            start = start.max(listed);
        }
        let end = query.end.min(self.now);

        // First candle whose open time is at or after `start`.
        let first_k = (start.timestamp_millis() + step - 1).div_euclid(step);
        let last_k = end.timestamp_millis().div_euclid(step);

        let mut page = Vec::new();
        let mut k = first_k;
        while k <= last_k && page.len() < usize::from(query.limit) {
            if let Some(kline) = self.kline_at(params, k) {
                page.push(kline);
            }
            k += 1;
        }
        Ok(page)
    }
}
