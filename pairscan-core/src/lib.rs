//! Pairscan Core: market data acquisition, alignment and pair signals.
//!
//! - Market-data providers (Binance REST, deterministic synthetic market)
//! - Weight-based rate limiter shared across fetches
//! - Paginated historical kline fetcher
//! - Universe selection by quote volume
//! - Series alignment and cleaning
//! - Correlation, divergence, position classification and report filtering

pub mod data;
pub mod signal;
