//! Market data acquisition and alignment

pub mod align;
pub mod binance;
pub mod fetcher;
pub mod provider;
pub mod rate_limit;
pub mod synthetic;
pub mod universe;

pub use align::{
    align_series, nearest_index, AlignedTable, CleanError, CleanReport, CleanTable,
    InstrumentSeries,
};
pub use binance::BinanceProvider;
pub use fetcher::{FetchConfig, HistoricalFetcher, REQUEST_WEIGHT};
pub use provider::{
    DataError, FetchProgress, Interval, Kline, KlineQuery, LogProgress, MarketDataProvider, Ticker,
};
pub use rate_limit::{
    NoopSleeper, RateLimitConfig, RateLimiter, RecordingSleeper, Sleeper, ThreadSleeper,
};
pub use synthetic::{SyntheticProvider, SyntheticSymbol};
pub use universe::UniverseSelector;
