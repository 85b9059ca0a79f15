//! Scan configuration loaded from TOML.
//!
//! Every section and every field is optional; a missing value takes the
//! default shown by `pairscan init-config`.

use chrono::{DateTime, Utc};
use pairscan_core::data::{FetchConfig, Interval, RateLimitConfig};
use pairscan_core::signal::{ClassifyThresholds, ReportFilter, SignalConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Longest accepted day span for history and change lookbacks.
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub api: ApiConfig,
    pub universe: UniverseConfig,
    pub history: HistoryConfig,
    pub rate_limit: RateLimitSection,
    pub cleaning: CleaningConfig,
    pub signal: SignalSection,
    pub report: ReportConfig,
}

/// Market-data endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    /// Environment variable holding the API key. Credentials never live in
    /// the file itself.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: pairscan_core::data::binance::DEFAULT_BASE_URL.to_string(),
            api_key_env: "BINANCE_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// API key from the environment, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UniverseConfig {
    pub quote_asset: String,
    pub size: usize,
    /// Explicit symbol list. When non-empty, volume ranking is skipped.
    pub symbols: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            size: 50,
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    pub interval: Interval,
    pub lookback_days: i64,
    pub page_limit: u16,
    pub page_delay_ms: u64,
    /// Fetch instruments concurrently. All fetches share one rate limiter.
    pub parallel: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            interval: Interval::FifteenMinutes,
            lookback_days: 730,
            page_limit: 1000,
            page_delay_ms: 100,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub max_weight: u64,
    pub cooldown_secs: u64,
    /// 0 disables the cap.
    pub max_total_wait_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_weight: 6000,
            cooldown_secs: 60,
            max_total_wait_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleaningConfig {
    /// Columns whose missing ratio reaches this are dropped.
    pub max_missing_ratio: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            max_missing_ratio: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalSection {
    pub recent_window: usize,
    pub change_lookback_days: i64,
    pub classify_correlation: f64,
    pub classify_divergence: f64,
}

impl Default for SignalSection {
    fn default() -> Self {
        Self {
            recent_window: 30,
            change_lookback_days: 30,
            classify_correlation: 0.85,
            classify_divergence: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub min_correlation: f64,
    pub max_recent_correlation: f64,
    pub min_divergence: f64,
    /// Entry timestamp for P&L. Defaults to the last aligned row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_time: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            min_correlation: 0.875,
            max_recent_correlation: 0.0,
            min_divergence: 30.0,
            entry_time: None,
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl ScanConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ScanConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url", "must not be empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs", "must be positive"));
        }
        if self.universe.quote_asset.trim().is_empty() {
            return Err(invalid("universe.quote_asset", "must not be empty"));
        }
        if self.universe.size == 0 && self.universe.symbols.is_empty() {
            return Err(invalid("universe.size", "must be positive"));
        }
        check_days("history.lookback_days", self.history.lookback_days)?;
        if !(1..=1000).contains(&self.history.page_limit) {
            return Err(invalid(
                "history.page_limit",
                format!("{} is outside 1..=1000", self.history.page_limit),
            ));
        }
        if self.rate_limit.max_weight == 0 {
            return Err(invalid("rate_limit.max_weight", "must be positive"));
        }
        let ratio = self.cleaning.max_missing_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(
                "cleaning.max_missing_ratio",
                format!("{ratio} is outside (0, 1]"),
            ));
        }
        if self.signal.recent_window < 2 {
            return Err(invalid("signal.recent_window", "needs at least 2 rows"));
        }
        check_days("signal.change_lookback_days", self.signal.change_lookback_days)?;
        for (field, value) in [
            ("signal.classify_correlation", self.signal.classify_correlation),
            ("report.min_correlation", self.report.min_correlation),
            ("report.max_recent_correlation", self.report.max_recent_correlation),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("{value} is outside [-1, 1]")));
            }
        }
        for (field, value) in [
            ("signal.classify_divergence", self.signal.classify_divergence),
            ("report.min_divergence", self.report.min_divergence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{value} must be a non-negative number")));
            }
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let cap = self.rate_limit.max_total_wait_secs;
        RateLimitConfig {
            max_weight: self.rate_limit.max_weight,
            cooldown: Duration::from_secs(self.rate_limit.cooldown_secs),
            max_total_wait: (cap > 0).then_some(Duration::from_secs(cap)),
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            page_limit: self.history.page_limit,
            page_delay: Duration::from_millis(self.history.page_delay_ms),
        }
    }

    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            recent_window: self.signal.recent_window,
            change_lookback_days: self.signal.change_lookback_days,
            classify: ClassifyThresholds {
                min_correlation: self.signal.classify_correlation,
                min_divergence: self.signal.classify_divergence,
            },
        }
    }

    pub fn report_filter(&self) -> ReportFilter {
        ReportFilter {
            min_correlation: self.report.min_correlation,
            max_recent_correlation: self.report.max_recent_correlation,
            min_divergence: self.report.min_divergence,
        }
    }
}

fn check_days(field: &'static str, days: i64) -> Result<(), ConfigError> {
    if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
        return Err(invalid(field, format!("{days} is outside 1..={MAX_LOOKBACK_DAYS}")));
    }
    Ok(())
}
