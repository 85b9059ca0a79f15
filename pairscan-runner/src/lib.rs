//! Pairscan Runner: scan orchestration on top of `pairscan-core`.
//!
//! - TOML configuration with defaults and validation
//! - Scan pipeline: universe, rate-limited paginated fetch, alignment,
//!   signal evaluation and report filtering
//! - Artifact export (CSV, JSON manifest, Markdown summary)

pub mod config;
pub mod export;
pub mod pipeline;

pub use config::{ConfigError, ScanConfig};
pub use export::{load_artifacts, save_artifacts};
pub use pipeline::{
    fetch_universe, resolve_universe, run_scan, ScanError, ScanOptions, ScanOutcome, ScanReport,
    SCHEMA_VERSION,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<ScanConfig>();
        assert_sync::<ScanConfig>();
    }

    #[test]
    fn report_is_send_sync() {
        assert_send::<ScanReport>();
        assert_sync::<ScanReport>();
        assert_send::<ScanOutcome>();
        assert_sync::<ScanOutcome>();
    }

    #[test]
    fn options_are_send_sync() {
        assert_send::<ScanOptions>();
        assert_sync::<ScanOptions>();
    }
}
