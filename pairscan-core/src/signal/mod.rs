//! Pair signals: correlation, divergence, classification and filtering

pub mod change;
pub mod correlation;
pub mod engine;
pub mod filter;
pub mod position;

pub use change::{lookback_changes, percentage_change, LookbackChanges};
pub use correlation::{pearson, CorrelationMatrix};
pub use engine::{DivergenceRecord, SignalConfig, SignalEngine, SignalOutput};
pub use filter::ReportFilter;
pub use position::{classify, profit_loss, ClassifyThresholds, Position, ProfitLoss};
