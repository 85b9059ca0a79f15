//! Position classification and simulated profit/loss.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified position for the first symbol of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Buy,
    Sell,
    Hold,
}

impl Position {
    /// BUY or SELL.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Position::Buy | Position::Sell)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Position::Buy => "BUY",
            Position::Sell => "SELL",
            Position::Hold => "HOLD",
        })
    }
}

/// Thresholds for classifying a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifyThresholds {
    /// Long-window correlation must be strictly above this.
    pub min_correlation: f64,
    /// Divergence (percentage points) must exceed this in either direction.
    pub min_divergence: f64,
}

impl Default for ClassifyThresholds {
    fn default() -> Self {
        Self {
            min_correlation: 0.85,
            min_divergence: 30.0,
        }
    }
}

/// Mean-reversion classification of an ordered pair (A, B).
///
/// A historically correlated pair where A ran ahead of B is a SELL of A;
/// where A fell behind, a BUY. Missing inputs always classify as HOLD.
pub fn classify(
    correlation: Option<f64>,
    divergence: Option<f64>,
    thresholds: &ClassifyThresholds,
) -> Position {
    let (Some(corr), Some(diff)) = (correlation, divergence) else {
        return Position::Hold;
    };
    if corr <= thresholds.min_correlation {
        return Position::Hold;
    }
    if diff > thresholds.min_divergence {
        Position::Sell
    } else if diff < -thresholds.min_divergence {
        Position::Buy
    } else {
        Position::Hold
    }
}

/// Simulated profit/loss in percent, or not applicable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProfitLoss {
    Percent(f64),
    NotApplicable,
}

impl ProfitLoss {
    pub fn percent(&self) -> Option<f64> {
        match self {
            ProfitLoss::Percent(p) => Some(*p),
            ProfitLoss::NotApplicable => None,
        }
    }
}

impl fmt::Display for ProfitLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfitLoss::Percent(p) => write!(f, "{p:.4}"),
            ProfitLoss::NotApplicable => f.write_str("-"),
        }
    }
}

/// P&L of `position` opened at `entry` and marked at `current`.
///
/// BUY profits when the price rises, SELL when it falls. HOLD, a missing
/// price, or a non-positive entry give `NotApplicable`.
pub fn profit_loss(position: Position, entry: Option<f64>, current: Option<f64>) -> ProfitLoss {
    let (Some(entry), Some(current)) = (entry, current) else {
        return ProfitLoss::NotApplicable;
    };
    if entry.is_nan() || entry <= 0.0 || !current.is_finite() {
        return ProfitLoss::NotApplicable;
    }
    match position {
        Position::Buy => ProfitLoss::Percent((current - entry) / entry * 100.0),
        Position::Sell => ProfitLoss::Percent((entry - current) / entry * 100.0),
        Position::Hold => ProfitLoss::NotApplicable,
    }
}
