//! Pearson correlation matrix over a clean price table.
//!
//! r = cov(x, y) / (std(x) * std(y))
//! Undefined (None) with fewer than two rows or a constant column.

use crate::data::CleanTable;
use serde::{Deserialize, Serialize};

/// Pearson correlation of two equal-length samples.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if !denom.is_finite() || denom == 0.0 {
        return None;
    }
    let r = cov / denom;
    if r.is_nan() {
        return None;
    }
    Some(r.clamp(-1.0, 1.0))
}

/// Square, symmetric correlation matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    /// Correlation of every column pair of `table`.
    ///
    /// Only the upper triangle is computed; the lower is mirrored so the
    /// matrix is exactly symmetric. The diagonal is 1 for every column with
    /// non-zero variance.
    pub fn from_table(table: &CleanTable) -> Self {
        let columns = table.columns();
        let n = columns.len();
        let mut values = vec![vec![None; n]; n];

        for i in 0..n {
            values[i][i] = pearson(&columns[i], &columns[i]).map(|_| 1.0);
            for j in (i + 1)..n {
                let r = pearson(&columns[i], &columns[j]);
                values[i][j] = r;
                values[j][i] = r;
            }
        }

        Self {
            symbols: table.symbols().to_vec(),
            values,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    /// Correlation by position.
    pub fn at(&self, i: usize, j: usize) -> Option<f64> {
        self.values.get(i)?.get(j).copied().flatten()
    }

    /// Correlation by symbol.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        self.at(i, j)
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }
}
