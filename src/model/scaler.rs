use serde::{Deserialize, Serialize};

/// Standardize-then-max-abs column scaler.
///
/// Fitting computes per-column mean, standard deviation and the max absolute
/// value of the standardized column, so transformed values land in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    mean: Vec<f64>,
    std: Vec<f64>,
    max_abs: Vec<f64>,
}

impl Scaler {
    pub fn new(width: usize) -> Self {
        Self {
            mean: vec![0.0; width],
            std: vec![1.0; width],
            max_abs: vec![1.0; width],
        }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Fit on row-major data. Degenerate columns (constant or empty) scale
    /// by 1 so transform stays defined.
    pub fn fit(&mut self, rows: &[Vec<f64>]) {
        let width = self.width();
        if rows.is_empty() {
            return;
        }
        let n = rows.len() as f64;

        for col in 0..width {
            let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
            let std = if var > 0.0 { var.sqrt() } else { 1.0 };
            let max_abs = rows
                .iter()
                .map(|r| ((r[col] - mean) / std).abs())
                .fold(0.0, f64::max);

            self.mean[col] = mean;
            self.std[col] = std;
            self.max_abs[col] = if max_abs > 0.0 { max_abs } else { 1.0 };
        }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.mean[i]) / self.std[i] / self.max_abs[i])
            .collect()
    }

    pub fn inverse(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| v * self.max_abs[i] * self.std[i] + self.mean[i])
            .collect()
    }
}
