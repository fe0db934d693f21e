use serde::{Deserialize, Serialize};

use super::{ModelAdapter, Scaler};
use crate::models::{FeatureRow, TargetRow};

/// Baseline multi-output linear regressor trained by gradient descent on
/// scaled inputs. Deliberately small: the point of the adapter seam is that
/// anything with fit/predict can replace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    x_scaler: Option<Scaler>,
    y_scaler: Option<Scaler>,
    /// weights[output][feature], last column is the bias
    weights: Vec<Vec<f64>>,
    trained: bool,
    epochs: usize,
    learning_rate: f64,
}

impl LinearModel {
    pub fn new() -> Self {
        Self {
            x_scaler: None,
            y_scaler: None,
            weights: Vec::new(),
            trained: false,
            epochs: 300,
            learning_rate: 0.1,
        }
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .map(|w| {
                let bias = w[w.len() - 1];
                x.iter().zip(&w[..w.len() - 1]).map(|(a, b)| a * b).sum::<f64>() + bias
            })
            .collect()
    }
}

impl Default for LinearModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelAdapter for LinearModel {
    fn has_pipeline(&self) -> bool {
        self.x_scaler.is_some() && self.y_scaler.is_some()
    }

    fn build_pipeline(&mut self, x_width: usize, y_width: usize) {
        self.x_scaler = Some(Scaler::new(x_width));
        self.y_scaler = Some(Scaler::new(y_width));
        self.weights = vec![vec![0.0; x_width + 1]; y_width];
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn fit(&mut self, x: &[FeatureRow], y: &[TargetRow]) -> anyhow::Result<()> {
        anyhow::ensure!(!x.is_empty() && x.len() == y.len(), "x/y size mismatch");
        let x_scaler = self
            .x_scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("pipeline not built"))?;
        let y_scaler = self
            .y_scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("pipeline not built"))?;

        let x_raw: Vec<Vec<f64>> = x.iter().map(|r| r.values.clone()).collect();
        let y_raw: Vec<Vec<f64>> = y.iter().map(|r| r.values.clone()).collect();

        // Scalers are refit on every learn so they follow the price regime
        x_scaler.fit(&x_raw);
        y_scaler.fit(&y_raw);
        let x_t: Vec<Vec<f64>> = x_raw.iter().map(|r| x_scaler.transform(r)).collect();
        let y_t: Vec<Vec<f64>> = y_raw.iter().map(|r| y_scaler.transform(r)).collect();

        let n = x_t.len() as f64;
        let x_width = x_t[0].len();
        for _ in 0..self.epochs {
            for (out, w) in self.weights.iter_mut().enumerate() {
                let mut grad = vec![0.0; x_width + 1];
                for (xi, yi) in x_t.iter().zip(&y_t) {
                    let pred = xi
                        .iter()
                        .zip(&w[..x_width])
                        .map(|(a, b)| a * b)
                        .sum::<f64>()
                        + w[x_width];
                    let err = pred - yi[out];
                    for (g, xv) in grad[..x_width].iter_mut().zip(xi) {
                        *g += err * xv;
                    }
                    grad[x_width] += err;
                }
                for (wv, g) in w.iter_mut().zip(&grad) {
                    *wv -= self.learning_rate * g / n;
                }
            }
        }

        self.trained = true;
        Ok(())
    }

    fn predict(&self, x: &FeatureRow) -> anyhow::Result<Vec<f64>> {
        anyhow::ensure!(self.trained, "model not trained");
        let x_scaler = self
            .x_scaler
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("pipeline not built"))?;
        let y_scaler = self
            .y_scaler
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("pipeline not built"))?;

        let scaled = self.forward(&x_scaler.transform(&x.values));
        Ok(y_scaler.inverse(&scaled))
    }

    fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(values: Vec<f64>) -> FeatureRow {
        FeatureRow {
            timestamp: Utc::now(),
            values,
        }
    }

    fn target(values: Vec<f64>) -> TargetRow {
        TargetRow {
            timestamp: Utc::now(),
            values,
        }
    }

    #[test]
    fn test_predict_before_fit_errors() {
        let mut model = LinearModel::new();
        model.build_pipeline(2, 1);
        assert!(model.predict(&row(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn test_fit_without_pipeline_errors() {
        let mut model = LinearModel::new();
        let err = model.fit(&[row(vec![1.0])], &[target(vec![1.0])]);
        assert!(err.is_err());
    }

    #[test]
    fn test_learns_linear_relation() {
        let mut model = LinearModel::new();
        model.build_pipeline(1, 2);

        // y0 = 2x, y1 = -x + 1
        let x: Vec<FeatureRow> = (0..20).map(|i| row(vec![i as f64])).collect();
        let y: Vec<TargetRow> = (0..20)
            .map(|i| target(vec![2.0 * i as f64, -(i as f64) + 1.0]))
            .collect();

        model.fit(&x, &y).unwrap();
        assert!(model.is_trained());

        let pred = model.predict(&row(vec![10.0])).unwrap();
        assert!((pred[0] - 20.0).abs() < 1.0, "y0 prediction off: {}", pred[0]);
        assert!((pred[1] + 9.0).abs() < 1.0, "y1 prediction off: {}", pred[1]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut model = LinearModel::new();
        model.build_pipeline(2, 2);
        let bytes = model.snapshot().unwrap();
        assert!(!bytes.is_empty());

        let restored: LinearModel = serde_json::from_slice(&bytes).unwrap();
        assert!(restored.has_pipeline());
    }
}
