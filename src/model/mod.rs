// Predictive model seam
pub mod linear;
pub mod scaler;

pub use linear::LinearModel;
pub use scaler::Scaler;

use crate::models::{FeatureRow, TargetRow};

/// Seam between the strategy core and whatever actually predicts.
///
/// Scaling and inverse transformation live behind this trait: `fit` receives
/// domain-scale rows and `predict` returns domain-scale outputs, so the core
/// never inspects model internals.
pub trait ModelAdapter: Send {
    /// True once a scaler/model pipeline exists (built on first learn)
    fn has_pipeline(&self) -> bool;

    /// Construct the feature/target pipeline for the given widths
    fn build_pipeline(&mut self, x_width: usize, y_width: usize);

    /// True once at least one `fit` has completed
    fn is_trained(&self) -> bool;

    /// Refresh scalers on the full training window and fit the model
    fn fit(&mut self, x: &[FeatureRow], y: &[TargetRow]) -> anyhow::Result<()>;

    /// Predict one output vector for one feature row, domain scale
    fn predict(&self, x: &FeatureRow) -> anyhow::Result<Vec<f64>>;

    /// Serialized model state for the persistence collaborator
    fn snapshot(&self) -> anyhow::Result<Vec<u8>>;

    /// Release training-time memory pressure. Default no-op.
    fn release(&mut self) {}
}
