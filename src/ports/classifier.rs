//! Classifier port: Trait for the pre-trained subtype model.
//!
//! This trait abstracts the model artifact format from the application logic.

use std::path::Path;

use crate::domain::ModelInfo;
use crate::StratifyError;

/// Trait for a trained multi-class classifier.
///
/// Implementations must be deterministic: the same input yields the same
/// outputs for the lifetime of the instance.
pub trait Classifier: Send + Sync {
    /// Column names in the order the model consumes them.
    fn feature_names(&self) -> &[String];

    /// Labels the model can emit, in probability-output order.
    fn classes(&self) -> &[u32];

    /// Input arity.
    fn n_features(&self) -> usize {
        self.feature_names().len()
    }

    /// Predict a single label.
    ///
    /// # Errors
    /// Returns `StratifyError::SchemaMismatch` if `features` has the wrong length.
    fn predict(&self, features: &[f64]) -> Result<u32, StratifyError>;

    /// Predict one probability per class, aligned with `classes()`.
    ///
    /// # Errors
    /// Returns `StratifyError::SchemaMismatch` if `features` has the wrong length.
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, StratifyError>;

    /// Describe the model.
    fn describe(&self) -> ModelInfo;
}

/// Trait for turning an artifact on disk into a classifier.
pub trait ModelLoader {
    type Model: Classifier;

    /// Deserialize the model at `path`.
    ///
    /// # Errors
    /// Returns `StratifyError::ModelUnavailable` if the artifact is missing,
    /// fails integrity checks or cannot be deserialized.
    fn load(&self, path: &Path) -> Result<Self::Model, StratifyError>;
}
