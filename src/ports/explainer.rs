//! Explainer port: Trait for per-feature attribution.

use crate::domain::{AttributionError, ExplainerKind};

/// Raw attribution output: one value per feature, in model column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub base_value: f64,
    pub contributions: Vec<f64>,
}

/// Trait for post-hoc attribution of one prediction.
///
/// An explainer is bound to a single model when it is constructed, which is
/// where any expensive setup happens. `explain` only reads shared state.
pub trait Explainer: Send + Sync {
    fn kind(&self) -> ExplainerKind;

    /// Attribute the model output for `label` at `features`.
    ///
    /// # Errors
    /// Returns `AttributionError::UnknownClass` if the model cannot emit
    /// `label`, or another variant if evaluation fails or runs out of time.
    fn explain(&self, features: &[f64], label: u32) -> Result<Explanation, AttributionError>;
}
