//! Explainer adapters: per-feature attributions for a predicted class.
//!
//! - `sampling`: permutation-sampling Shapley estimate over any `Classifier`
//! - `tree`: exact TreeSHAP over the boosted base learner of a stacked ensemble

mod sampling;
mod tree;

pub use sampling::{SamplingExplainer, SamplingOptions};
pub use tree::{tree_shap, TreeExplainer};
