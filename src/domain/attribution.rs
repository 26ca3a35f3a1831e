//! Per-feature attribution for a single prediction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StratifyError;

/// Attribution technique. The two methods are not interchangeable: they
/// explain different model outputs and differ in cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainerKind {
    /// Permutation-sampling Shapley estimate of the ensemble's class probability.
    Sampling,
    /// Exact TreeSHAP over the boosted base learner's class margin.
    Tree,
}

impl FromStr for ExplainerKind {
    type Err = StratifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sampling" | "kernel" => Ok(Self::Sampling),
            "tree" => Ok(Self::Tree),
            other => Err(StratifyError::Configuration(format!(
                "unknown explainer '{other}' (expected sampling or tree)"
            ))),
        }
    }
}

impl fmt::Display for ExplainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sampling => write!(f, "sampling"),
            Self::Tree => write!(f, "tree"),
        }
    }
}

/// Errors raised while computing an attribution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributionError {
    #[error("Label {0} is not one of the model's classes")]
    UnknownClass(u32),

    #[error("Expected {expected} features, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("Attribution deadline exceeded after {completed} of {requested} samples")]
    TimedOut { completed: usize, requested: usize },

    #[error("Model evaluation failed: {0}")]
    Model(String),
}

/// Signed contribution of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
}

/// Attribution for the predicted label of one input vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    /// Label the contributions explain
    pub label: u32,

    pub method: ExplainerKind,

    /// Expected model output the contributions are measured from
    pub base_value: f64,

    /// One entry per feature, in schema order
    pub contributions: Vec<FeatureContribution>,
}

impl AttributionResult {
    /// Pair raw contribution values with feature names.
    #[must_use]
    pub fn new<'a>(
        label: u32,
        method: ExplainerKind,
        base_value: f64,
        names: impl IntoIterator<Item = &'a str>,
        values: &[f64],
    ) -> Self {
        let contributions = names
            .into_iter()
            .zip(values)
            .map(|(feature, &value)| FeatureContribution {
                feature: feature.to_string(),
                value,
            })
            .collect();
        Self {
            label,
            method,
            base_value,
            contributions,
        }
    }

    /// Contributions ordered by decreasing magnitude; ties keep schema order.
    #[must_use]
    pub fn ranked(&self) -> Vec<&FeatureContribution> {
        let mut ranked: Vec<&FeatureContribution> = self.contributions.iter().collect();
        ranked.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
        ranked
    }

    /// `base_value` plus every contribution: the explained model output.
    #[must_use]
    pub fn explained_output(&self) -> f64 {
        self.base_value + self.contributions.iter().map(|c| c.value).sum::<f64>()
    }

    #[must_use]
    pub fn contribution_of(&self, feature: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.value)
    }
}

/// Attribution state attached to an assessment. A failed attribution never
/// takes the prediction down with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttributionOutcome {
    NotRequested,
    Computed(AttributionResult),
    Failed { reason: String },
}

impl AttributionOutcome {
    #[must_use]
    pub fn result(&self) -> Option<&AttributionResult> {
        match self {
            Self::Computed(result) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
