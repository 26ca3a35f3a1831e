//! Prediction results and the policy that picks the reported subtype.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StratifyError;

/// Tolerance for the probability distribution summing to 1.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Which model output determines the reported subtype.
///
/// The label function and the probability function of a calibrated ensemble
/// can disagree. The policy is chosen explicitly per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Report the highest-probability label (lowest label wins ties).
    #[default]
    ArgmaxProbability,
    /// Report the model's label output even when it is not the argmax.
    ModelLabel,
}

impl FromStr for LabelPolicy {
    type Err = StratifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "argmax" | "argmax_probability" => Ok(Self::ArgmaxProbability),
            "model" | "model_label" => Ok(Self::ModelLabel),
            other => Err(StratifyError::Configuration(format!(
                "unknown label policy '{other}' (expected argmax or model)"
            ))),
        }
    }
}

impl fmt::Display for LabelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgmaxProbability => write!(f, "argmax"),
            Self::ModelLabel => write!(f, "model"),
        }
    }
}

/// Summary of a loaded model, for display and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Model family, e.g. "stacking"
    pub kind: String,
    /// Schema version the model was exported for
    pub schema_version: String,
    pub base_learners: Vec<String>,
    pub meta_learner: String,
    pub n_features: usize,
    pub n_classes: usize,
}

/// Probability of one label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: u32,
    pub probability: f64,
}

/// Output of one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Reported subtype, chosen by `policy`
    pub predicted_label: u32,

    /// Raw output of the model's label function
    pub model_label: u32,

    /// Policy that selected `predicted_label`
    pub policy: LabelPolicy,

    /// Distribution over every label the model can emit, in model class order
    pub probabilities: Vec<LabelProbability>,
}

impl PredictionResult {
    /// Validate model outputs and apply the label policy.
    ///
    /// `classes` and `probabilities` are in the model's class order.
    ///
    /// # Errors
    /// Returns `StratifyError::InvalidPrediction` if the distribution is
    /// malformed or the model label is not one of its classes.
    pub fn from_model_output(
        classes: &[u32],
        model_label: u32,
        probabilities: &[f64],
        policy: LabelPolicy,
    ) -> Result<Self, StratifyError> {
        if classes.is_empty() {
            return Err(StratifyError::InvalidPrediction("model declares no classes".into()));
        }
        if probabilities.len() != classes.len() {
            return Err(StratifyError::InvalidPrediction(format!(
                "expected {} probabilities, got {}",
                classes.len(),
                probabilities.len()
            )));
        }
        if let Some(p) = probabilities
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
        {
            return Err(StratifyError::InvalidPrediction(format!(
                "probability {p} outside [0, 1]"
            )));
        }
        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(StratifyError::InvalidPrediction(format!(
                "probabilities sum to {sum}"
            )));
        }
        if !classes.contains(&model_label) {
            return Err(StratifyError::InvalidPrediction(format!(
                "label {model_label} is not one of the model's classes"
            )));
        }

        let probabilities: Vec<LabelProbability> = classes
            .iter()
            .zip(probabilities)
            .map(|(&label, &probability)| LabelProbability { label, probability })
            .collect();

        let argmax = argmax_label(&probabilities);
        if argmax != model_label {
            tracing::warn!(
                "Model label {} disagrees with highest-probability label {} (policy: {})",
                model_label,
                argmax,
                policy
            );
        }

        let predicted_label = match policy {
            LabelPolicy::ArgmaxProbability => argmax,
            LabelPolicy::ModelLabel => model_label,
        };

        Ok(Self {
            predicted_label,
            model_label,
            policy,
            probabilities,
        })
    }

    /// Probability assigned to `label`.
    #[must_use]
    pub fn probability_of(&self, label: u32) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|p| p.label == label)
            .map(|p| p.probability)
    }

    /// Probability of the reported subtype.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.probability_of(self.predicted_label).unwrap_or(0.0)
    }

    /// Label with the highest probability.
    #[must_use]
    pub fn argmax_label(&self) -> u32 {
        argmax_label(&self.probabilities)
    }

    /// Whether the model's label output agrees with the argmax.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.model_label == self.argmax_label()
    }
}

fn argmax_label(probabilities: &[LabelProbability]) -> u32 {
    let mut best = probabilities[0];
    for p in &probabilities[1..] {
        if p.probability > best.probability
            || (p.probability == best.probability && p.label < best.label)
        {
            best = *p;
        }
    }
    best.label
}
