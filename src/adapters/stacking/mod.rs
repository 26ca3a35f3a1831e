//! Stacking adapter: Implementation of Classifier for exported stacked ensembles.
//!
//! The artifact is a JSON document produced by the training pipeline:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "schema_version": "aecopd-subtype-6",
//!   "feature_names": ["FEV", "BMI", ...],
//!   "classes": [0, 1, 2, 3, 4, 5],
//!   "base_learners": [
//!     { "kind": "boosted", "name": "xgb", "learning_rate": 0.1, "init_raw": [...], "rounds": [[tree, ...], ...] },
//!     { "kind": "averaged", "name": "rf", "members": [[tree, ...], ...] }
//!   ],
//!   "meta_learner": { "name": "logistic_regression", "weights": [[...], ...], "intercept": [...] },
//!   "passthrough": false,
//!   "background": [...]
//! }
//! ```
//!
//! Every base learner emits one probability per class. The meta learner is a
//! multinomial logistic regression over the concatenated base probabilities,
//! followed by the raw features when `passthrough` is set.

mod manifest;
mod tree;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use manifest::{ArtifactManifest, ArtifactVerification, VerificationStatus, sha256_hex};
pub use tree::{Tree, TreeNode};

use crate::domain::ModelInfo;
use crate::ports::{Classifier, ModelLoader};
use crate::StratifyError;

/// File name looked up when the model path is a directory.
pub const DEFAULT_ARTIFACT_FILE: &str = "stacking_classifier.json";

const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// Gradient-boosted trees: `softmax(init_raw + learning_rate * Σ rounds)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedLearner {
    pub name: String,
    pub learning_rate: f64,
    /// Initial raw score per class
    pub init_raw: Vec<f64>,
    /// Shape: `[n_rounds][n_classes]`
    pub rounds: Vec<Vec<Tree>>,
}

impl BoostedLearner {
    /// Raw margin of one class.
    #[must_use]
    pub fn margin(&self, features: &[f64], class_index: usize) -> f64 {
        self.init_raw[class_index]
            + self.learning_rate
                * self
                    .rounds
                    .iter()
                    .map(|round| round[class_index].predict(features))
                    .sum::<f64>()
    }

    /// Trees contributing to one class, with the learning rate to scale them by.
    pub fn class_trees(&self, class_index: usize) -> impl Iterator<Item = &Tree> {
        self.rounds.iter().map(move |round| &round[class_index])
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let raw: Vec<f64> = (0..self.init_raw.len())
            .map(|c| self.margin(features, c))
            .collect();
        softmax(&raw)
    }
}

/// Forest of per-class regression trees whose outputs are averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedLearner {
    pub name: String,
    /// Shape: `[n_members][n_classes]`
    pub members: Vec<Vec<Tree>>,
}

impl AveragedLearner {
    fn predict_proba(&self, features: &[f64], n_classes: usize) -> Vec<f64> {
        let mut scores = vec![0.0; n_classes];
        for member in &self.members {
            for (score, tree) in scores.iter_mut().zip(member) {
                *score += tree.predict(features);
            }
        }
        for score in &mut scores {
            *score = (*score / self.members.len() as f64).max(0.0);
        }
        let sum: f64 = scores.iter().sum();
        if sum <= 0.0 {
            return vec![1.0 / n_classes as f64; n_classes];
        }
        scores.iter().map(|s| s / sum).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaseLearner {
    Boosted(BoostedLearner),
    Averaged(AveragedLearner),
}

impl BaseLearner {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Boosted(l) => &l.name,
            Self::Averaged(l) => &l.name,
        }
    }

    fn predict_proba(&self, features: &[f64], n_classes: usize) -> Vec<f64> {
        match self {
            Self::Boosted(l) => l.predict_proba(features),
            Self::Averaged(l) => l.predict_proba(features, n_classes),
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        let name = self.name();
        let groups: &[Vec<Tree>] = match self {
            Self::Boosted(l) => {
                if !l.learning_rate.is_finite() || l.learning_rate <= 0.0 {
                    return Err(format!("{name}: learning_rate must be positive"));
                }
                if l.init_raw.len() != n_classes {
                    return Err(format!("{name}: init_raw length must match classes"));
                }
                &l.rounds
            }
            Self::Averaged(l) => {
                if l.members.is_empty() {
                    return Err(format!("{name}: forest has no members"));
                }
                &l.members
            }
        };
        for (idx, group) in groups.iter().enumerate() {
            if group.len() != n_classes {
                return Err(format!(
                    "{name}: group {idx} has {} trees but expected {n_classes}",
                    group.len()
                ));
            }
            for tree in group {
                tree.validate(n_features)
                    .map_err(|e| format!("{name}: group {idx}: {e}"))?;
            }
        }
        Ok(())
    }
}

/// Multinomial logistic regression over stacked base outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaLearner {
    #[serde(default = "default_meta_name")]
    pub name: String,
    /// Shape: `[n_classes][n_inputs]`
    pub weights: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

fn default_meta_name() -> String {
    "logistic_regression".to_string()
}

impl MetaLearner {
    fn predict_proba(&self, stacked: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.intercept)
            .map(|(row, b)| b + row.iter().zip(stacked).map(|(w, x)| w * x).sum::<f64>())
            .collect();
        softmax(&logits)
    }
}

/// Pre-trained stacked ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedEnsemble {
    pub format_version: u32,
    pub schema_version: String,
    pub feature_names: Vec<String>,
    pub classes: Vec<u32>,
    pub base_learners: Vec<BaseLearner>,
    pub meta_learner: MetaLearner,
    /// Feed raw features to the meta learner after the base outputs
    #[serde(default)]
    pub passthrough: bool,
    /// Reference input for model-agnostic attribution
    #[serde(default)]
    pub background: Option<Vec<f64>>,
}

impl StackedEnsemble {
    /// Parse and validate an artifact from JSON text.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or structurally inconsistent.
    pub fn from_json(content: &str) -> Result<Self, String> {
        let model: Self = serde_json::from_str(content).map_err(|e| e.to_string())?;
        model.validate()?;
        Ok(model)
    }

    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.format_version != SUPPORTED_FORMAT_VERSION {
            return Err(format!(
                "Unsupported format_version {} (expected {SUPPORTED_FORMAT_VERSION})",
                self.format_version
            ));
        }
        let n_features = self.feature_names.len();
        let n_classes = self.classes.len();
        if n_features == 0 {
            return Err("Model declares no features".to_string());
        }
        if n_classes < 2 {
            return Err("Model must contain at least 2 classes".to_string());
        }
        if self.classes.iter().collect::<HashSet<_>>().len() != n_classes {
            return Err("Model classes must be unique".to_string());
        }
        if self.feature_names.iter().collect::<HashSet<_>>().len() != n_features {
            return Err("Model feature names must be unique".to_string());
        }
        if self.base_learners.is_empty() {
            return Err("Model has no base learners".to_string());
        }
        for learner in &self.base_learners {
            learner.validate(n_features, n_classes)?;
        }

        let meta_inputs = self.meta_input_len();
        let meta = &self.meta_learner;
        if meta.weights.len() != n_classes || meta.intercept.len() != n_classes {
            return Err(format!(
                "Meta learner must have {n_classes} weight rows and intercepts"
            ));
        }
        if let Some(row) = meta.weights.iter().find(|row| row.len() != meta_inputs) {
            return Err(format!(
                "Meta learner rows must have {meta_inputs} weights, found {}",
                row.len()
            ));
        }
        if meta
            .weights
            .iter()
            .flatten()
            .chain(&meta.intercept)
            .any(|w| !w.is_finite())
        {
            return Err("Meta learner has non-finite coefficients".to_string());
        }

        if let Some(background) = &self.background {
            if background.len() != n_features || background.iter().any(|v| !v.is_finite()) {
                return Err("background must hold one finite value per feature".to_string());
            }
        }
        Ok(())
    }

    fn meta_input_len(&self) -> usize {
        let stacked = self.base_learners.len() * self.classes.len();
        if self.passthrough {
            stacked + self.feature_names.len()
        } else {
            stacked
        }
    }

    fn check_arity(&self, features: &[f64]) -> Result<(), StratifyError> {
        if features.len() != self.feature_names.len() {
            return Err(StratifyError::SchemaMismatch(format!(
                "model expects {} features, got {}",
                self.feature_names.len(),
                features.len()
            )));
        }
        Ok(())
    }

    /// First boosted base learner, or the one called `name`.
    #[must_use]
    pub fn boosted_learner(&self, name: Option<&str>) -> Option<&BoostedLearner> {
        self.base_learners.iter().find_map(|learner| match learner {
            BaseLearner::Boosted(l) if name.map_or(true, |n| n == l.name) => Some(l),
            _ => None,
        })
    }

    /// Position of `label` in the class list.
    #[must_use]
    pub fn class_index(&self, label: u32) -> Option<usize> {
        self.classes.iter().position(|&c| c == label)
    }
}

impl Classifier for StackedEnsemble {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn predict(&self, features: &[f64]) -> Result<u32, StratifyError> {
        let proba = self.predict_proba(features)?;
        // Highest probability; ties go to the lowest label, whatever the class order.
        let mut best = 0;
        for (idx, p) in proba.iter().enumerate().skip(1) {
            if *p > proba[best] || (*p == proba[best] && self.classes[idx] < self.classes[best]) {
                best = idx;
            }
        }
        Ok(self.classes[best])
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, StratifyError> {
        self.check_arity(features)?;
        let n_classes = self.classes.len();

        let mut stacked = Vec::with_capacity(self.meta_input_len());
        for learner in &self.base_learners {
            stacked.extend(learner.predict_proba(features, n_classes));
        }
        if self.passthrough {
            stacked.extend_from_slice(features);
        }

        Ok(self.meta_learner.predict_proba(&stacked))
    }

    fn describe(&self) -> ModelInfo {
        ModelInfo {
            kind: "stacking".to_string(),
            schema_version: self.schema_version.clone(),
            base_learners: self
                .base_learners
                .iter()
                .map(|l| l.name().to_string())
                .collect(),
            meta_learner: self.meta_learner.name.clone(),
            n_features: self.feature_names.len(),
            n_classes: self.classes.len(),
        }
    }
}

/// Loads `StackedEnsemble` artifacts from disk after integrity checks.
#[derive(Debug, Clone, Default)]
pub struct StackingLoader {
    verification: ArtifactVerification,
}

impl StackingLoader {
    #[must_use]
    pub fn new(verification: ArtifactVerification) -> Self {
        Self { verification }
    }

    fn resolve(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(DEFAULT_ARTIFACT_FILE)
        } else {
            path.to_path_buf()
        }
    }
}

impl ModelLoader for StackingLoader {
    type Model = StackedEnsemble;

    fn load(&self, path: &Path) -> Result<StackedEnsemble, StratifyError> {
        let artifact_path = Self::resolve(path);
        let bytes = std::fs::read(&artifact_path).map_err(|e| {
            StratifyError::ModelUnavailable(format!("cannot read {artifact_path:?}: {e}"))
        })?;

        let status = self
            .verification
            .verify(&artifact_path, &bytes)
            .map_err(StratifyError::ModelUnavailable)?;

        let content = String::from_utf8(bytes).map_err(|_| {
            StratifyError::ModelUnavailable(format!("{artifact_path:?} is not UTF-8"))
        })?;
        let model = StackedEnsemble::from_json(&content).map_err(|e| {
            StratifyError::ModelUnavailable(format!("invalid artifact {artifact_path:?}: {e}"))
        })?;

        tracing::info!(
            "Loaded stacked ensemble from {:?} (schema={}, n_features={}, n_classes={}, base_learners={}, integrity={:?})",
            artifact_path,
            model.schema_version,
            model.feature_names.len(),
            model.classes.len(),
            model.base_learners.len(),
            status
        );
        Ok(model)
    }
}

/// Numerically stable softmax.
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
