//! Exact path-dependent TreeSHAP over a boosted learner's class margin.
//!
//! Contributions are in margin (log-odds) units and satisfy
//! `base_value + Σ φ = margin(x)` exactly, where `base_value` is the
//! cover-weighted expected margin. Cost is polynomial in tree depth.

use crate::adapters::stacking::{BoostedLearner, StackedEnsemble, Tree, TreeNode};
use crate::domain::{AttributionError, ExplainerKind};
use crate::ports::{Explainer, Explanation};
use crate::StratifyError;

/// Tree-specific explainer bound to one boosted learner.
#[derive(Debug, Clone)]
pub struct TreeExplainer {
    learner: BoostedLearner,
    classes: Vec<u32>,
    n_features: usize,
    /// Expected margin per class, computed once at construction
    base_values: Vec<f64>,
}

impl TreeExplainer {
    /// Bind to the boosted learner called `learner_name`, or the first one.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if the ensemble has no such learner.
    pub fn new(model: &StackedEnsemble, learner_name: Option<&str>) -> Result<Self, StratifyError> {
        let learner = model.boosted_learner(learner_name).ok_or_else(|| {
            StratifyError::Configuration(match learner_name {
                Some(name) => format!("tree explainer: no boosted learner named '{name}'"),
                None => "tree explainer: ensemble has no boosted learner".to_string(),
            })
        })?;

        let base_values = (0..model.classes.len())
            .map(|c| {
                learner.init_raw[c]
                    + learner.learning_rate
                        * learner.class_trees(c).map(Tree::expected_value).sum::<f64>()
            })
            .collect();

        tracing::info!(
            "Tree explainer bound to learner '{}' ({} rounds)",
            learner.name,
            learner.rounds.len()
        );

        Ok(Self {
            learner: learner.clone(),
            classes: model.classes.clone(),
            n_features: model.feature_names.len(),
            base_values,
        })
    }
}

impl Explainer for TreeExplainer {
    fn kind(&self) -> ExplainerKind {
        ExplainerKind::Tree
    }

    fn explain(&self, features: &[f64], label: u32) -> Result<Explanation, AttributionError> {
        if features.len() != self.n_features {
            return Err(AttributionError::Arity {
                expected: self.n_features,
                actual: features.len(),
            });
        }
        let class_index = self
            .classes
            .iter()
            .position(|&c| c == label)
            .ok_or(AttributionError::UnknownClass(label))?;

        let mut phi = vec![0.0; self.n_features];
        for tree in self.learner.class_trees(class_index) {
            let mut tree_phi = vec![0.0; self.n_features];
            tree_shap(tree, features, &mut tree_phi);
            for (total, value) in phi.iter_mut().zip(tree_phi) {
                *total += self.learner.learning_rate * value;
            }
        }

        Ok(Explanation {
            base_value: self.base_values[class_index],
            contributions: phi,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` for the root sentinel
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Add the SHAP values of one tree at `x` into `phi`.
pub fn tree_shap(tree: &Tree, x: &[f64], phi: &mut [f64]) {
    recurse(tree, x, phi, 0, Vec::new(), 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    x: &[f64],
    phi: &mut [f64],
    node: usize,
    path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = extend(path, zero_fraction, one_fraction, feature);

    match tree.nodes[node] {
        TreeNode::Leaf { value, .. } => {
            for i in 1..path.len() {
                let weight: f64 = unwind(&path, i).iter().map(|e| e.weight).sum();
                let element = path[i];
                if let Some(f) = element.feature {
                    phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
        }
        TreeNode::Split {
            feature: split,
            threshold,
            left,
            right,
            cover,
        } => {
            let (hot, cold) = if x[split] <= threshold {
                (left, right)
            } else {
                (right, left)
            };

            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path
                .iter()
                .skip(1)
                .position(|e| e.feature == Some(split))
                .map(|k| k + 1)
            {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                path = unwind(&path, k);
            }

            let hot_cover = tree.nodes[hot].cover();
            let cold_cover = tree.nodes[cold].cover();
            recurse(
                tree,
                x,
                phi,
                hot,
                path.clone(),
                incoming_zero * hot_cover / cover,
                incoming_one,
                Some(split),
            );
            recurse(
                tree,
                x,
                phi,
                cold,
                path,
                incoming_zero * cold_cover / cover,
                0.0,
                Some(split),
            );
        }
    }
}

fn extend(
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) -> Vec<PathElement> {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
    path
}

/// Undo the `extend` that added element `index`.
fn unwind(path: &[PathElement], index: usize) -> Vec<PathElement> {
    let len = path.len();
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next = path[len - 1].weight;
    let mut out: Vec<PathElement> = path[..len - 1].to_vec();

    for j in (0..len - 1).rev() {
        let position = (j + 1) as f64;
        let remaining = (len - (j + 1)) as f64;
        if one != 0.0 {
            let previous = out[j].weight;
            out[j].weight = next * len as f64 / (position * one);
            next = previous - out[j].weight * zero * remaining / len as f64;
        } else {
            out[j].weight = out[j].weight * len as f64 / (zero * remaining);
        }
    }

    for j in index..len - 1 {
        out[j].feature = path[j + 1].feature;
        out[j].zero_fraction = path[j + 1].zero_fraction;
        out[j].one_fraction = path[j + 1].one_fraction;
    }
    out
}
