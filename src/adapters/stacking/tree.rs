//! Flat-array decision trees as exported with the ensemble.

use serde::{Deserialize, Serialize};

/// One node of a decision tree.
///
/// `cover` is the number (or weight) of training samples that reached the
/// node; the tree explainer needs it to weigh unseen branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        /// Child for `x[feature] <= threshold`
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl TreeNode {
    #[must_use]
    pub fn cover(&self) -> f64 {
        match self {
            Self::Split { cover, .. } | Self::Leaf { cover, .. } => *cover,
        }
    }
}

/// Regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Check structural invariants against the model's arity.
    ///
    /// Children always have a larger index than their parent, which rules
    /// out cycles and guarantees every walk terminates.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !cover.is_finite() || cover <= 0.0 {
                return Err(format!("node {idx} has non-positive cover"));
            }
            match *node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {idx} splits on feature {feature}, model has {n_features}"
                        ));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {idx} has a non-finite threshold"));
                    }
                    for child in [left, right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {idx} has invalid child {child}"));
                        }
                    }
                    let children = self.nodes[left].cover() + self.nodes[right].cover();
                    if (children - cover).abs() > 1e-6 * cover {
                        return Err(format!(
                            "node {idx} cover {cover} does not match its children ({children})"
                        ));
                    }
                }
                TreeNode::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {idx} has a non-finite value"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Leaf value reached by `features`.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                TreeNode::Leaf { value, .. } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if features[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value: the tree's output with no features known.
    #[must_use]
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, idx: usize) -> f64 {
        match self.nodes[idx] {
            TreeNode::Leaf { value, .. } => value,
            TreeNode::Split {
                left, right, cover, ..
            } => {
                let left_cover = self.nodes[left].cover();
                let right_cover = self.nodes[right].cover();
                (left_cover * self.expected_from(left) + right_cover * self.expected_from(right))
                    / cover
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Root split on `feature` at `threshold`, equal covers, leaves `lo`/`hi`.
    pub(crate) fn stump(feature: usize, threshold: f64, lo: f64, hi: f64) -> Tree {
        Tree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                    cover: 100.0,
                },
                TreeNode::Leaf {
                    value: lo,
                    cover: 50.0,
                },
                TreeNode::Leaf {
                    value: hi,
                    cover: 50.0,
                },
            ],
        }
    }

    #[test]
    fn test_predict_goes_left_on_equal() {
        let tree = stump(0, 0.5, -1.0, 1.0);
        assert_eq!(tree.predict(&[0.5]), -1.0);
        assert_eq!(tree.predict(&[0.51]), 1.0);
        assert!(tree.expected_value().abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_back_edges_and_bad_features() {
        let mut tree = stump(0, 0.5, -1.0, 1.0);
        assert!(tree.validate(1).is_ok());
        assert!(tree.validate(0).is_err());

        if let TreeNode::Split { left, .. } = &mut tree.nodes[0] {
            *left = 0;
        }
        assert!(tree.validate(1).is_err());
    }

    #[test]
    fn test_deserialize_flat_nodes() {
        let json = r#"{"nodes": [
            {"type": "split", "feature": 1, "threshold": 2.0, "left": 1, "right": 2, "cover": 10},
            {"type": "leaf", "value": 0.25, "cover": 4},
            {"type": "leaf", "value": -0.5, "cover": 6}
        ]}"#;
        let tree: Tree = serde_json::from_str(json).expect("parse tree");
        assert!(tree.validate(2).is_ok());
        assert!((tree.expected_value() - (0.25 * 4.0 - 0.5 * 6.0) / 10.0).abs() < 1e-12);
    }
}
