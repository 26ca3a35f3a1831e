//! Model-agnostic permutation-sampling Shapley estimator.
//!
//! For each sampled feature ordering, features are switched one by one from
//! the background value to the explained value, and each switch's change in
//! class probability is credited to that feature. Every ordering credits
//! exactly `p(x) - p(background)`, so the estimate is locally accurate for
//! any number of samples.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::domain::{AttributionError, ExplainerKind};
use crate::ports::{Classifier, Explainer, Explanation};
use crate::StratifyError;

/// Tuning for the sampling explainer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    /// Number of feature orderings to evaluate
    pub samples: usize,
    /// RNG seed; identical seeds give identical attributions
    pub seed: u64,
    /// Give up once this much wall-clock time has passed
    pub timeout: Option<Duration>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            samples: 200,
            seed: 0x5eed,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Sampling explainer bound to one classifier.
pub struct SamplingExplainer<C: Classifier> {
    model: Arc<C>,
    background: Vec<f64>,
    options: SamplingOptions,
}

impl<C: Classifier> SamplingExplainer<C> {
    /// Bind to `model`, measuring contributions from `background`.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if the background does not
    /// match the model's arity or no samples are requested.
    pub fn new(
        model: Arc<C>,
        background: Vec<f64>,
        options: SamplingOptions,
    ) -> Result<Self, StratifyError> {
        if background.len() != model.n_features() {
            return Err(StratifyError::Configuration(format!(
                "sampling explainer: background has {} values, model expects {}",
                background.len(),
                model.n_features()
            )));
        }
        if options.samples == 0 {
            return Err(StratifyError::Configuration(
                "sampling explainer: samples must be at least 1".into(),
            ));
        }

        tracing::info!(
            "Sampling explainer ready (samples={}, seed={}, timeout={:?})",
            options.samples,
            options.seed,
            options.timeout
        );

        Ok(Self {
            model,
            background,
            options,
        })
    }

    fn class_probability(&self, z: &[f64], class_index: usize) -> Result<f64, AttributionError> {
        self.model
            .predict_proba(z)
            .map_err(|e| AttributionError::Model(e.to_string()))?
            .get(class_index)
            .copied()
            .ok_or_else(|| AttributionError::Model("probability output too short".into()))
    }
}

impl<C: Classifier> Explainer for SamplingExplainer<C> {
    fn kind(&self) -> ExplainerKind {
        ExplainerKind::Sampling
    }

    fn explain(&self, features: &[f64], label: u32) -> Result<Explanation, AttributionError> {
        let n = self.background.len();
        if features.len() != n {
            return Err(AttributionError::Arity {
                expected: n,
                actual: features.len(),
            });
        }
        let class_index = self
            .model
            .classes()
            .iter()
            .position(|&c| c == label)
            .ok_or(AttributionError::UnknownClass(label))?;

        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let mut rng = ChaCha20Rng::seed_from_u64(self.options.seed);
        let mut order: Vec<usize> = (0..n).collect();
        let mut phi = vec![0.0; n];

        let base_value = self.class_probability(&self.background, class_index)?;

        for completed in 0..self.options.samples {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(AttributionError::TimedOut {
                    completed,
                    requested: self.options.samples,
                });
            }

            order.shuffle(&mut rng);
            let mut z = self.background.clone();
            let mut previous = base_value;
            for &j in &order {
                z[j] = features[j];
                let current = self.class_probability(&z, class_index)?;
                phi[j] += current - previous;
                previous = current;
            }
        }

        let samples = self.options.samples as f64;
        for value in &mut phi {
            *value /= samples;
        }

        Ok(Explanation {
            base_value,
            contributions: phi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stacking::tests::toy_ensemble;

    fn explainer(options: SamplingOptions) -> SamplingExplainer<crate::adapters::stacking::StackedEnsemble> {
        SamplingExplainer::new(Arc::new(toy_ensemble()), vec![0.0, 0.0], options)
            .expect("explainer")
    }

    #[test]
    fn test_local_accuracy() {
        let explainer = explainer(SamplingOptions {
            samples: 16,
            ..SamplingOptions::default()
        });
        let model = toy_ensemble();
        let x = [1.0, 1.0];

        for label in [0, 1, 2] {
            let explanation = explainer.explain(&x, label).expect("explain");
            let proba = model.predict_proba(&x).expect("proba");
            let total = explanation.base_value + explanation.contributions.iter().sum::<f64>();
            assert!((total - proba[label as usize]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_attribution() {
        let a = explainer(SamplingOptions::default());
        let b = explainer(SamplingOptions::default());
        let x = [1.0, 0.0];
        assert_eq!(a.explain(&x, 1), b.explain(&x, 1));
        assert_eq!(a.explain(&x, 1), a.explain(&x, 1));
    }

    #[test]
    fn test_unchanged_feature_gets_no_credit() {
        let explainer = explainer(SamplingOptions::default());
        // Feature b stays at its background value.
        let explanation = explainer.explain(&[1.0, 0.0], 1).expect("explain");
        assert!(explanation.contributions[1].abs() < 1e-12);
        assert!(explanation.contributions[0] > 0.0);
    }

    #[test]
    fn test_zero_timeout_reports_timed_out() {
        let explainer = explainer(SamplingOptions {
            timeout: Some(Duration::ZERO),
            ..SamplingOptions::default()
        });
        let err = explainer.explain(&[1.0, 1.0], 0).unwrap_err();
        assert!(matches!(err, AttributionError::TimedOut { completed: 0, .. }));
    }

    #[test]
    fn test_rejects_unknown_label_and_arity() {
        let explainer = explainer(SamplingOptions::default());
        assert_eq!(
            explainer.explain(&[1.0, 1.0], 9),
            Err(AttributionError::UnknownClass(9))
        );
        assert!(matches!(
            explainer.explain(&[1.0], 0),
            Err(AttributionError::Arity { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_background_must_match_arity() {
        let result = SamplingExplainer::new(
            Arc::new(toy_ensemble()),
            vec![0.0],
            SamplingOptions::default(),
        );
        assert!(matches!(result, Err(StratifyError::Configuration(_))));
    }
}
