//! Prediction service: wraps the model loaded once at startup.

use std::path::Path;
use std::sync::Arc;

use crate::domain::{FeatureSchema, FeatureVector, LabelPolicy, ModelInfo, PredictionResult};
use crate::ports::{Classifier, ModelLoader};
use crate::StratifyError;

enum ModelState<C> {
    Ready(Arc<C>),
    /// Load failed; the reason is reported on every request
    Unavailable(String),
}

/// Classifies feature vectors with a model bound to one schema.
///
/// The model is loaded exactly once. After a failed load the service stays
/// unavailable and never retries; a restart with a fixed deployment is needed.
pub struct PredictionService<C: Classifier> {
    schema: FeatureSchema,
    policy: LabelPolicy,
    state: ModelState<C>,
}

impl<C: Classifier> PredictionService<C> {
    /// Load the model at `path` through `loader`.
    ///
    /// A loader failure is logged and leaves the service unavailable.
    ///
    /// # Errors
    /// Returns `StratifyError::SchemaMismatch` if a loaded model was exported
    /// for a different schema or column order.
    pub fn load<L>(
        loader: &L,
        path: &Path,
        schema: FeatureSchema,
        policy: LabelPolicy,
    ) -> Result<Self, StratifyError>
    where
        L: ModelLoader<Model = C>,
    {
        tracing::info!("Loading model for schema {} from {:?}", schema.version(), path);
        match loader.load(path) {
            Ok(model) => Self::with_model(Arc::new(model), schema, policy),
            Err(e) => {
                tracing::error!("Model unavailable: {}", e);
                Ok(Self {
                    schema,
                    policy,
                    state: ModelState::Unavailable(e.to_string()),
                })
            }
        }
    }

    /// Wrap an already-loaded model.
    ///
    /// # Errors
    /// Returns `StratifyError::SchemaMismatch` if the model's schema version
    /// or feature names differ from `schema`.
    pub fn with_model(
        model: Arc<C>,
        schema: FeatureSchema,
        policy: LabelPolicy,
    ) -> Result<Self, StratifyError> {
        check_model_matches_schema(model.as_ref(), &schema)?;
        tracing::info!(
            "Prediction service ready (schema={}, classes={:?}, label policy={})",
            schema.version(),
            model.classes(),
            policy
        );
        Ok(Self {
            schema,
            policy,
            state: ModelState::Ready(model),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    #[must_use]
    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    /// The loaded model, shared with explainers.
    ///
    /// # Errors
    /// Returns `StratifyError::ModelUnavailable` if loading failed.
    pub fn model(&self) -> Result<&Arc<C>, StratifyError> {
        match &self.state {
            ModelState::Ready(model) => Ok(model),
            ModelState::Unavailable(reason) => Err(StratifyError::ModelUnavailable(reason.clone())),
        }
    }

    #[must_use]
    pub fn describe(&self) -> Option<ModelInfo> {
        self.model().ok().map(|m| m.describe())
    }

    /// Label and class distribution for one vector.
    ///
    /// # Errors
    /// - `ModelUnavailable` if the model failed to load
    /// - `SchemaMismatch` if the vector was built for another schema or has the wrong length
    /// - `InvalidPrediction` if the model output breaks the distribution contract
    pub fn classify(&self, vector: &FeatureVector) -> Result<PredictionResult, StratifyError> {
        let model = self.model()?;

        if vector.schema_version() != self.schema.version() {
            return Err(StratifyError::SchemaMismatch(format!(
                "vector built for schema {}, service uses {}",
                vector.schema_version(),
                self.schema.version()
            )));
        }
        if vector.len() != model.n_features() {
            return Err(StratifyError::SchemaMismatch(format!(
                "model expects {} features, vector has {}",
                model.n_features(),
                vector.len()
            )));
        }

        let features = vector.as_slice();
        let model_label = model.predict(features)?;
        let probabilities = model.predict_proba(features)?;
        let result =
            PredictionResult::from_model_output(model.classes(), model_label, &probabilities, self.policy)?;

        tracing::debug!(
            "Classified: label={}, confidence={:.3}",
            result.predicted_label,
            result.confidence()
        );
        Ok(result)
    }
}

fn check_model_matches_schema<C: Classifier>(
    model: &C,
    schema: &FeatureSchema,
) -> Result<(), StratifyError> {
    let info = model.describe();
    if info.schema_version != schema.version() {
        return Err(StratifyError::SchemaMismatch(format!(
            "model exported for schema {}, active schema is {}",
            info.schema_version,
            schema.version()
        )));
    }

    let expected: Vec<&str> = schema.names().collect();
    let actual: Vec<&str> = model.feature_names().iter().map(String::as_str).collect();
    if expected != actual {
        let position = expected
            .iter()
            .zip(&actual)
            .position(|(a, b)| a != b)
            .unwrap_or(expected.len().min(actual.len()));
        return Err(StratifyError::SchemaMismatch(format!(
            "model columns differ from schema {} at position {} (schema has {} features, model {})",
            schema.version(),
            position,
            expected.len(),
            actual.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::adapters::stacking::tests::toy_ensemble;
    use crate::adapters::stacking::StackedEnsemble;
    use crate::domain::{assemble, CollectedInput, FeatureSpec, SchemaCatalog, SCHEMA_SUBTYPE_4};

    pub(crate) fn toy_schema() -> FeatureSchema {
        FeatureSchema::new(
            "toy",
            vec![
                FeatureSpec::continuous("a", "A", 0.0, 1.0, 0.0),
                FeatureSpec::continuous("b", "B", 0.0, 1.0, 0.0),
            ],
        )
        .expect("schema")
    }

    pub(crate) fn toy_vector(a: f64, b: f64) -> FeatureVector {
        let collected: CollectedInput = [("a", a), ("b", b)].into_iter().collect();
        assemble(&toy_schema(), &collected).expect("vector")
    }

    struct FailingLoader {
        calls: AtomicUsize,
    }

    impl ModelLoader for FailingLoader {
        type Model = StackedEnsemble;

        fn load(&self, _path: &Path) -> Result<StackedEnsemble, StratifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StratifyError::ModelUnavailable("artifact missing".into()))
        }
    }

    struct ToyLoader;

    impl ModelLoader for ToyLoader {
        type Model = StackedEnsemble;

        fn load(&self, _path: &Path) -> Result<StackedEnsemble, StratifyError> {
            Ok(toy_ensemble())
        }
    }

    fn service(policy: LabelPolicy) -> PredictionService<StackedEnsemble> {
        PredictionService::with_model(Arc::new(toy_ensemble()), toy_schema(), policy)
            .expect("service")
    }

    #[test]
    fn test_failed_load_is_never_retried() {
        // Artifact path does not resolve.
        let loader = FailingLoader {
            calls: AtomicUsize::new(0),
        };
        let service = PredictionService::load(
            &loader,
            Path::new("missing.json"),
            toy_schema(),
            LabelPolicy::default(),
        )
        .expect("unavailable service still constructs");

        assert!(!service.is_available());
        for _ in 0..3 {
            let err = service.classify(&toy_vector(0.0, 0.0)).unwrap_err();
            assert!(matches!(err, StratifyError::ModelUnavailable(_)));
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(service.describe().is_none());
    }

    #[test]
    fn test_load_success() {
        let service = PredictionService::load(
            &ToyLoader,
            Path::new("toy.json"),
            toy_schema(),
            LabelPolicy::default(),
        )
        .expect("service");
        assert!(service.is_available());
        assert_eq!(service.describe().map(|i| i.n_classes), Some(3));
    }

    #[test]
    fn test_classify_distribution_and_argmax() {
        let service = service(LabelPolicy::ArgmaxProbability);
        for (a, b) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            let result = service.classify(&toy_vector(a, b)).expect("classify");
            let sum: f64 = result.probabilities.iter().map(|p| p.probability).sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert_eq!(result.predicted_label, result.argmax_label());
            assert!(result.is_consistent());
        }
        assert_eq!(service.classify(&toy_vector(1.0, 0.0)).expect("classify").predicted_label, 1);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let service = service(LabelPolicy::default());
        let first = service.classify(&toy_vector(0.3, 0.9)).expect("classify");
        for _ in 0..5 {
            assert_eq!(service.classify(&toy_vector(0.3, 0.9)).expect("classify"), first);
        }
    }

    #[test]
    fn test_vector_from_other_schema_is_mismatch() {
        let service = service(LabelPolicy::default());
        let schema = SchemaCatalog::builtin()
            .get_schema(SCHEMA_SUBTYPE_4)
            .expect("schema")
            .clone();
        let collected: CollectedInput = schema
            .specs()
            .iter()
            .map(|s| (s.name.clone(), s.default_value()))
            .collect();
        let vector = assemble(&schema, &collected).expect("vector");

        let err = service.classify(&vector).unwrap_err();
        assert!(matches!(err, StratifyError::SchemaMismatch(_)));
    }

    #[test]
    fn test_startup_rejects_column_order_mismatch() {
        let mut model = toy_ensemble();
        model.feature_names = vec!["b".into(), "a".into()];
        let err = PredictionService::with_model(Arc::new(model), toy_schema(), LabelPolicy::default())
            .err()
            .expect("mismatch");
        assert!(matches!(err, StratifyError::SchemaMismatch(_)));

        let mut model = toy_ensemble();
        model.schema_version = "aecopd-subtype-6".into();
        let err = PredictionService::with_model(Arc::new(model), toy_schema(), LabelPolicy::default())
            .err()
            .expect("mismatch");
        assert!(matches!(err, StratifyError::SchemaMismatch(_)));
    }
}
