//! Assessment service: one request from raw input to registry-backed result.
//!
//! This service coordinates:
//! - Input collection and validation
//! - Vector assembly in schema order
//! - Classification
//! - Subtype registry lookup
//! - Optional attribution for the predicted subtype

use std::sync::Arc;

use crate::domain::{
    assemble, Assessment, AttributionOutcome, AttributionResult, CollectOptions, FeatureSchema,
    InputValue, SubtypeRegistry,
};
use crate::ports::{Classifier, Explainer, InputSource};
use crate::StratifyError;

use super::collector::collect;
use super::prediction::PredictionService;

/// Runs complete assessments against shared, read-only state.
pub struct AssessmentService<C: Classifier> {
    predictor: PredictionService<C>,
    registry: SubtypeRegistry,
    explainer: Option<Arc<dyn Explainer>>,
    options: CollectOptions,
}

impl<C: Classifier> AssessmentService<C> {
    /// Create the service. Model classes without a registry entry are logged;
    /// a request predicting one of them fails with `UnknownLabel`.
    pub fn new(
        predictor: PredictionService<C>,
        registry: SubtypeRegistry,
        explainer: Option<Arc<dyn Explainer>>,
        options: CollectOptions,
    ) -> Self {
        if let Ok(model) = predictor.model() {
            let missing = registry.missing_labels(model.classes());
            if !missing.is_empty() {
                tracing::warn!(
                    "Subtype registry has no entry for model class(es) {:?}",
                    missing
                );
            }
        }
        if let Some(explainer) = &explainer {
            tracing::info!("Attribution enabled ({})", explainer.kind());
        }

        Self {
            predictor,
            registry,
            explainer,
            options,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        self.predictor.schema()
    }

    #[must_use]
    pub fn predictor(&self) -> &PredictionService<C> {
        &self.predictor
    }

    #[must_use]
    pub fn registry(&self) -> &SubtypeRegistry {
        &self.registry
    }

    /// Run the full pipeline for one request.
    ///
    /// Attribution is attempted only when an explainer is configured and
    /// `explain` is set. Its failure degrades the assessment instead of
    /// failing it.
    ///
    /// # Errors
    /// Returns `StratifyError::ModelUnavailable` before touching the input if
    /// the model failed to load, otherwise the first collection, assembly,
    /// classification or registry error.
    pub fn assess(
        &self,
        source: &dyn InputSource,
        explain: bool,
    ) -> Result<Assessment, StratifyError> {
        let schema = self.predictor.schema();
        tracing::info!("Starting assessment (schema={})", schema.version());

        let model_info = self.predictor.model()?.describe();

        tracing::debug!("Step 1: Collecting input...");
        let collected = collect(schema, source, self.options)?;

        tracing::debug!("Step 2: Assembling feature vector...");
        let vector = assemble(schema, &collected)?;

        tracing::debug!("Step 3: Classifying...");
        let prediction = self.predictor.classify(&vector)?;

        tracing::debug!("Step 4: Looking up subtype {}...", prediction.predicted_label);
        let subtype = self.registry.lookup(prediction.predicted_label)?.clone();

        let attribution = match (&self.explainer, explain) {
            (Some(explainer), true) => {
                tracing::debug!("Step 5: Computing attribution ({})...", explainer.kind());
                match explainer.explain(vector.as_slice(), prediction.predicted_label) {
                    Ok(explanation) => AttributionOutcome::Computed(AttributionResult::new(
                        prediction.predicted_label,
                        explainer.kind(),
                        explanation.base_value,
                        schema.names(),
                        &explanation.contributions,
                    )),
                    Err(e) => {
                        tracing::warn!("Attribution failed, returning prediction without it: {}", e);
                        AttributionOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            (None, true) => {
                tracing::debug!("Attribution requested but no explainer configured");
                AttributionOutcome::NotRequested
            }
            (_, false) => AttributionOutcome::NotRequested,
        };

        let inputs = schema
            .specs()
            .iter()
            .zip(vector.as_slice())
            .map(|(spec, &value)| InputValue {
                feature: spec.name.clone(),
                display_name: spec.display_name.clone(),
                value,
            })
            .collect();

        let assessment = Assessment::new(
            schema.version(),
            model_info,
            inputs,
            prediction,
            subtype,
            attribution,
        );

        tracing::info!(
            "Assessment complete: subtype={}, confidence={:.2}%, tier={}",
            assessment.subtype.display_name,
            assessment.confidence * 100.0,
            assessment
                .subtype
                .risk_tier
                .map_or_else(|| "unrated".to_string(), |t| t.to_string())
        );
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::explain::{SamplingExplainer, SamplingOptions, TreeExplainer};
    use crate::adapters::input::FormPayload;
    use crate::adapters::stacking::tests::toy_ensemble;
    use crate::adapters::stacking::StackedEnsemble;
    use crate::application::prediction::tests::toy_schema;
    use crate::domain::{
        AttributionError, ExplainerKind, FeatureContribution, LabelPolicy, RiskTier, SubtypeRecord,
    };
    use crate::ports::Explanation;

    fn toy_registry(labels: &[u32]) -> SubtypeRegistry {
        SubtypeRegistry::new(
            labels
                .iter()
                .map(|&label| SubtypeRecord {
                    label,
                    display_name: format!("Subtype {}", label + 1),
                    readmission_rate_percent: Some(10.0 + f64::from(label)),
                    risk_tier: Some(RiskTier::Moderate),
                    clinical_note: String::new(),
                })
                .collect(),
        )
        .expect("registry")
    }

    fn toy_service(explainer: Option<Arc<dyn Explainer>>) -> AssessmentService<StackedEnsemble> {
        let predictor =
            PredictionService::with_model(Arc::new(toy_ensemble()), toy_schema(), LabelPolicy::default())
                .expect("predictor");
        AssessmentService::new(predictor, toy_registry(&[0, 1, 2]), explainer, CollectOptions::default())
    }

    struct BrokenExplainer;

    impl Explainer for BrokenExplainer {
        fn kind(&self) -> ExplainerKind {
            ExplainerKind::Sampling
        }

        fn explain(&self, _features: &[f64], _label: u32) -> Result<Explanation, AttributionError> {
            Err(AttributionError::TimedOut {
                completed: 3,
                requested: 100,
            })
        }
    }

    #[test]
    fn test_assessment_without_attribution() {
        let service = toy_service(None);
        let payload = FormPayload::from_pairs(["a=1", "b=0"]).expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");

        assert_eq!(assessment.prediction.predicted_label, 1);
        assert_eq!(assessment.subtype.label, 1);
        assert_eq!(assessment.schema_version, "toy");
        assert_eq!(assessment.attribution, AttributionOutcome::NotRequested);
        let echoed: Vec<(&str, f64)> = assessment
            .inputs
            .iter()
            .map(|i| (i.feature.as_str(), i.value))
            .collect();
        assert_eq!(echoed, vec![("a", 1.0), ("b", 0.0)]);
    }

    #[test]
    fn test_tree_attribution_attached_for_predicted_label() {
        let model = toy_ensemble();
        let explainer: Arc<dyn Explainer> =
            Arc::new(TreeExplainer::new(&model, None).expect("explainer"));
        let service = toy_service(Some(explainer));

        let payload = FormPayload::from_pairs(["a=1", "b=1"]).expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");

        let result = assessment.attribution.result().expect("computed");
        assert_eq!(result.label, assessment.prediction.predicted_label);
        assert_eq!(result.method, ExplainerKind::Tree);
        let names: Vec<&str> = result.contributions.iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_sampling_attribution_explains_probability() {
        let model = Arc::new(toy_ensemble());
        let explainer: Arc<dyn Explainer> = Arc::new(
            SamplingExplainer::new(Arc::clone(&model), vec![0.0, 0.0], SamplingOptions::default())
                .expect("explainer"),
        );
        let service = toy_service(Some(explainer));

        let payload = FormPayload::from_pairs(["a=1", "b=1"]).expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");
        let result = assessment.attribution.result().expect("computed");
        assert!((result.explained_output() - assessment.prediction.confidence()).abs() < 1e-9);
    }

    #[test]
    fn test_attribution_failure_does_not_block_prediction() {
        let service = toy_service(Some(Arc::new(BrokenExplainer)));
        let payload = FormPayload::from_pairs(["a=0", "b=0"]).expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");

        assert!(assessment.attribution.is_degraded());
        assert_eq!(assessment.prediction.predicted_label, 0);
    }

    #[test]
    fn test_attribution_skipped_when_not_requested() {
        let service = toy_service(Some(Arc::new(BrokenExplainer)));
        let payload = FormPayload::from_pairs(["a=0", "b=0"]).expect("pairs");
        let assessment = service.assess(&payload, false).expect("assess");
        assert_eq!(assessment.attribution, AttributionOutcome::NotRequested);
    }

    #[test]
    fn test_unregistered_label_fails_request() {
        let predictor =
            PredictionService::with_model(Arc::new(toy_ensemble()), toy_schema(), LabelPolicy::default())
                .expect("predictor");
        let service =
            AssessmentService::new(predictor, toy_registry(&[0, 2]), None, CollectOptions::default());

        let payload = FormPayload::from_pairs(["a=1", "b=0"]).expect("pairs");
        let err = service.assess(&payload, false).unwrap_err();
        assert!(matches!(err, StratifyError::UnknownLabel(1)));
    }

    #[test]
    fn test_missing_feature_and_validation_errors_propagate() {
        let service = toy_service(None);

        let payload = FormPayload::from_pairs(["a=1"]).expect("pairs");
        let err = service.assess(&payload, false).unwrap_err();
        assert!(matches!(err, StratifyError::MissingFeature(ref name) if name == "b"));

        let payload = FormPayload::from_pairs(["a=2", "b=0"]).expect("pairs");
        assert!(service.assess(&payload, false).unwrap_err().is_retryable());
    }

    #[test]
    fn test_assessment_serializes() {
        let service = toy_service(None);
        let payload = FormPayload::from_pairs(["a=0", "b=1"]).expect("pairs");
        let assessment = service.assess(&payload, false).expect("assess");
        let json = serde_json::to_value(&assessment).expect("serialize");
        assert_eq!(json["attribution"]["status"], "not_requested");
        assert_eq!(json["subtype"]["risk_tier"], "moderate");
        assert_eq!(json["id"].as_str().map(str::len), Some(36));

        assert_eq!(json["model"]["kind"], "stacking");
        assert_eq!(json["model"]["base_learners"], serde_json::json!(["gbm", "rf"]));
        assert_eq!(json["model"]["meta_learner"], "logistic_regression");
        assert_eq!(json["model"]["n_features"], 2);
        assert_eq!(json["model"]["n_classes"], 3);
        assert_eq!(
            json["confidence"].as_f64(),
            Some(assessment.prediction.confidence())
        );
        assert_eq!(json["ranked_features"], serde_json::json!([]));
    }

    #[test]
    fn test_ranked_features_follow_attribution_magnitude() {
        let model = toy_ensemble();
        let explainer: Arc<dyn Explainer> =
            Arc::new(TreeExplainer::new(&model, None).expect("explainer"));
        let service = toy_service(Some(explainer));

        let payload = FormPayload::from_pairs(["a=1", "b=1"]).expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");
        let result = assessment.attribution.result().expect("computed");

        let expected: Vec<FeatureContribution> = result.ranked().into_iter().cloned().collect();
        assert_eq!(assessment.ranked_features, expected);
        assert!(assessment
            .ranked_features
            .windows(2)
            .all(|w| w[0].value.abs() >= w[1].value.abs()));

        let json = serde_json::to_value(&assessment).expect("serialize");
        assert_eq!(
            json["ranked_features"].as_array().map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn test_unavailable_model_blocks_before_validation() {
        use crate::adapters::stacking::StackingLoader;

        let predictor = PredictionService::load(
            &StackingLoader::default(),
            std::path::Path::new("/nonexistent/model.json"),
            toy_schema(),
            LabelPolicy::default(),
        )
        .expect("unavailable service still constructs");
        let service =
            AssessmentService::new(predictor, toy_registry(&[0, 1, 2]), None, CollectOptions::default());

        // Out of range for `a`, and `b` is missing.
        let payload = FormPayload::from_pairs(["a=200"]).expect("pairs");
        let err = service.assess(&payload, false).unwrap_err();
        assert!(matches!(err, StratifyError::ModelUnavailable(_)));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_demo_artifact_end_to_end() {
        use crate::adapters::stacking::StackingLoader;
        use crate::domain::{SchemaCatalog, SCHEMA_SUBTYPE_4};

        let schema = SchemaCatalog::builtin()
            .get_schema(SCHEMA_SUBTYPE_4)
            .expect("schema")
            .clone();
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("models/aecopd-subtype-4");
        let predictor = PredictionService::load(
            &StackingLoader::default(),
            &dir,
            schema.clone(),
            LabelPolicy::default(),
        )
        .expect("schema matches artifact");
        let model = Arc::clone(predictor.model().expect("demo artifact loads"));
        let explainer: Arc<dyn Explainer> =
            Arc::new(TreeExplainer::new(&model, None).expect("explainer"));
        let service = AssessmentService::new(
            predictor,
            SubtypeRegistry::builtin(SCHEMA_SUBTYPE_4).expect("registry"),
            Some(explainer),
            CollectOptions::default(),
        );

        // Reference patient with every field at its form default.
        let payload = FormPayload::from_pairs([
            "FVC=80.0",
            "fever=0",
            "tan_re=0",
            "uric_acid=300.0",
            "apoA=1.2",
            "Mg=0.9",
            "MCH=30.0",
            "basophil=0.5",
            "tan_huang=0",
            "tai_bai=0",
            "she_an=0",
            "cough=0",
        ])
        .expect("pairs");
        let assessment = service.assess(&payload, true).expect("assess");

        assert_eq!(assessment.inputs.len(), 12);
        assert_eq!(assessment.prediction.probabilities.len(), 4);
        assert_eq!(assessment.subtype.label, assessment.prediction.predicted_label);
        assert!(assessment.subtype.readmission_rate_percent.is_some());

        let result = assessment.attribution.result().expect("computed");
        let learner = model.boosted_learner(None).expect("boosted");
        let class_index = model
            .class_index(assessment.prediction.predicted_label)
            .expect("class");
        let features: Vec<f64> = assessment.inputs.iter().map(|i| i.value).collect();
        assert!((result.explained_output() - learner.margin(&features, class_index)).abs() < 1e-9);
    }
}
