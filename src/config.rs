//! Environment-driven configuration.
//!
//! Every setting is read from a `STRATIFY_*` variable once at startup.
//! Malformed values fail startup with `StratifyError::Configuration`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::adapters::explain::SamplingOptions;
use crate::adapters::stacking::ArtifactVerification;
use crate::domain::{BoundsPolicy, CollectOptions, ExplainerKind, LabelPolicy, SCHEMA_SUBTYPE_4};
use crate::StratifyError;

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_LOG_FILE: &str = "stratify.log";

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    File,
    Stderr,
    /// Stderr when it is a terminal, the log file otherwise
    #[default]
    Auto,
}

impl FromStr for LogMode {
    type Err = StratifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "stderr" => Ok(Self::Stderr),
            "auto" => Ok(Self::Auto),
            other => Err(StratifyError::Configuration(format!(
                "unknown log mode '{other}' (expected file, stderr or auto)"
            ))),
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Artifact file, or a directory holding `stacking_classifier.json`.
    /// Unset means `models/<schema_version>`.
    pub model_path: Option<PathBuf>,
    pub schema_version: String,
    /// Extra schemas to register next to the built-in ones
    pub schema_path: Option<PathBuf>,
    /// Registry file replacing the built-in registry
    pub registry_path: Option<PathBuf>,
    pub collect: CollectOptions,
    pub label_policy: LabelPolicy,
    /// `None` disables attribution
    pub explainer: Option<ExplainerKind>,
    pub sampling: SamplingOptions,
    /// Boosted learner the tree explainer binds to; first one if unset
    pub tree_learner: Option<String>,
    pub require_signed_models: bool,
    pub model_pubkey_b64: Option<String>,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            schema_version: SCHEMA_SUBTYPE_4.to_string(),
            schema_path: None,
            registry_path: None,
            collect: CollectOptions::default(),
            label_policy: LabelPolicy::default(),
            explainer: None,
            sampling: SamplingOptions::default(),
            tree_learner: None,
            require_signed_models: false,
            model_pubkey_b64: None,
            log_mode: LogMode::default(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` for any malformed variable.
    pub fn from_env() -> Result<Self, StratifyError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` for any malformed variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StratifyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = var("STRATIFY_MODEL_PATH") {
            config.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("STRATIFY_SCHEMA_VERSION") {
            config.schema_version = v;
        }
        config.schema_path = var("STRATIFY_SCHEMA_PATH").map(PathBuf::from);
        config.registry_path = var("STRATIFY_REGISTRY_PATH").map(PathBuf::from);

        if let Some(v) = var("STRATIFY_BOUNDS_POLICY") {
            config.collect.bounds = v.parse::<BoundsPolicy>()?;
        }
        if let Some(v) = var("STRATIFY_FILL_DEFAULTS") {
            config.collect.fill_defaults = parse_bool("STRATIFY_FILL_DEFAULTS", &v)?;
        }
        if let Some(v) = var("STRATIFY_LABEL_POLICY") {
            config.label_policy = v.parse::<LabelPolicy>()?;
        }
        if let Some(v) = var("STRATIFY_EXPLAINER") {
            config.explainer = parse_explainer(&v)?;
        }

        if let Some(v) = var("STRATIFY_EXPLAIN_SAMPLES") {
            config.sampling.samples = parse_number("STRATIFY_EXPLAIN_SAMPLES", &v)?;
            if config.sampling.samples == 0 {
                return Err(StratifyError::Configuration(
                    "STRATIFY_EXPLAIN_SAMPLES must be at least 1".into(),
                ));
            }
        }
        if let Some(v) = var("STRATIFY_EXPLAIN_SEED") {
            config.sampling.seed = parse_number("STRATIFY_EXPLAIN_SEED", &v)?;
        }
        if let Some(v) = var("STRATIFY_EXPLAIN_TIMEOUT_MS") {
            let ms: u64 = parse_number("STRATIFY_EXPLAIN_TIMEOUT_MS", &v)?;
            // 0 disables the deadline
            config.sampling.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config.tree_learner = var("STRATIFY_TREE_LEARNER");

        if let Some(v) = var("STRATIFY_REQUIRE_SIGNED_MODELS") {
            config.require_signed_models = parse_bool("STRATIFY_REQUIRE_SIGNED_MODELS", &v)?;
        }
        config.model_pubkey_b64 = var("STRATIFY_MODEL_PUBKEY_B64");

        if let Some(v) = var("STRATIFY_LOG_MODE") {
            config.log_mode = v.parse()?;
        }
        if let Some(v) = var("STRATIFY_LOG_FILE") {
            config.log_file = PathBuf::from(v);
        }

        Ok(config)
    }

    /// Model location for the active schema.
    #[must_use]
    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR).join(&self.schema_version))
    }

    /// Integrity requirements for the model loader.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if the public key is malformed,
    /// or signatures are required without a key.
    pub fn artifact_verification(&self) -> Result<ArtifactVerification, StratifyError> {
        let public_key = self
            .model_pubkey_b64
            .as_deref()
            .map(ArtifactVerification::verifying_key_from_b64)
            .transpose()
            .map_err(|e| StratifyError::Configuration(format!("STRATIFY_MODEL_PUBKEY_B64: {e}")))?;

        if self.require_signed_models && public_key.is_none() {
            return Err(StratifyError::Configuration(
                "STRATIFY_REQUIRE_SIGNED_MODELS is set but STRATIFY_MODEL_PUBKEY_B64 is not".into(),
            ));
        }

        Ok(ArtifactVerification {
            require_signature: self.require_signed_models,
            public_key,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, StratifyError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StratifyError::Configuration(format!(
            "{name}: expected a boolean, got '{value}'"
        ))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, StratifyError> {
    value.parse::<T>().map_err(|_| {
        StratifyError::Configuration(format!("{name}: expected a non-negative integer, got '{value}'"))
    })
}

/// `none` disables attribution.
pub fn parse_explainer(value: &str) -> Result<Option<ExplainerKind>, StratifyError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" | "off" => Ok(None),
        other => other.parse::<ExplainerKind>().map(Some),
    }
}
