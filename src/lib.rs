//! # Stratify
//!
//! Subtype prediction core for AECOPD readmission risk.
//!
//! This crate provides:
//! - Versioned, strongly-typed feature schemas that fix the model's column order
//! - Bounded input collection and schema-ordered vector assembly
//! - Scoring with a pre-trained stacked ensemble loaded once at startup
//! - A static subtype registry (readmission rate, risk tier, clinical note)
//! - Optional per-feature attribution for the predicted subtype
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (FeatureSchema, FeatureVector, PredictionResult, SubtypeRecord)
//! - `ports`: Trait definitions for external collaborators (model, explainer, input)
//! - `adapters`: Concrete implementations (JSON ensemble artifact, explainers, payloads)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Environment-driven configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{
    AttributionResult, FeatureSchema, FeatureSpec, FeatureVector, PredictionResult, RiskTier,
    SubtypeRecord,
};

/// Result type for Stratify operations
pub type Result<T> = std::result::Result<T, StratifyError>;

/// Main error type for Stratify
#[derive(Debug, thiserror::Error)]
pub enum StratifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid value for '{feature}': {reason}")]
    Validation { feature: String, reason: String },

    #[error("Missing feature: {0}")]
    MissingFeature(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Model returned an invalid prediction: {0}")]
    InvalidPrediction(String),

    #[error("Unknown subtype label: {0}")]
    UnknownLabel(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StratifyError {
    /// Build a validation error for a single field.
    pub fn validation(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    /// Errors that block every prediction until the deployment is fixed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ModelUnavailable(_))
    }

    /// Errors the caller can fix by resubmitting corrected input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
