//! Domain layer: Core types and pure logic.
//!
//! Nothing in here touches the filesystem except the explicit schema and
//! registry file loaders. All types validate their invariants on construction.

mod assessment;
mod attribution;
mod input;
mod prediction;
mod schema;
mod subtype;
mod vector;

pub use assessment::{Assessment, InputValue};
pub use attribution::{
    AttributionError, AttributionOutcome, AttributionResult, ExplainerKind, FeatureContribution,
};
pub use input::{BoundsPolicy, CollectOptions, CollectedInput, RawValue};
pub use prediction::{
    LabelPolicy, LabelProbability, ModelInfo, PredictionResult, PROBABILITY_SUM_TOLERANCE,
};
pub use schema::{
    FeatureKind, FeatureSchema, FeatureSpec, SchemaCatalog, SCHEMA_SUBTYPE_4, SCHEMA_SUBTYPE_6,
};
pub use subtype::{RiskTier, SubtypeRecord, SubtypeRegistry};
pub use vector::{assemble, FeatureVector};
