//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the assessment use case.

mod assessment;
mod collector;
mod prediction;

pub use assessment::AssessmentService;
pub use collector::collect;
pub use prediction::PredictionService;
