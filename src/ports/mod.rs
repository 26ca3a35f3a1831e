//! Ports layer: Trait definitions for external collaborators.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and the model artifact, the explainability
//! method and the input front end.

mod classifier;
mod explainer;
mod input_source;

pub use classifier::{Classifier, ModelLoader};
pub use explainer::{Explainer, Explanation};
pub use input_source::InputSource;
