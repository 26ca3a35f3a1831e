//! Adapters layer: Concrete implementations of ports.
//!
//! - `stacking`: JSON stacked-ensemble artifacts with manifest verification
//! - `explain`: sampling and tree attribution methods
//! - `input`: form payloads from JSON or `name=value` pairs
//! - `sanitize`: redaction of identifiers and feature values in logs

pub mod explain;
pub mod input;
pub mod sanitize;
pub mod stacking;
