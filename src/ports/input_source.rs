//! Input port: where raw feature values come from.

use crate::domain::RawValue;

/// Trait for a front end that supplies raw values by feature name
/// (form fields, API payload, command-line pairs).
pub trait InputSource {
    /// Raw value for `name`, if the front end provided one.
    fn raw_value(&self, name: &str) -> Option<RawValue>;

    /// Every field name the front end provided.
    fn field_names(&self) -> Vec<String>;
}
