//! Schema-ordered feature vectors.

use serde::Serialize;

use super::input::CollectedInput;
use super::schema::FeatureSchema;
use crate::StratifyError;

/// Positional model input. Element `i` belongs to the schema's feature `i`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    schema_version: String,
    values: Vec<f64>,
}

impl FeatureVector {
    #[must_use]
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pair each value with its feature name, in column order.
    pub fn named<'a>(
        &'a self,
        schema: &'a FeatureSchema,
    ) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        schema.names().zip(self.values.iter().copied())
    }
}

/// Project collected values into the schema's column order.
///
/// # Errors
/// Returns `StratifyError::MissingFeature` for the first schema feature
/// with no collected value.
pub fn assemble(
    schema: &FeatureSchema,
    collected: &CollectedInput,
) -> Result<FeatureVector, StratifyError> {
    let values = schema
        .names()
        .map(|name| {
            collected
                .get(name)
                .ok_or_else(|| StratifyError::MissingFeature(name.to_string()))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    Ok(FeatureVector {
        schema_version: schema.version().to_string(),
        values,
    })
}
