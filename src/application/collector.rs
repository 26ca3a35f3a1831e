//! Input collector: validates raw front-end values against a schema.

use crate::domain::{BoundsPolicy, CollectOptions, CollectedInput, FeatureKind, FeatureSchema};
use crate::ports::InputSource;
use crate::StratifyError;

/// Gather and validate one value per schema feature from `source`.
///
/// Absent fields are skipped unless `options.fill_defaults` is set, in which
/// case they take the feature default; the assembler reports anything still
/// missing. Fields the schema does not know are logged and ignored.
///
/// # Errors
/// Returns `StratifyError::Validation` for a non-numeric or non-finite value,
/// a binary value other than 0 or 1, or (under `BoundsPolicy::Reject`) a
/// continuous value outside its declared range.
pub fn collect(
    schema: &FeatureSchema,
    source: &dyn InputSource,
    options: CollectOptions,
) -> Result<CollectedInput, StratifyError> {
    let mut collected = CollectedInput::new();

    for spec in schema.specs() {
        let Some(raw) = source.raw_value(&spec.name) else {
            if options.fill_defaults {
                tracing::debug!("Field '{}' absent, using default", spec.name);
                collected.insert(spec.name.clone(), spec.default_value());
            }
            continue;
        };

        let value = raw
            .to_f64()
            .map_err(|reason| StratifyError::validation(&spec.name, reason))?;

        let value = match spec.kind {
            FeatureKind::Binary { .. } => {
                if value != 0.0 && value != 1.0 {
                    return Err(StratifyError::validation(
                        &spec.name,
                        format!("binary field must be 0 or 1, got {value}"),
                    ));
                }
                value
            }
            FeatureKind::Continuous { min, max, .. } => {
                if (min..=max).contains(&value) {
                    value
                } else {
                    match options.bounds {
                        BoundsPolicy::Reject => {
                            return Err(StratifyError::validation(
                                &spec.name,
                                format!("{value} outside [{min}, {max}]"),
                            ));
                        }
                        BoundsPolicy::Clamp => {
                            let clamped = value.clamp(min, max);
                            tracing::warn!(
                                "Field '{}' outside [{}, {}], clamped to {}",
                                spec.name,
                                min,
                                max,
                                clamped
                            );
                            clamped
                        }
                    }
                }
            }
        };
        collected.insert(spec.name.clone(), value);
    }

    let unknown: Vec<String> = source
        .field_names()
        .into_iter()
        .filter(|name| schema.index_of(name).is_none())
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(
            "Ignoring {} field(s) not in schema {}: {}",
            unknown.len(),
            schema.version(),
            unknown.join(", ")
        );
    }

    Ok(collected)
}
