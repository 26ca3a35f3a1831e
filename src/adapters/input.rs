//! Input payload adapter: form values from JSON or `name=value` pairs.

use std::collections::BTreeMap;

use crate::domain::RawValue;
use crate::ports::InputSource;
use crate::StratifyError;

/// Raw form values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormPayload {
    fields: BTreeMap<String, RawValue>,
}

impl FormPayload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat JSON object of field values.
    ///
    /// Values that are neither numbers nor strings are kept as
    /// `RawValue::Other` and rejected per field by the collector.
    ///
    /// # Errors
    /// Returns `StratifyError::Serialization` if the text is not a JSON object.
    pub fn from_json(content: &str) -> Result<Self, StratifyError> {
        let fields: BTreeMap<String, RawValue> = serde_json::from_str(content)?;
        Ok(Self { fields })
    }

    /// Parse `name=value` arguments. A later pair overrides an earlier one.
    ///
    /// # Errors
    /// Returns `StratifyError::Validation` for an argument without `=` or
    /// with an empty name.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, StratifyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut payload = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| StratifyError::validation(pair, "expected name=value"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(StratifyError::validation(pair, "empty field name"));
            }
            payload.insert(name, RawValue::from(value));
        }
        Ok(payload)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Merge `other` into `self`; fields in `other` win.
    pub fn merge(&mut self, other: Self) {
        self.fields.extend(other.fields);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl InputSource for FormPayload {
    fn raw_value(&self, name: &str) -> Option<RawValue> {
        self.fields.get(name).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_accepts_numbers_and_strings() {
        let payload = FormPayload::from_json(r#"{"FVC": 85.5, "fever": "1"}"#).expect("parse");
        assert_eq!(payload.raw_value("FVC"), Some(RawValue::Number(85.5)));
        assert_eq!(payload.raw_value("fever"), Some(RawValue::Text("1".into())));
        assert_eq!(payload.raw_value("cough"), None);
        assert_eq!(payload.field_names(), vec!["FVC", "fever"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = FormPayload::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, StratifyError::Serialization(_)));
    }

    #[test]
    fn test_from_json_keeps_non_numeric_values() {
        let payload =
            FormPayload::from_json(r#"{"fever": true, "cough": null, "Mg": [1]}"#).expect("parse");
        assert_eq!(
            payload.raw_value("fever"),
            Some(RawValue::Other(serde_json::Value::Bool(true)))
        );
        assert_eq!(payload.raw_value("cough"), Some(RawValue::Other(serde_json::Value::Null)));
        assert!(payload.raw_value("Mg").expect("present").to_f64().is_err());
    }

    #[test]
    fn test_from_pairs() {
        let payload = FormPayload::from_pairs(["Mg=0.9", " MCH = 30", "Mg=1.1"]).expect("pairs");
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.raw_value("Mg"), Some(RawValue::Text("1.1".into())));
        assert_eq!(
            payload.raw_value("MCH").map(|v| v.to_f64()),
            Some(Ok(30.0))
        );

        assert!(FormPayload::from_pairs(["Mg"]).is_err());
        assert!(FormPayload::from_pairs(["=3"]).is_err());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = FormPayload::from_pairs(["a=1", "b=2"]).expect("pairs");
        base.merge(FormPayload::from_pairs(["b=3"]).expect("pairs"));
        assert_eq!(base.raw_value("b"), Some(RawValue::Text("3".into())));
        assert_eq!(base.len(), 2);
    }
}
