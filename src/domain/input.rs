//! Collected input values and the policies applied while collecting them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StratifyError;

/// A value as received from the input boundary, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    /// Boolean, null, array or object; rejected per field by the collector.
    Other(serde_json::Value),
}

impl RawValue {
    /// Coerce to a finite number.
    ///
    /// # Errors
    /// Returns a reason string if the value is not numeric or not finite.
    pub fn to_f64(&self) -> Result<f64, String> {
        let value = match self {
            Self::Number(v) => *v,
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number"))?,
            Self::Other(v) => return Err(format!("expected a number, got {v}")),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("{value} is not a finite number"))
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// What to do with a continuous value outside its declared range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Fail the request with a validation error.
    #[default]
    Reject,
    /// Clamp to the nearest bound and log a warning.
    Clamp,
}

impl FromStr for BoundsPolicy {
    type Err = StratifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "clamp" => Ok(Self::Clamp),
            other => Err(StratifyError::Configuration(format!(
                "unknown bounds policy '{other}' (expected reject or clamp)"
            ))),
        }
    }
}

impl fmt::Display for BoundsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Clamp => write!(f, "clamp"),
        }
    }
}

/// Options for the input collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    pub bounds: BoundsPolicy,
    /// Substitute the schema default for fields the source does not provide.
    pub fill_defaults: bool,
}

/// Validated values keyed by feature name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectedInput {
    values: BTreeMap<String, f64>,
}

impl CollectedInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for CollectedInput {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
