//! Subtype registry: static clinical reference data per predicted label.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::schema::{SCHEMA_SUBTYPE_4, SCHEMA_SUBTYPE_6};
use crate::StratifyError;

/// Readmission risk tier of a subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    /// Below-cohort readmission rate
    Low,
    /// Around the cohort rate, follow-up recommended
    Moderate,
    /// Above-cohort rate, close follow-up advised
    High,
}

impl RiskTier {
    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - routine follow-up",
            Self::Moderate => "Moderate risk - scheduled follow-up recommended",
            Self::High => "High risk - close follow-up after discharge advised",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Reference entry for one subtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtypeRecord {
    pub label: u32,
    pub display_name: String,

    /// Historical one-year readmission rate, when the cohort study published one
    #[serde(default)]
    pub readmission_rate_percent: Option<f64>,

    #[serde(default)]
    pub risk_tier: Option<RiskTier>,

    #[serde(default)]
    pub clinical_note: String,
}

/// Read-only label -> record table for one model version.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtypeRegistry {
    records: BTreeMap<u32, SubtypeRecord>,
}

impl SubtypeRegistry {
    /// Build a registry, rejecting duplicate labels.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` on duplicates, an empty list or
    /// a rate outside [0, 100].
    pub fn new(records: Vec<SubtypeRecord>) -> Result<Self, StratifyError> {
        if records.is_empty() {
            return Err(StratifyError::Configuration("subtype registry is empty".into()));
        }
        let mut map = BTreeMap::new();
        for record in records {
            if let Some(rate) = record.readmission_rate_percent {
                if !(0.0..=100.0).contains(&rate) {
                    return Err(StratifyError::Configuration(format!(
                        "subtype {}: readmission rate {rate} outside [0, 100]",
                        record.label
                    )));
                }
            }
            let label = record.label;
            if map.insert(label, record).is_some() {
                return Err(StratifyError::Configuration(format!(
                    "duplicate subtype label {label}"
                )));
            }
        }
        Ok(Self { records: map })
    }

    /// Built-in registry for a schema version.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if no registry ships for `version`.
    pub fn builtin(version: &str) -> Result<Self, StratifyError> {
        let records = match version {
            SCHEMA_SUBTYPE_4 => subtype_4_records(),
            SCHEMA_SUBTYPE_6 => subtype_6_records(),
            other => {
                return Err(StratifyError::Configuration(format!(
                    "no built-in subtype registry for schema '{other}'"
                )))
            }
        };
        Self::new(records)
    }

    /// Load a registry from a JSON array of records.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the records are invalid.
    pub fn load_file(path: &Path) -> Result<Self, StratifyError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StratifyError::Configuration(format!("cannot read registry file {path:?}: {e}"))
        })?;
        let records: Vec<SubtypeRecord> = serde_json::from_str(&content).map_err(|e| {
            StratifyError::Configuration(format!("invalid registry file {path:?}: {e}"))
        })?;
        let registry = Self::new(records)?;
        tracing::info!("Loaded {} subtype record(s) from {:?}", registry.len(), path);
        Ok(registry)
    }

    /// Record for a predicted label.
    ///
    /// # Errors
    /// Returns `StratifyError::UnknownLabel` for labels outside the registry.
    pub fn lookup(&self, label: u32) -> Result<&SubtypeRecord, StratifyError> {
        self.records
            .get(&label)
            .ok_or(StratifyError::UnknownLabel(label))
    }

    pub fn labels(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.keys().copied()
    }

    /// Labels in `classes` with no registry entry.
    #[must_use]
    pub fn missing_labels(&self, classes: &[u32]) -> Vec<u32> {
        classes
            .iter()
            .copied()
            .filter(|c| !self.records.contains_key(c))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn record(
    label: u32,
    rate: f64,
    tier: RiskTier,
    note: &str,
) -> SubtypeRecord {
    SubtypeRecord {
        label,
        display_name: format!("Subtype {}", label + 1),
        readmission_rate_percent: Some(rate),
        risk_tier: Some(tier),
        clinical_note: note.to_string(),
    }
}

fn subtype_4_records() -> Vec<SubtypeRecord> {
    vec![
        record(
            0,
            8.6,
            RiskTier::Low,
            "Preserved lung function with few phlegm-heat signs.",
        ),
        record(
            1,
            19.2,
            RiskTier::High,
            "Phlegm-heat pattern with fever and cough; readmission most frequent in this group.",
        ),
        record(
            2,
            12.7,
            RiskTier::Moderate,
            "Metabolic pattern with raised uric acid and low apolipoprotein A.",
        ),
        record(
            3,
            14.9,
            RiskTier::Moderate,
            "Reduced FVC with mixed tongue and sputum findings.",
        ),
    ]
}

/// The six-subtype cohort published no readmission table.
fn subtype_6_records() -> Vec<SubtypeRecord> {
    (0..6)
        .map(|label| SubtypeRecord {
            label,
            display_name: format!("Subtype {}", label + 1),
            readmission_rate_percent: None,
            risk_tier: None,
            clinical_note: String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_risk_subtype_lookup() {
        let registry = SubtypeRegistry::builtin(SCHEMA_SUBTYPE_4).expect("registry");
        let record = registry.lookup(1).expect("label 1");

        assert_eq!(record.readmission_rate_percent, Some(19.2));
        assert_eq!(record.risk_tier, Some(RiskTier::High));
        assert_eq!(record.risk_tier.map(|t| t.to_string()).as_deref(), Some("high"));
    }

    #[test]
    fn test_lookup_total_over_configured_labels() {
        for (version, count) in [(SCHEMA_SUBTYPE_4, 4), (SCHEMA_SUBTYPE_6, 6)] {
            let registry = SubtypeRegistry::builtin(version).expect("registry");
            assert_eq!(registry.len(), count);
            for label in registry.labels().collect::<Vec<_>>() {
                assert_eq!(registry.lookup(label).expect("known label").label, label);
            }
        }
    }

    #[test]
    fn test_unknown_label_fails_deterministically() {
        let registry = SubtypeRegistry::builtin(SCHEMA_SUBTYPE_4).expect("registry");
        for _ in 0..3 {
            assert!(matches!(registry.lookup(4), Err(StratifyError::UnknownLabel(4))));
        }
        assert_eq!(registry.missing_labels(&[0, 1, 4, 5]), vec![4, 5]);
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let records = vec![
            record(0, 1.0, RiskTier::Low, ""),
            record(0, 2.0, RiskTier::High, ""),
        ];
        assert!(SubtypeRegistry::new(records).is_err());
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        let json = serde_json::to_string(&RiskTier::Moderate).expect("serialize");
        assert_eq!(json, "\"moderate\"");
    }

    #[test]
    fn test_load_registry_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"[{"label": 0, "display_name": "A", "readmission_rate_percent": 5.0, "risk_tier": "low"},
                {"label": 1, "display_name": "B"}]"#,
        )
        .expect("write registry");

        let registry = SubtypeRegistry::load_file(&path).expect("load");
        assert_eq!(registry.lookup(0).expect("0").risk_tier, Some(RiskTier::Low));
        assert_eq!(registry.lookup(1).expect("1").readmission_rate_percent, None);
    }
}
