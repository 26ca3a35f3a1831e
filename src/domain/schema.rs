//! Feature schemas: the ordered list of inputs each model version expects.
//!
//! The order of `specs` is the column order the model was trained on. It is
//! declared here as data and validated against the model artifact at startup;
//! it is never derived from how a front end lays out its fields.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::StratifyError;

/// Schema id of the 12-feature, 4-subtype model.
pub const SCHEMA_SUBTYPE_4: &str = "aecopd-subtype-4";

/// Schema id of the 13-feature, 6-subtype model.
pub const SCHEMA_SUBTYPE_6: &str = "aecopd-subtype-6";

/// Value domain of a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Range-bounded measurement.
    Continuous { min: f64, max: f64, default: f64 },
    /// Indicator restricted to {0, 1}.
    Binary {
        #[serde(default)]
        default: u8,
    },
}

/// One named model input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Column name used by the model artifact
    pub name: String,

    /// Human-readable label for forms and summaries
    #[serde(default)]
    pub display_name: String,

    /// Value domain
    #[serde(flatten)]
    pub kind: FeatureKind,
}

impl FeatureSpec {
    /// Create a continuous feature bounded to `[min, max]`.
    #[must_use]
    pub fn continuous(name: &str, display_name: &str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: FeatureKind::Continuous { min, max, default },
        }
    }

    /// Create a binary indicator defaulting to 0.
    #[must_use]
    pub fn binary(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: FeatureKind::Binary { default: 0 },
        }
    }

    /// Default value, as fed to the model.
    #[must_use]
    pub fn default_value(&self) -> f64 {
        match self.kind {
            FeatureKind::Continuous { default, .. } => default,
            FeatureKind::Binary { default } => f64::from(default),
        }
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self.kind, FeatureKind::Binary { .. })
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("feature name must not be empty".to_string());
        }
        match self.kind {
            FeatureKind::Continuous { min, max, default } => {
                if !min.is_finite() || !max.is_finite() || !default.is_finite() {
                    return Err(format!("{}: bounds and default must be finite", self.name));
                }
                if min > max {
                    return Err(format!("{}: min {min} exceeds max {max}", self.name));
                }
                if !(min..=max).contains(&default) {
                    return Err(format!(
                        "{}: default {default} outside [{min}, {max}]",
                        self.name
                    ));
                }
            }
            FeatureKind::Binary { default } => {
                if default > 1 {
                    return Err(format!("{}: binary default must be 0 or 1", self.name));
                }
            }
        }
        Ok(())
    }
}

/// Ordered, validated feature list for one model version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSchema {
    version: String,
    specs: Vec<FeatureSpec>,
}

#[derive(Deserialize)]
struct SchemaDocument {
    version: String,
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    /// Build a schema, rejecting duplicate names and inconsistent bounds.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if any spec is invalid.
    pub fn new(version: impl Into<String>, specs: Vec<FeatureSpec>) -> Result<Self, StratifyError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(StratifyError::Configuration(
                "schema version must not be empty".into(),
            ));
        }
        if specs.is_empty() {
            return Err(StratifyError::Configuration(format!(
                "schema {version} declares no features"
            )));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate()
                .map_err(|e| StratifyError::Configuration(format!("schema {version}: {e}")))?;
            if !seen.insert(spec.name.as_str()) {
                return Err(StratifyError::Configuration(format!(
                    "schema {version}: duplicate feature name '{}'",
                    spec.name
                )));
            }
        }

        Ok(Self { version, specs })
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Feature names in model column order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Position of a feature in the model vector.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Schema defaults in column order.
    #[must_use]
    pub fn defaults(&self) -> Vec<f64> {
        self.specs.iter().map(FeatureSpec::default_value).collect()
    }
}

/// Lookup table of the schemas this deployment knows about.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, FeatureSchema>,
}

impl SchemaCatalog {
    /// Catalog holding the built-in schema versions.
    #[must_use]
    pub fn builtin() -> Self {
        let mut schemas = BTreeMap::new();
        for schema in [subtype_4_schema(), subtype_6_schema()] {
            schemas.insert(schema.version.clone(), schema);
        }
        Self { schemas }
    }

    /// Add a schema. A version id can only be registered once.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` on a duplicate version id.
    pub fn register(&mut self, schema: FeatureSchema) -> Result<(), StratifyError> {
        if self.schemas.contains_key(&schema.version) {
            return Err(StratifyError::Configuration(format!(
                "schema version '{}' is already registered",
                schema.version
            )));
        }
        self.schemas.insert(schema.version.clone(), schema);
        Ok(())
    }

    /// Register every schema listed in a JSON file.
    ///
    /// The file holds an array of `{ "version": ..., "features": [...] }` objects.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or any schema is invalid.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, StratifyError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StratifyError::Configuration(format!("cannot read schema file {path:?}: {e}"))
        })?;
        let documents: Vec<SchemaDocument> = serde_json::from_str(&content).map_err(|e| {
            StratifyError::Configuration(format!("invalid schema file {path:?}: {e}"))
        })?;

        let count = documents.len();
        for doc in documents {
            self.register(FeatureSchema::new(doc.version, doc.features)?)?;
        }
        Ok(count)
    }

    /// Resolve a schema by version id.
    ///
    /// # Errors
    /// Returns `StratifyError::Configuration` if the version is unknown.
    pub fn get_schema(&self, version_id: &str) -> Result<&FeatureSchema, StratifyError> {
        self.schemas.get(version_id).ok_or_else(|| {
            StratifyError::Configuration(format!(
                "unknown schema version '{version_id}' (known: {})",
                self.versions().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

/// 12 features, 4 subtypes. Column order as exported with the model.
fn subtype_4_schema() -> FeatureSchema {
    let specs = vec![
        FeatureSpec::continuous("FVC", "FVC (% predicted)", 22.92, 139.45, 80.0),
        FeatureSpec::binary("fever", "Fever"),
        FeatureSpec::binary("tan_re", "Heat-type sputum"),
        FeatureSpec::continuous("uric_acid", "Uric acid (umol/L)", 71.0, 731.3, 300.0),
        FeatureSpec::continuous("apoA", "Apolipoprotein A (g/L)", 0.34, 2.61, 1.2),
        FeatureSpec::continuous("Mg", "Magnesium (mmol/L)", 0.35, 2.26, 0.9),
        FeatureSpec::continuous("MCH", "Mean corpuscular hemoglobin (pg)", 18.1, 43.3, 30.0),
        FeatureSpec::continuous("basophil", "Basophil percentage (%)", 0.0, 4.2, 0.5),
        FeatureSpec::binary("tan_huang", "Yellow sputum"),
        FeatureSpec::binary("tai_bai", "White tongue coating"),
        FeatureSpec::binary("she_an", "Dark tongue"),
        FeatureSpec::binary("cough", "Cough"),
    ];
    FeatureSchema {
        version: SCHEMA_SUBTYPE_4.to_string(),
        specs,
    }
}

/// 13 features, 6 subtypes.
fn subtype_6_schema() -> FeatureSchema {
    let specs = vec![
        FeatureSpec::continuous("FEV", "FEV1%/FVC best/predicted (%)", 26.81, 102.87, 65.0),
        FeatureSpec::continuous("BMI", "Body mass index (kg/m2)", 8.65, 40.53, 22.0),
        FeatureSpec::continuous("HDL", "HDL cholesterol (mmol/L)", 0.35, 2.61, 1.2),
        FeatureSpec::continuous("Mg", "Magnesium (mmol/L)", 0.35, 2.26, 0.9),
        // Upper bound ships with the model export; honored as given.
        FeatureSpec::continuous("RBC", "Red blood cell count (10^12/L)", 0.0, 249.19, 4.5),
        FeatureSpec::continuous("SBP", "Systolic blood pressure (mmHg)", 0.0, 222.0, 120.0),
        FeatureSpec::binary("mai_shu", "Rapid pulse"),
        FeatureSpec::binary("jingshen_weimi", "Listlessness"),
        FeatureSpec::binary("mai_hua", "Slippery pulse"),
        FeatureSpec::binary("tai_bai", "White tongue coating"),
        FeatureSpec::binary("xiong_men", "Chest tightness"),
        FeatureSpec::binary("chuan_xi", "Wheezing"),
        FeatureSpec::binary("mai_chen", "Deep pulse"),
    ];
    FeatureSchema {
        version: SCHEMA_SUBTYPE_6.to_string(),
        specs,
    }
}
