//! Assessment: the complete output of one prediction request.

use serde::Serialize;

use super::attribution::{AttributionOutcome, FeatureContribution};
use super::prediction::{ModelInfo, PredictionResult};
use super::subtype::SubtypeRecord;

/// One submitted input value, echoed back in schema order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputValue {
    pub feature: String,
    pub display_name: String,
    pub value: f64,
}

/// Prediction, registry entry and attribution for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    /// Unique identifier
    pub id: String,

    /// Schema the input vector was assembled for
    pub schema_version: String,

    /// Model that produced the prediction
    pub model: ModelInfo,

    /// Values fed to the model, in column order
    pub inputs: Vec<InputValue>,

    pub prediction: PredictionResult,

    /// Probability of the reported subtype
    pub confidence: f64,

    /// Registry entry for `prediction.predicted_label`
    pub subtype: SubtypeRecord,

    pub attribution: AttributionOutcome,

    /// Attribution contributions by decreasing magnitude; empty without one
    pub ranked_features: Vec<FeatureContribution>,

    /// Timestamp of the assessment
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Assessment {
    #[must_use]
    pub fn new(
        schema_version: impl Into<String>,
        model: ModelInfo,
        inputs: Vec<InputValue>,
        prediction: PredictionResult,
        subtype: SubtypeRecord,
        attribution: AttributionOutcome,
    ) -> Self {
        let ranked_features = attribution
            .result()
            .map(|result| result.ranked().into_iter().cloned().collect())
            .unwrap_or_default();
        Self {
            id: uuid_v4(),
            schema_version: schema_version.into(),
            model,
            inputs,
            confidence: prediction.confidence(),
            prediction,
            subtype,
            attribution,
            ranked_features,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Generate a random UUID v4 string from an OS-seeded ChaCha20 stream.
fn uuid_v4() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let mut bytes: [u8; 16] = rng.gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_generation() {
        let id1 = uuid_v4();
        let id2 = uuid_v4();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
        assert_eq!(&id1[14..15], "4");
    }
}
