//! Artifact integrity: SHA-256 manifest binding and Ed25519 signatures.
//!
//! A model directory may carry two files next to the artifact:
//! - `manifest.json`: `{ "version": 1, "files": { "<artifact file name>": "<sha256 hex>" } }`
//! - `model.sig`: 64-byte Ed25519 signature over the exact manifest bytes
//!
//! The manifest binds the artifact actually loaded; the signature binds the
//! manifest to a deployment key.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "model.sig";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactManifest {
    pub version: u32,
    pub files: BTreeMap<String, String>,
}

/// How far an artifact was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// No manifest next to the artifact.
    Unverified,
    /// Manifest hash matches; no signature checked.
    HashBound,
    /// Manifest hash matches and its signature verified.
    Signed,
}

/// Integrity requirements applied when loading an artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactVerification {
    /// Refuse artifacts without a valid signed manifest.
    pub require_signature: bool,
    /// Key that signs deployment manifests.
    pub public_key: Option<VerifyingKey>,
}

impl ArtifactVerification {
    /// Parse a base64-encoded 32-byte Ed25519 public key.
    pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|_| "Invalid public key base64".to_string())?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| "Invalid public key length (expected 32 bytes)".to_string())?;
        VerifyingKey::from_bytes(&key).map_err(|_| "Invalid verifying key".to_string())
    }

    /// Check the artifact at `artifact_path`, whose contents are `artifact_bytes`.
    pub fn verify(
        &self,
        artifact_path: &Path,
        artifact_bytes: &[u8],
    ) -> Result<VerificationStatus, String> {
        let dir = artifact_path.parent().unwrap_or_else(|| Path::new("."));
        let manifest_path = dir.join(MANIFEST_FILE);
        let sig_path = dir.join(SIGNATURE_FILE);

        if !manifest_path.exists() {
            if self.require_signature {
                return Err(format!(
                    "signed manifest required but {MANIFEST_FILE} not found in {dir:?}"
                ));
            }
            tracing::warn!("No {} next to {:?}; loading unverified artifact", MANIFEST_FILE, artifact_path);
            return Ok(VerificationStatus::Unverified);
        }

        let manifest_bytes =
            fs::read(&manifest_path).map_err(|e| format!("Failed to read manifest: {e}"))?;

        let signed = self.verify_signature(&sig_path, &manifest_bytes)?;

        let manifest: ArtifactManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| format!("Invalid {MANIFEST_FILE} format: {e}"))?;
        if manifest.version != 1 {
            return Err(format!("Unsupported manifest version: {}", manifest.version));
        }

        let file_name = artifact_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("Artifact path {artifact_path:?} has no file name"))?;
        let expected = manifest
            .files
            .get(file_name)
            .ok_or_else(|| format!("{MANIFEST_FILE} does not bind {file_name}"))?;

        let actual = sha256_hex(artifact_bytes);
        if !constant_time_eq_str(&expected.trim().to_ascii_lowercase(), &actual) {
            return Err(format!("SHA-256 mismatch for {file_name}"));
        }

        Ok(if signed {
            VerificationStatus::Signed
        } else {
            VerificationStatus::HashBound
        })
    }

    /// Returns whether a signature was verified.
    fn verify_signature(&self, sig_path: &Path, manifest_bytes: &[u8]) -> Result<bool, String> {
        if !sig_path.exists() {
            if self.require_signature {
                return Err(format!("signature required but {SIGNATURE_FILE} not found"));
            }
            return Ok(false);
        }

        let Some(public_key) = &self.public_key else {
            if self.require_signature {
                return Err("signature required but no public key configured".to_string());
            }
            tracing::warn!("{} present but no public key configured; signature not checked", SIGNATURE_FILE);
            return Ok(false);
        };

        let sig_bytes = fs::read(sig_path).map_err(|e| format!("Failed to read signature: {e}"))?;
        let sig: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| "Invalid signature length (expected 64 bytes)".to_string())?;

        public_key
            .verify(manifest_bytes, &Signature::from_bytes(&sig))
            .map_err(|_| "Invalid manifest signature".to_string())?;
        Ok(true)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// Constant-time compare for hex digests.
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
