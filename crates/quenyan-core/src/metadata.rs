//! Integrity-bound package metadata.
//!
//! Metadata rides in three places that must agree: plaintext in the
//! wrapper JSON, as a section inside the encrypted payload frame, and —
//! canonicalised and prefixed — as the AEAD associated data, which is
//! what binds it to the ciphertext. The canonical form is sorted-key
//! compact JSON, so two metadata values that differ only in construction
//! order authenticate identically.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::value::{Value, canonical_json};

/// Prefix of the associated-data string, versioning the AAD layout.
pub const METADATA_AAD_PREFIX: &[u8] = b"QYN1-METADATA-v1:";

/// Package metadata, required fields first.
///
/// The trailing optional fields (`audit_trail`, `provenance`,
/// `integrity_signature`) are preserved verbatim and never interpreted
/// by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package format revision
    pub package_version: String,
    /// Morpheme dictionary revision the tokens index into
    pub dictionary_version: String,
    /// Encoder that produced the stream
    pub encoder_version: String,
    /// Source language name
    pub source_language: String,
    /// Source language version
    pub source_language_version: String,
    /// Hex SHA-256 of the source, or empty
    pub source_hash: String,
    /// Compression backend name
    pub compression_backend: String,
    /// SHA-256 hex of the canonical compression model
    pub compression_model_digest: String,
    /// Token count
    pub symbol_count: u64,
    /// Encode timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Package author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Source license
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Key management provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_provider: Option<String>,
    /// Key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Key revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
    /// Key rotation deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_due: Option<String>,
    /// Opaque audit trail, carried verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_trail: Option<Vec<Value>>,
    /// Opaque provenance record, carried verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Value>,
    /// Opaque detached signature record, carried verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_signature: Option<Value>,
}

impl PackageMetadata {
    /// Canonical JSON of the metadata.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when serialisation fails.
    pub fn canonical(&self) -> Result<String> {
        canonical_json(self)
    }

    /// Associated data bound into the AEAD tag:
    /// `QYN1-METADATA-v1:` followed by the canonical JSON.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when serialisation fails.
    pub fn to_associated_data(&self) -> Result<Vec<u8>> {
        let mut data = METADATA_AAD_PREFIX.to_vec();
        data.extend_from_slice(self.canonical()?.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> PackageMetadata {
        PackageMetadata {
            package_version: "1.2.0".to_owned(),
            dictionary_version: "1.0".to_owned(),
            encoder_version: "qyn-encoder/0.4".to_owned(),
            source_language: "python".to_owned(),
            source_language_version: "3.12".to_owned(),
            source_hash: String::new(),
            compression_backend: "rans".to_owned(),
            compression_model_digest: "0".repeat(64),
            symbol_count: 3,
            timestamp: None,
            author: Some("ada".to_owned()),
            license: None,
            key_provider: None,
            key_id: None,
            key_version: None,
            rotation_due: None,
            audit_trail: None,
            provenance: None,
            integrity_signature: None,
        }
    }

    #[test]
    fn associated_data_is_prefixed_canonical_json() {
        let metadata = sample_metadata();
        let aad = metadata.to_associated_data().unwrap();
        assert!(aad.starts_with(METADATA_AAD_PREFIX));
        let json = std::str::from_utf8(&aad[METADATA_AAD_PREFIX.len()..]).unwrap();
        assert_eq!(json, metadata.canonical().unwrap());
        // Sorted keys: author precedes compression_backend.
        let author_pos = json.find("\"author\"").unwrap();
        let backend_pos = json.find("\"compression_backend\"").unwrap();
        assert!(author_pos < backend_pos);
    }

    #[test]
    fn absent_optionals_are_omitted_from_canonical_form() {
        let canonical = sample_metadata().canonical().unwrap();
        assert!(!canonical.contains("timestamp"));
        assert!(!canonical.contains("audit_trail"));
        assert!(canonical.contains("\"author\":\"ada\""));
    }

    #[test]
    fn opaque_fields_round_trip_verbatim() {
        let mut metadata = sample_metadata();
        metadata.provenance = Some(Value::map([
            ("pipeline", Value::from("ci")),
            ("step", Value::Int(4)),
        ]));
        metadata.audit_trail = Some(vec![Value::map([("event", Value::from("encoded"))])]);
        let json = metadata.canonical().unwrap();
        let parsed: PackageMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn json_round_trip_preserves_required_fields() {
        let metadata = sample_metadata();
        let parsed: PackageMetadata =
            serde_json::from_str(&metadata.canonical().unwrap()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn missing_required_field_fails_parse() {
        let result = serde_json::from_str::<PackageMetadata>(r#"{"package_version":"1.2.0"}"#);
        assert!(result.is_err());
    }
}
