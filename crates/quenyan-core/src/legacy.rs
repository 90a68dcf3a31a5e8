//! Legacy JSON wrapper support (decode only).
//!
//! Before the framed wrapper, a package was a single JSON object with
//! base64 fields. The decrypted payload is an inner JSON object carrying
//! either a raw rANS `table` block (format 1.0) or a
//! `compression.{backend, model, symbol_count}` block, with payloads as
//! a flat `[{type, value}]` list. This module keeps the whole path
//! isolated; the current-format pipeline never branches on it.

use serde::Deserialize;

use quenyan_crypto::{EncryptionResult, KdfParameters, decrypt};
use quenyan_proto::{Version, ensure_supported, parse_any_version};

use crate::budget::Budget;
use crate::channels::{Payload, PayloadChannels};
use crate::codec::Codec;
use crate::errors::{PackageError, Result};
use crate::metadata::PackageMetadata;
use crate::model::{CompressionModel, digest_model};
use crate::package::{
    LEGACY_ASSOCIATED_DATA, PackageInfo, decode_base64_field,
};
use crate::rans::RansCodec;
use crate::source_map::SourceMap;
use crate::stream::EncodedStream;
use crate::string_table::StringTable;
use crate::token_plan::{PlanMetadata, TokenOptimisationPlan};
use crate::value::Value;

fn default_encryption_version() -> u32 {
    1
}

fn default_aead() -> String {
    "chacha20poly1305".to_owned()
}

fn default_kdf() -> String {
    "pbkdf2".to_owned()
}

fn default_backend() -> String {
    "rans".to_owned()
}

#[derive(Debug, Deserialize)]
struct LegacyWrapper {
    version: String,
    #[serde(default)]
    metadata: Option<PackageMetadata>,
    nonce: String,
    salt: String,
    ciphertext: String,
    tag: String,
    #[serde(default)]
    hkdf_salt: Option<String>,
    #[serde(default = "default_encryption_version")]
    encryption_version: u32,
    #[serde(default = "default_aead")]
    aead: String,
    #[serde(default = "default_kdf")]
    kdf: String,
    #[serde(default)]
    kdf_parameters: KdfParameters,
}

#[derive(Debug, Deserialize)]
struct LegacyTable {
    precision_bits: u8,
    frequencies: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct LegacyCompression {
    #[serde(default = "default_backend")]
    backend: String,
    model: CompressionModel,
    symbol_count: u64,
    #[serde(default)]
    optimisation: Option<PlanMetadata>,
}

#[derive(Debug, Deserialize)]
struct LegacyPayload {
    version: String,
    dictionary_version: String,
    #[serde(default)]
    encoder_version: Option<String>,
    #[serde(default)]
    source_language: Option<String>,
    #[serde(default)]
    source_language_version: Option<String>,
    #[serde(default)]
    source_hash: Option<String>,
    compressed_tokens: String,
    #[serde(default)]
    symbol_count: Option<u64>,
    #[serde(default)]
    table: Option<LegacyTable>,
    #[serde(default)]
    compression: Option<LegacyCompression>,
    #[serde(default)]
    string_table: Option<String>,
    #[serde(default)]
    payloads: Vec<Value>,
    #[serde(default)]
    source_map: Option<String>,
    #[serde(default)]
    metadata: Option<PackageMetadata>,
}

/// Decode a legacy JSON-wrapper package.
///
/// # Errors
///
/// The usual decode vocabulary; `AuthFailed` on a bad passphrase,
/// `Malformed` on structural JSON damage.
pub fn decode_legacy_package(
    codec: &Codec,
    data: &[u8],
    passphrase: &str,
    budget: &Budget,
) -> Result<EncodedStream> {
    let wrapper: LegacyWrapper = serde_json::from_slice(data)
        .map_err(|err| PackageError::malformed(format!("legacy wrapper invalid: {err}")))?;
    ensure_supported(parse_any_version(&wrapper.version)?)?;

    let associated_data = match &wrapper.metadata {
        Some(metadata) => metadata.to_associated_data()?,
        None => LEGACY_ASSOCIATED_DATA.to_vec(),
    };
    let encrypted = EncryptionResult {
        nonce: decode_base64_field(&wrapper.nonce, "nonce")?,
        salt: decode_base64_field(&wrapper.salt, "salt")?,
        hkdf_salt: wrapper
            .hkdf_salt
            .as_deref()
            .map(|value| decode_base64_field(value, "hkdf_salt"))
            .transpose()?,
        ciphertext: decode_base64_field(&wrapper.ciphertext, "ciphertext")?,
        tag: decode_base64_field(&wrapper.tag, "tag")?,
        version: wrapper.encryption_version,
        aead: wrapper.aead.clone(),
        kdf: wrapper.kdf.clone(),
        kdf_parameters: wrapper.kdf_parameters.clone(),
    };
    let plaintext = decrypt(&encrypted, passphrase, &associated_data)?;
    budget.ensure_payload_bytes(plaintext.len() as u64)?;

    let payload: LegacyPayload = serde_json::from_slice(&plaintext)
        .map_err(|err| PackageError::malformed(format!("legacy payload invalid: {err}")))?;
    let payload_version = parse_any_version(&payload.version)?;
    ensure_supported(payload_version)?;

    let compressed = decode_base64_field(&payload.compressed_tokens, "compressed_tokens")?;
    budget.ensure_compressed(compressed.len() as u64)?;

    let (tokens, decoded_payloads, compression_backend, model_digest) = if payload_version
        == Version::new(1, 0, 0)
    {
        let table = payload
            .table
            .as_ref()
            .ok_or_else(|| PackageError::malformed("legacy 1.0 payload missing table block"))?;
        let symbol_count = payload
            .symbol_count
            .ok_or_else(|| PackageError::malformed("symbol_count missing from payload"))?;
        budget.ensure_symbols(symbol_count)?;
        let model = CompressionModel {
            precision_bits: Some(table.precision_bits),
            frequencies: Some(table.frequencies.clone()),
            ..CompressionModel::default()
        };
        budget.ensure_model(&model)?;

        let rans = RansCodec::new(table.precision_bits)?;
        let rans_table = rans.table_from_frequencies(&table.frequencies)?;
        let tokens = rans.decode(&compressed, &rans_table, symbol_count as usize)?;
        let payloads = payload
            .payloads
            .iter()
            .map(|item| payload_from_value(item, None))
            .collect::<Result<Vec<_>>>()?;
        (tokens, payloads, "rans".to_owned(), digest_model(&model)?)
    } else {
        let compression = payload
            .compression
            .as_ref()
            .ok_or_else(|| PackageError::malformed("compression model missing from payload"))?;
        budget.ensure_model(&compression.model)?;
        budget.ensure_symbols(compression.symbol_count)?;

        let backend =
            codec.backend(&compression.backend, &crate::backend::BackendOptions::default())?;
        let mut tokens = backend.decode(
            codec.backend_context(),
            &compressed,
            &compression.model,
            compression.symbol_count as usize,
        )?;
        if let Some(plan_metadata) = &compression.optimisation {
            tokens = TokenOptimisationPlan::from_metadata(plan_metadata).restore(&tokens)?;
        }

        let table_bytes = payload
            .string_table
            .as_deref()
            .ok_or_else(|| PackageError::malformed("string_table missing from payload"))
            .and_then(|value| decode_base64_field(value, "string_table"))?;
        budget.ensure_string_table(table_bytes.len() as u64)?;
        let string_table = StringTable::from_bytes(&table_bytes)?;
        let payloads = payload
            .payloads
            .iter()
            .map(|item| payload_from_value(item, Some(&string_table)))
            .collect::<Result<Vec<_>>>()?;
        (tokens, payloads, compression.backend.clone(), digest_model(&compression.model)?)
    };

    let source_map = payload
        .source_map
        .as_deref()
        .map(|blob| {
            let bytes = decode_base64_field(blob, "source_map")?;
            SourceMap::from_bytes(&bytes)
        })
        .transpose()?;

    let mut metadata = wrapper.metadata;
    if let Some(inner) = &payload.metadata {
        match &metadata {
            Some(outer) if outer != inner => {
                return Err(PackageError::MetadataMismatch {
                    reason: "metadata mismatch between wrapper and payload".to_owned(),
                });
            },
            Some(_) => {},
            None => metadata = Some(inner.clone()),
        }
    }
    let metadata = metadata.unwrap_or_else(|| PackageMetadata {
        package_version: payload_version.to_string(),
        dictionary_version: payload.dictionary_version.clone(),
        encoder_version: payload.encoder_version.clone().unwrap_or_else(|| "unknown".to_owned()),
        source_language: payload.source_language.clone().unwrap_or_else(|| "unknown".to_owned()),
        source_language_version: payload
            .source_language_version
            .clone()
            .unwrap_or_else(|| "unknown".to_owned()),
        source_hash: payload.source_hash.clone().unwrap_or_default(),
        compression_backend: compression_backend.clone(),
        compression_model_digest: model_digest,
        symbol_count: tokens.len() as u64,
        timestamp: None,
        author: None,
        license: None,
        key_provider: None,
        key_id: None,
        key_version: None,
        rotation_due: None,
        audit_trail: None,
        provenance: None,
        integrity_signature: None,
    });

    let payload_channels =
        PayloadChannels::from_entries(PayloadChannels::classify_entries(&decoded_payloads));
    Ok(EncodedStream {
        dictionary_version: payload.dictionary_version,
        encoder_version: payload.encoder_version.unwrap_or_else(|| "unknown".to_owned()),
        source_language: payload.source_language.unwrap_or_else(|| "unknown".to_owned()),
        source_language_version: payload
            .source_language_version
            .unwrap_or_else(|| "unknown".to_owned()),
        source_hash: payload.source_hash.unwrap_or_default(),
        tokens,
        payloads: decoded_payloads,
        payload_channels,
        source_map,
        author: metadata.author.clone(),
        license: metadata.license.clone(),
        timestamp: metadata.timestamp.clone(),
    })
}

/// Inspect a legacy wrapper without the passphrase.
///
/// # Errors
///
/// `PackageError::Malformed` when the wrapper does not parse.
pub fn inspect_legacy_package(data: &[u8]) -> Result<PackageInfo> {
    let wrapper: LegacyWrapper = serde_json::from_slice(data)
        .map_err(|err| PackageError::malformed(format!("legacy wrapper invalid: {err}")))?;
    Ok(PackageInfo {
        structured: false,
        wrapper_version: wrapper.version,
        payload_version: None,
        features: Vec::new(),
        metadata: wrapper.metadata,
        encryption_version: wrapper.encryption_version,
    })
}

/// Materialise a flat `[{type, value}]` payload list from a payloads
/// section body, resolving string references through the table.
///
/// # Errors
///
/// `PackageError::Malformed` when the list shape is wrong.
pub fn materialise_flat_payloads(
    body: &serde_json::Value,
    string_table: &StringTable,
) -> Result<Vec<Payload>> {
    let items = body
        .get("payloads")
        .or_else(|| body.get("legacy_payloads"))
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| PackageError::malformed("payload section must contain payload entries"))?;
    items
        .iter()
        .map(|item| {
            let value: Value = serde_json::from_value(item.clone())
                .map_err(|err| PackageError::malformed(format!("payload entry invalid: {err}")))?;
            payload_from_value(&value, Some(string_table))
        })
        .collect()
}

fn payload_from_value(item: &Value, string_table: Option<&StringTable>) -> Result<Payload> {
    let Value::Map(map) = item else {
        return Err(PackageError::malformed("payload entries must be objects"));
    };
    let payload_type = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PackageError::malformed("payload type must be a string"))?;
    let raw_value = map.get("value").cloned().unwrap_or(Value::Null);
    let value = match string_table {
        Some(table) => table.decode_value(&raw_value)?,
        None => raw_value,
    };
    Ok(Payload::new(payload_type, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_payload_entries_require_objects() {
        assert!(payload_from_value(&Value::Int(3), None).is_err());
        let payload = payload_from_value(
            &Value::map([("type", Value::from("note")), ("value", Value::from("text"))]),
            None,
        )
        .unwrap();
        assert_eq!(payload.payload_type, "note");
        assert_eq!(payload.value, Value::from("text"));
    }

    #[test]
    fn inspect_rejects_non_json() {
        assert!(inspect_legacy_package(b"\x00\x01\x02").is_err());
    }
}
