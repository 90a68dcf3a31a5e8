//! End-to-end package assembly and parsing.
//!
//! Encode: `EncodedStream` → frequency plan → string table → payload
//! channels → per-channel rANS → section assembly → payload frame →
//! AEAD encrypt with metadata AAD → wrapper frame. Decode reverses in
//! strict order with budget checks before every allocation.
//!
//! The wrapper frame body is plaintext JSON (so metadata can be
//! inspected without the passphrase); everything behind it is inside the
//! ciphertext and bound to the metadata through the AEAD associated
//! data.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use quenyan_crypto::{EncryptionResult, KdfParameters, decrypt, encrypt};
use quenyan_proto::{
    CURRENT_PACKAGE_VERSION, Feature, FeatureSet, PAYLOAD_MAGIC, Section, Version, WRAPPER_MAGIC,
    decode_sections, encode_sections, ensure_supported, negotiate_version, parse_any_version,
    read_frame, write_frame,
};

use crate::backend::supports_static_models;
use crate::budget::Budget;
use crate::channels::{
    Channel, PayloadChannels, StructuredChannel, decode_flag_channel, decode_index_channel,
    decode_numbers,
};
use crate::legacy;
use crate::codec::Codec;
use crate::config::{CompressionConfig, TokenOptimisation};
use crate::errors::{PackageError, Result};
use crate::metadata::PackageMetadata;
use crate::model::{
    CompressionModel, DEFAULT_MODEL_ID, ModelMode, build_sparse_overrides, digest_model,
};
use crate::sections::{
    CompressionExtras, CompressionInfo, ENCODING_VERSION, PAYLOAD_CHANNEL_COUNT,
    PAYLOAD_CHANNEL_FLAG, PAYLOAD_CHANNEL_IDENTIFIER, PAYLOAD_CHANNEL_INTEGER,
    PAYLOAD_CHANNEL_STRING, PAYLOAD_CHANNEL_TOKEN, PayloadsBody, SECTION_COMPRESSION,
    SECTION_METADATA, SECTION_PAYLOAD_COUNTS, SECTION_PAYLOAD_FLAGS, SECTION_PAYLOAD_IDENTIFIERS,
    SECTION_PAYLOAD_INTEGERS, SECTION_PAYLOAD_STRINGS, SECTION_PAYLOADS, SECTION_SOURCE_MAP,
    SECTION_STREAM_HEADER, SECTION_STRING_TABLE, SECTION_TOKENS, STREAM_FLAG_SOURCE_MAP,
    StreamHeader, length_prefixed, length_prefixed_bytes, length_prefixed_json,
};
use crate::source_map::SourceMap;
use crate::stream::EncodedStream;
use crate::string_table::StringTable;
use crate::token_plan::{TokenOptimisationPlan, build_frequency_plan};
use crate::value::canonical_json;

/// Associated data used by very old packages that carried no metadata.
pub const LEGACY_ASSOCIATED_DATA: &[u8] = b"QYN1-PACKAGE-v1";

/// Options controlling package encoding.
#[derive(Default)]
pub struct EncodeOptions {
    /// Compression configuration; `None` uses the plain rANS backend
    /// with the balanced optimisation policy
    pub compression: Option<CompressionConfig>,
    /// Backend override when no configuration is given
    pub backend: Option<String>,
    /// Model mode override
    pub model_mode: Option<ModelMode>,
    /// Caller-shared string table for project-wide encoding
    pub string_table: Option<StringTable>,
    /// Caller-shared token plan for project-wide encoding
    pub token_plan: Option<TokenOptimisationPlan>,
    /// Metadata author override
    pub author: Option<String>,
    /// Metadata license override
    pub license: Option<String>,
    /// Metadata timestamp override
    pub timestamp: Option<String>,
}

/// Options controlling package decoding.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Allocation caps enforced before every decode-side allocation
    pub budget: Budget,
    /// Feature bits outside the closed set the caller accepts anyway
    pub allowed_feature_bits: u32,
}

/// An assembled package, ready to serialise.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Dictionary revision
    pub dictionary_version: String,
    /// Encoder version
    pub encoder_version: String,
    /// Backend the tokens were coded with
    pub compression_backend: String,
    /// Compression model, chunk tables included
    pub compression_model: CompressionModel,
    /// Compressed token blob
    pub compressed_tokens: Vec<u8>,
    /// Token count
    pub symbol_count: usize,
    /// Package string table
    pub string_table: StringTable,
    /// Serialised string table
    pub string_table_bytes: Vec<u8>,
    /// Channelised payloads
    pub payload_channels: PayloadChannels,
    /// Authenticated metadata
    pub metadata: PackageMetadata,
    /// Serialised source map, when present
    pub source_map_bytes: Option<Vec<u8>>,
    /// Compression extras, when any were recorded
    pub compression_extras: Option<CompressionExtras>,
}

/// Wrapper frame JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WrapperBody {
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_version: Option<String>,
    #[serde(default)]
    payload_features: Vec<String>,
    metadata: PackageMetadata,
    nonce: String,
    salt: String,
    ciphertext: String,
    tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
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

fn default_encryption_version() -> u32 {
    1
}

fn default_aead() -> String {
    "chacha20poly1305".to_owned()
}

fn default_kdf() -> String {
    "pbkdf2".to_owned()
}

pub(crate) fn decode_base64_field(value: &str, field: &'static str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.as_bytes())
        .map_err(|_| PackageError::malformed(format!("wrapper field {field} is not base64")))
}

impl Codec {
    /// Assemble a [`Package`] from an encoded stream.
    ///
    /// # Errors
    ///
    /// Backend, model, or channel failures; see [`PackageError`].
    pub fn encode_package(&self, stream: &EncodedStream, options: &EncodeOptions) -> Result<Package> {
        let dictionary = self.dictionary(&stream.dictionary_version)?;
        let policy = options.compression.clone().unwrap_or_default();
        let backend_name = match (&options.compression, &options.backend) {
            (Some(config), _) => config.backend.clone(),
            (None, Some(backend)) => backend.clone(),
            (None, None) => "rans".to_owned(),
        };
        let backend_options = if options.compression.is_some() || backend_name == policy.backend {
            policy.backend_options.clone()
        } else {
            crate::backend::BackendOptions::default()
        };
        let backend = self.backend(&backend_name, &backend_options)?;

        let requested_mode = options.model_mode.unwrap_or(policy.model_mode);
        let mut model_mode = requested_mode;
        if model_mode != ModelMode::Adaptive && !supports_static_models(backend.name()) {
            debug!(
                backend = backend.name(),
                requested = requested_mode.as_str(),
                "backend relies on fully adaptive counts, downgrading model mode"
            );
            model_mode = ModelMode::Adaptive;
        }

        let plan = match (&options.token_plan, policy.token_optimisation) {
            (Some(plan), _) => Some(plan.clone()),
            (None, TokenOptimisation::Local) => build_frequency_plan(&stream.tokens),
            (None, _) => None,
        };
        let (optimised_tokens, alphabet_size) = match &plan {
            Some(plan) => (plan.apply(&stream.tokens)?, plan.alphabet_size()),
            None => (stream.tokens.clone(), dictionary.len()),
        };

        let ctx = self.backend_context();
        let mut model = match model_mode {
            ModelMode::Static => {
                let global = self.models().load(DEFAULT_MODEL_ID)?;
                CompressionModel {
                    mode: Some(ModelMode::Static.as_str().to_owned()),
                    model_id: Some(global.model_id.clone()),
                    precision_bits: Some(global.precision_bits),
                    alphabet_size: Some(alphabet_size as u64),
                    ..CompressionModel::default()
                }
            },
            ModelMode::Hybrid => {
                let adaptive = backend.build_model(ctx, &optimised_tokens, alphabet_size)?;
                let global = self.models().load(DEFAULT_MODEL_ID)?;
                let mut base = global.frequencies.clone();
                if base.len() < alphabet_size {
                    base.resize(alphabet_size, 1);
                }
                let overrides = build_sparse_overrides(
                    adaptive.frequencies.as_deref().unwrap_or(&[]),
                    &base,
                    0,
                );
                CompressionModel {
                    mode: Some(ModelMode::Hybrid.as_str().to_owned()),
                    model_id: Some(global.model_id.clone()),
                    precision_bits: Some(
                        adaptive.precision_bits.unwrap_or(global.precision_bits),
                    ),
                    alphabet_size: Some(alphabet_size as u64),
                    overrides: Some(
                        overrides.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                    ),
                    ..CompressionModel::default()
                }
            },
            ModelMode::Adaptive => backend.build_model(ctx, &optimised_tokens, alphabet_size)?,
        };
        let compressed_tokens = backend.encode(ctx, &optimised_tokens, &mut model)?;

        let string_table = match &options.string_table {
            Some(table) => table.clone(),
            None => {
                let values: Vec<_> = stream.payloads.iter().map(|p| p.value.clone()).collect();
                StringTable::build(values.iter())
            },
        };
        let mut payload_channels = PayloadChannels::build(&stream.payloads, &string_table)?;
        payload_channels.apply_token_indices(&stream.payload_channels.entries);
        payload_channels.token_keys = Some(dictionary.token_keys(&stream.tokens)?);

        let source_map_bytes =
            stream.source_map.as_ref().map(SourceMap::to_bytes).transpose()?;

        let metadata = PackageMetadata {
            package_version: CURRENT_PACKAGE_VERSION.to_string(),
            dictionary_version: stream.dictionary_version.clone(),
            encoder_version: stream.encoder_version.clone(),
            source_language: stream.source_language.clone(),
            source_language_version: stream.source_language_version.clone(),
            source_hash: stream.source_hash.clone(),
            compression_backend: backend.name().to_owned(),
            compression_model_digest: digest_model(&model)?,
            symbol_count: stream.tokens.len() as u64,
            timestamp: options.timestamp.clone().or_else(|| stream.timestamp.clone()),
            author: options.author.clone().or_else(|| stream.author.clone()),
            license: options.license.clone().or_else(|| stream.license.clone()),
            key_provider: None,
            key_id: None,
            key_version: None,
            rotation_due: None,
            audit_trail: None,
            provenance: None,
            integrity_signature: None,
        };

        let mut extras = CompressionExtras::default();
        if options.compression.is_some() {
            extras.mode = Some(policy.mode.as_str().to_owned());
            extras.model_mode = Some(model_mode.as_str().to_owned());
        }
        if let Some(plan) = &plan {
            extras.optimisation = Some(plan.to_metadata());
        }
        let compression_extras = (!extras.is_empty()).then_some(extras);

        Ok(Package {
            dictionary_version: stream.dictionary_version.clone(),
            encoder_version: stream.encoder_version.clone(),
            compression_backend: backend.name().to_owned(),
            compression_model: model,
            compressed_tokens,
            symbol_count: stream.tokens.len(),
            string_table_bytes: string_table.to_bytes()?,
            string_table,
            payload_channels,
            metadata,
            source_map_bytes,
            compression_extras,
        })
    }

    /// Decode a package back into an [`EncodedStream`].
    ///
    /// Accepts both the current framed wrapper and the legacy JSON
    /// wrapper.
    ///
    /// # Errors
    ///
    /// Every kind in [`PackageError`]; decode never recovers locally
    /// except the documented legacy fallbacks.
    pub fn decode_package(
        &self,
        data: &[u8],
        passphrase: &str,
        options: &DecodeOptions,
    ) -> Result<EncodedStream> {
        if !data.starts_with(&WRAPPER_MAGIC) {
            return legacy::decode_legacy_package(self, data, passphrase, &options.budget);
        }
        let (wrapper_frame, remainder) = read_frame(data, Some(WRAPPER_MAGIC))?;
        if !remainder.is_empty() {
            return Err(PackageError::FrameCorrupt {
                reason: "unexpected trailing data after wrapper frame".to_owned(),
            });
        }
        ensure_supported(wrapper_frame.version)?;
        wrapper_frame.features.ensure_known(options.allowed_feature_bits)?;

        let wrapper: WrapperBody = serde_json::from_slice(&wrapper_frame.body)
            .map_err(|err| PackageError::malformed(format!("wrapper body invalid: {err}")))?;
        let wrapper_version = parse_any_version(&wrapper.version)?;
        ensure_supported(wrapper_version)?;
        if wrapper_version.major != wrapper_frame.version.major {
            return Err(PackageError::MetadataMismatch {
                reason: "wrapper version major mismatch".to_owned(),
            });
        }
        let metadata = wrapper.metadata.clone();
        let associated_data = metadata.to_associated_data()?;

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
        let payload_envelope = decrypt(&encrypted, passphrase, &associated_data)?;
        options.budget.ensure_payload_bytes(payload_envelope.len() as u64)?;

        let (payload_frame, payload_remainder) =
            read_frame(&payload_envelope, Some(PAYLOAD_MAGIC))?;
        if !payload_remainder.is_empty() {
            return Err(PackageError::FrameCorrupt {
                reason: "unexpected trailing data after payload frame".to_owned(),
            });
        }
        ensure_supported(payload_frame.version)?;
        payload_frame.features.ensure_known(options.allowed_feature_bits)?;
        if payload_frame.features.bits() != wrapper_frame.features.bits() {
            return Err(PackageError::MetadataMismatch {
                reason: "payload feature set mismatch with wrapper".to_owned(),
            });
        }
        if let Some(declared) = wrapper.payload_version.as_deref() {
            let declared = parse_any_version(declared)?;
            if declared.major != payload_frame.version.major {
                return Err(PackageError::MetadataMismatch {
                    reason: "payload version mismatch between wrapper and payload".to_owned(),
                });
            }
        }

        debug!(
            version = %payload_frame.version,
            features = ?payload_frame.features.names(),
            "decoding payload frame"
        );
        self.build_stream_from_sections(
            &payload_frame.body,
            &metadata,
            payload_frame.version,
            &options.budget,
        )
    }

    fn build_stream_from_sections(
        &self,
        payload_body: &[u8],
        metadata: &PackageMetadata,
        payload_version: Version,
        budget: &Budget,
    ) -> Result<EncodedStream> {
        let metadata_version = parse_any_version(&metadata.package_version)?;
        if metadata_version.major != payload_version.major {
            return Err(PackageError::MetadataMismatch {
                reason: "package version mismatch between metadata and payload body".to_owned(),
            });
        }

        let mut sections: HashMap<u16, Section> = decode_sections(payload_body)?
            .into_iter()
            .map(|section| (section.identifier, section))
            .collect();
        let mut require = |id: u16| -> Result<Section> {
            sections.remove(&id).ok_or_else(|| PackageError::FrameCorrupt {
                reason: format!("required section {id:#06x} missing"),
            })
        };

        let header_section = require(SECTION_STREAM_HEADER)?;
        let stream_header =
            StreamHeader::from_payload(&header_section.payload, header_section.flags)?;
        let compression = CompressionInfo::from_payload(&require(SECTION_COMPRESSION)?.payload)?;
        budget.ensure_model(&compression.model)?;
        if stream_header.symbol_count != compression.symbol_count {
            return Err(PackageError::MetadataMismatch {
                reason: "symbol count mismatch between stream header and compression section"
                    .to_owned(),
            });
        }
        let symbol_count = compression.symbol_count as usize;
        budget.ensure_symbols(symbol_count as u64)?;

        let tokens_section = require(SECTION_TOKENS)?;
        let tokens_blob = length_prefixed_bytes(&tokens_section.payload)?;
        budget.ensure_compressed(tokens_blob.len() as u64)?;

        let table_section = require(SECTION_STRING_TABLE)?;
        let string_table_bytes = length_prefixed_bytes(&table_section.payload)?;
        budget.ensure_string_table(string_table_bytes.len() as u64)?;

        let payloads_section = require(SECTION_PAYLOADS)?;
        budget.ensure_payload_bytes(payloads_section.payload.len() as u64)?;

        if metadata.compression_backend != compression.backend {
            return Err(PackageError::MetadataMismatch {
                reason: "compression backend mismatch between wrapper and payload".to_owned(),
            });
        }
        if metadata.compression_model_digest != digest_model(&compression.model)? {
            return Err(PackageError::MetadataMismatch {
                reason: "compression model digest mismatch between wrapper and payload".to_owned(),
            });
        }

        let backend =
            self.backend(&compression.backend, &crate::backend::BackendOptions::default())?;
        let ctx = self.backend_context();
        let mut tokens = backend.decode(ctx, tokens_blob, &compression.model, symbol_count)?;
        if let Some(extras) = &compression.extras {
            if let Some(plan_metadata) = &extras.optimisation {
                let plan = TokenOptimisationPlan::from_metadata(plan_metadata);
                tokens = plan.restore(&tokens)?;
            }
        }

        let dictionary = self.dictionary(&stream_header.dictionary_version)?;
        let token_keys = dictionary.token_keys(&tokens)?;
        let string_table = StringTable::from_bytes(string_table_bytes)?;

        let body_json: serde_json::Value = length_prefixed_json(&payloads_section.payload)?;
        let encoding_version = parse_encoding_version(
            body_json.get("encoding_version").and_then(serde_json::Value::as_str).unwrap_or("1.0"),
        );

        let (payload_channels, payloads) = if encoding_version >= Version::new(1, 1, 0) {
            let body: PayloadsBody = serde_json::from_value(body_json)
                .map_err(|err| PackageError::malformed(format!("payloads section invalid: {err}")))?;

            let mut channel_payload = |bit: u32, id: u16| -> Result<Option<Vec<u8>>> {
                let section = sections.remove(&id);
                if body.channel_bits & bit == 0 {
                    return Ok(None);
                }
                let section = section.ok_or_else(|| {
                    PackageError::channel(format!("payload channel section {id:#06x} missing"))
                })?;
                budget.ensure_payload_bytes(section.payload.len() as u64)?;
                Ok(Some(length_prefixed_bytes(&section.payload)?.to_vec()))
            };

            let identifier_json =
                channel_payload(PAYLOAD_CHANNEL_IDENTIFIER, SECTION_PAYLOAD_IDENTIFIERS)?;
            let string_json = channel_payload(PAYLOAD_CHANNEL_STRING, SECTION_PAYLOAD_STRINGS)?;
            let number_json = channel_payload(PAYLOAD_CHANNEL_INTEGER, SECTION_PAYLOAD_INTEGERS)?;
            let count_json = channel_payload(PAYLOAD_CHANNEL_COUNT, SECTION_PAYLOAD_COUNTS)?;
            let flag_json = channel_payload(PAYLOAD_CHANNEL_FLAG, SECTION_PAYLOAD_FLAGS)?;

            let identifiers = decode_index_channel(
                parse_channel(identifier_json.as_deref())?.as_ref(),
                &body.entries,
                Channel::Identifier,
                Some(&token_keys),
            )?;
            let strings = decode_index_channel(
                parse_channel(string_json.as_deref())?.as_ref(),
                &body.entries,
                Channel::String,
                None,
            )?;
            let numbers = decode_numbers(parse_channel(number_json.as_deref())?.as_ref())?;
            let counts = decode_index_channel(
                parse_channel(count_json.as_deref())?.as_ref(),
                &body.entries,
                Channel::Count,
                None,
            )?;
            let flags = decode_flag_channel(parse_channel(flag_json.as_deref())?.as_ref())?;

            let channels = PayloadChannels {
                entries: body.entries,
                identifiers,
                strings,
                numbers,
                counts,
                flags,
                structured: body.structured_channel.payloads,
                token_keys: Some(token_keys.clone()),
            };
            let payloads = channels.to_payloads(&string_table)?;
            (channels, payloads)
        } else {
            let payloads = legacy::materialise_flat_payloads(&body_json, &string_table)?;
            let mut channels =
                PayloadChannels::from_entries(PayloadChannels::classify_entries(&payloads));
            channels.token_keys = Some(token_keys.clone());
            (channels, payloads)
        };

        let source_map = match sections.remove(&SECTION_SOURCE_MAP) {
            Some(section) => {
                let bytes = length_prefixed_bytes(&section.payload)?;
                Some(SourceMap::from_bytes(bytes)?)
            },
            None => None,
        };

        if let Some(section) = sections.remove(&SECTION_METADATA) {
            let section_metadata: PackageMetadata = length_prefixed_json(&section.payload)?;
            if &section_metadata != metadata {
                return Err(PackageError::MetadataMismatch {
                    reason: "metadata mismatch between wrapper and payload".to_owned(),
                });
            }
        }

        if let Some(&id) = sections.keys().next() {
            return Err(PackageError::FrameCorrupt {
                reason: format!("unknown section identifier {id:#06x}"),
            });
        }

        Ok(EncodedStream {
            dictionary_version: stream_header.dictionary_version,
            encoder_version: stream_header.encoder_version,
            source_language: stream_header.source_language,
            source_language_version: stream_header.source_language_version,
            source_hash: stream_header.source_hash,
            tokens,
            payloads,
            payload_channels,
            source_map,
            author: metadata.author.clone(),
            license: metadata.license.clone(),
            timestamp: metadata.timestamp.clone(),
        })
    }
}

fn parse_channel<T: serde::de::DeserializeOwned>(data: Option<&[u8]>) -> Result<Option<T>> {
    data.map(|bytes| {
        serde_json::from_slice(bytes)
            .map_err(|err| PackageError::channel(format!("channel encoding invalid: {err}")))
    })
    .transpose()
}

/// Parse the payload-section encoding version tag.
///
/// The tag may carry an arbitrary non-numeric prefix
/// (`qyn1.1-multi-channel`); everything except digits and dots is
/// stripped and the first remaining run parsed, falling back to `1.0.0`.
#[must_use]
pub fn parse_encoding_version(value: &str) -> Version {
    let digits: String =
        value.chars().map(|ch| if ch.is_ascii_digit() || ch == '.' { ch } else { ' ' }).collect();
    digits
        .split_whitespace()
        .next()
        .and_then(|part| parse_any_version(part).ok())
        .unwrap_or(Version::new(1, 0, 0))
}

impl Package {
    /// Serialise the package into its final wrapper frame.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` on serialisation failures, or envelope
    /// errors from the crypto layer.
    pub fn to_bytes(&self, passphrase: &str) -> Result<Vec<u8>> {
        self.to_bytes_with(passphrase, None::<&[String]>)
    }

    /// Serialise with an explicit payload-version preference list.
    ///
    /// # Errors
    ///
    /// As [`Package::to_bytes`], plus `PackageError::UnsupportedVersion`
    /// when no preferred version is mutually supported.
    pub fn to_bytes_with<S: AsRef<str>>(
        &self,
        passphrase: &str,
        prefer_versions: Option<&[S]>,
    ) -> Result<Vec<u8>> {
        let features = self.derive_features();
        let payload_version =
            negotiate_version(prefer_versions.map(|p| p.iter().map(|s| s.as_ref())))?;
        let sections = self.build_sections(payload_version)?;
        let body = encode_sections(&sections)?;
        let payload_frame = write_frame(PAYLOAD_MAGIC, payload_version, features, &body)?;

        let associated_data = self.metadata.to_associated_data()?;
        let sealed = encrypt(&payload_frame, passphrase, &associated_data)?;

        let wrapper = WrapperBody {
            version: CURRENT_PACKAGE_VERSION.to_string(),
            payload_version: Some(payload_version.to_string()),
            payload_features: features.names().iter().map(|&s| s.to_owned()).collect(),
            metadata: self.metadata.clone(),
            nonce: BASE64.encode(&sealed.nonce),
            salt: BASE64.encode(&sealed.salt),
            ciphertext: BASE64.encode(&sealed.ciphertext),
            tag: BASE64.encode(&sealed.tag),
            hkdf_salt: Some(BASE64.encode(sealed.hkdf_salt.as_deref().unwrap_or(&sealed.salt))),
            encryption_version: sealed.version,
            aead: sealed.aead.clone(),
            kdf: sealed.kdf.clone(),
            kdf_parameters: sealed.kdf_parameters.clone(),
        };
        let wrapper_json = canonical_json(&wrapper)?;
        write_frame(WRAPPER_MAGIC, CURRENT_PACKAGE_VERSION, features, wrapper_json.as_bytes())
            .map_err(Into::into)
    }

    fn derive_features(&self) -> FeatureSet {
        let mut features = FeatureSet::empty();
        if let Some(extras) = &self.compression_extras {
            features.insert(Feature::CompressionExtras);
            if extras.optimisation.is_some() {
                features.insert(Feature::CompressionOptimisation);
            }
        }
        if self.compression_backend == "fse" {
            features.insert(Feature::CompressionFse);
        }
        if self.source_map_bytes.is_some() {
            features.insert(Feature::PayloadSourceMap);
        }
        features
    }

    fn build_sections(&self, _payload_version: Version) -> Result<Vec<Section>> {
        let mut sections = Vec::new();

        let mut flags = 0u16;
        if self.source_map_bytes.is_some() {
            flags |= STREAM_FLAG_SOURCE_MAP;
        }
        let header = StreamHeader {
            dictionary_version: self.dictionary_version.clone(),
            encoder_version: self.encoder_version.clone(),
            source_language: self.metadata.source_language.clone(),
            source_language_version: self.metadata.source_language_version.clone(),
            symbol_count: u32::try_from(self.symbol_count)
                .map_err(|_| PackageError::malformed("symbol count exceeds u32"))?,
            source_hash: self.metadata.source_hash.clone(),
            flags,
        };
        sections.push(Section::new(SECTION_STREAM_HEADER, flags, header.to_payload()?));

        let compression = CompressionInfo {
            backend: self.compression_backend.clone(),
            symbol_count: header.symbol_count,
            model: self.compression_model.clone(),
            extras: self.compression_extras.clone(),
        };
        sections.push(Section::new(SECTION_COMPRESSION, 0, compression.to_payload()?));
        sections.push(Section::new(SECTION_TOKENS, 0, length_prefixed(&self.compressed_tokens)));
        sections.push(Section::new(
            SECTION_STRING_TABLE,
            0,
            length_prefixed(&self.string_table_bytes),
        ));

        let channels = &self.payload_channels;
        let identifier = channels.encode_identifier_channel()?;
        let strings = channels.encode_string_channel()?;
        let numbers = channels.encode_number_channel()?;
        let counts = channels.encode_count_channel()?;
        let flags_channel = channels.encode_flag_channel()?;

        let mut channel_bits = PAYLOAD_CHANNEL_TOKEN;
        if identifier.symbol_count() > 0 {
            channel_bits |= PAYLOAD_CHANNEL_IDENTIFIER;
        }
        if strings.symbol_count() > 0 {
            channel_bits |= PAYLOAD_CHANNEL_STRING;
        }
        if numbers.symbol_count() > 0 {
            channel_bits |= PAYLOAD_CHANNEL_INTEGER;
        }
        if counts.symbol_count() > 0 {
            channel_bits |= PAYLOAD_CHANNEL_COUNT;
        }
        if flags_channel.symbol_count > 0 {
            channel_bits |= PAYLOAD_CHANNEL_FLAG;
        }

        let payloads_body = PayloadsBody {
            encoding_version: ENCODING_VERSION.to_owned(),
            channel_bits,
            entries: channels.entries.clone(),
            structured_channel: StructuredChannel { payloads: channels.structured.clone() },
        };
        sections.push(Section::new(
            SECTION_PAYLOADS,
            0,
            length_prefixed(canonical_json(&payloads_body)?.as_bytes()),
        ));

        let mut push_channel = |id: u16, present: bool, json: Result<String>| -> Result<()> {
            if present {
                sections.push(Section::new(id, 0, length_prefixed(json?.as_bytes())));
            }
            Ok(())
        };
        push_channel(
            SECTION_PAYLOAD_IDENTIFIERS,
            channel_bits & PAYLOAD_CHANNEL_IDENTIFIER != 0,
            canonical_json(&identifier),
        )?;
        push_channel(
            SECTION_PAYLOAD_STRINGS,
            channel_bits & PAYLOAD_CHANNEL_STRING != 0,
            canonical_json(&strings),
        )?;
        push_channel(
            SECTION_PAYLOAD_INTEGERS,
            channel_bits & PAYLOAD_CHANNEL_INTEGER != 0,
            canonical_json(&numbers),
        )?;
        push_channel(
            SECTION_PAYLOAD_COUNTS,
            channel_bits & PAYLOAD_CHANNEL_COUNT != 0,
            canonical_json(&counts),
        )?;
        push_channel(
            SECTION_PAYLOAD_FLAGS,
            channel_bits & PAYLOAD_CHANNEL_FLAG != 0,
            canonical_json(&flags_channel),
        )?;

        if let Some(source_map) = &self.source_map_bytes {
            sections.push(Section::new(SECTION_SOURCE_MAP, 0, length_prefixed(source_map)));
        }
        sections.push(Section::new(
            SECTION_METADATA,
            0,
            length_prefixed(canonical_json(&self.metadata)?.as_bytes()),
        ));
        Ok(sections)
    }
}

/// Wrapper-level information readable without the passphrase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageInfo {
    /// Whether the package uses the framed wrapper
    pub structured: bool,
    /// Wrapper format version
    pub wrapper_version: String,
    /// Declared payload version, when advertised
    pub payload_version: Option<String>,
    /// Advertised feature names
    pub features: Vec<String>,
    /// Plaintext wrapper metadata, when present
    pub metadata: Option<PackageMetadata>,
    /// Encryption scheme version
    pub encryption_version: u32,
}

/// Inspect wrapper metadata and versions without decrypting.
///
/// The wrapper body is plaintext; nothing returned here is
/// authenticated until a successful decrypt binds the metadata through
/// the AEAD associated data.
///
/// # Errors
///
/// `PackageError::FrameCorrupt` / `Malformed` when the wrapper does not
/// parse.
pub fn inspect_package(data: &[u8]) -> Result<PackageInfo> {
    if data.starts_with(&WRAPPER_MAGIC) {
        let (frame, _) = read_frame(data, Some(WRAPPER_MAGIC))?;
        let wrapper: WrapperBody = serde_json::from_slice(&frame.body)
            .map_err(|err| PackageError::malformed(format!("wrapper body invalid: {err}")))?;
        return Ok(PackageInfo {
            structured: true,
            wrapper_version: wrapper.version,
            payload_version: wrapper.payload_version,
            features: frame.features.names().iter().map(|&s| s.to_owned()).collect(),
            metadata: Some(wrapper.metadata),
            encryption_version: wrapper.encryption_version,
        });
    }
    legacy::inspect_legacy_package(data)
}

/// Verify `source` against the authenticated metadata of a package.
///
/// Returns `true` when the metadata's source hash matches the SHA-256 of
/// `source`. The package is decoded first, so the comparison only runs
/// against metadata that passed AEAD verification.
///
/// # Errors
///
/// Decode errors, or `PackageError::Malformed` when the package records
/// no source hash.
pub fn verify_source_hash(
    codec: &Codec,
    data: &[u8],
    passphrase: &str,
    source: &[u8],
    options: &DecodeOptions,
) -> Result<bool> {
    let stream = codec.decode_package(data, passphrase, options)?;
    if stream.source_hash.is_empty() {
        return Err(PackageError::malformed("package records no source hash"));
    }
    Ok(stream.source_hash == hex::encode(Sha256::digest(source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_version_tag_parses_with_prefix() {
        assert_eq!(parse_encoding_version("qyn1.1-multi-channel"), Version::new(1, 1, 0));
        assert_eq!(parse_encoding_version("1.0"), Version::new(1, 0, 0));
        assert_eq!(parse_encoding_version("v2.0 beta"), Version::new(2, 0, 0));
    }

    #[test]
    fn garbage_encoding_version_falls_back_to_1_0() {
        assert_eq!(parse_encoding_version("no digits here"), Version::new(1, 0, 0));
        assert_eq!(parse_encoding_version(""), Version::new(1, 0, 0));
        assert_eq!(parse_encoding_version("1.2.3.4.5"), Version::new(1, 0, 0));
    }
}
