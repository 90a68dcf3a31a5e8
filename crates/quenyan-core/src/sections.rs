//! Typed section contents inside the payload frame.
//!
//! `quenyan-proto` provides the structural section records; this module
//! owns their interpretation: identifier assignments, the binary layouts
//! of the stream-header and compression sections, and the
//! length-prefixed blob/JSON convention the remaining sections share.

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelEntry, StructuredChannel};
use crate::errors::{PackageError, Result};
use crate::token_plan::PlanMetadata;

/// Stream header section identifier.
pub const SECTION_STREAM_HEADER: u16 = 0x0001;
/// Compression section identifier.
pub const SECTION_COMPRESSION: u16 = 0x0002;
/// Compressed tokens section identifier.
pub const SECTION_TOKENS: u16 = 0x0003;
/// String table section identifier.
pub const SECTION_STRING_TABLE: u16 = 0x0004;
/// Payloads section identifier.
pub const SECTION_PAYLOADS: u16 = 0x0005;
/// Source map section identifier.
pub const SECTION_SOURCE_MAP: u16 = 0x0006;
/// Metadata section identifier.
pub const SECTION_METADATA: u16 = 0x0007;
/// Identifier channel section.
pub const SECTION_PAYLOAD_IDENTIFIERS: u16 = 0x0101;
/// String channel section.
pub const SECTION_PAYLOAD_STRINGS: u16 = 0x0102;
/// Integer channel section.
pub const SECTION_PAYLOAD_INTEGERS: u16 = 0x0103;
/// Count channel section.
pub const SECTION_PAYLOAD_COUNTS: u16 = 0x0104;
/// Flag channel section.
pub const SECTION_PAYLOAD_FLAGS: u16 = 0x0105;

/// Stream-header flag bit marking a present source map.
pub const STREAM_FLAG_SOURCE_MAP: u16 = 0x0001;

/// Channel presence bit for the token stream (always set).
pub const PAYLOAD_CHANNEL_TOKEN: u32 = 0x01;
/// Channel presence bit for identifiers.
pub const PAYLOAD_CHANNEL_IDENTIFIER: u32 = 0x02;
/// Channel presence bit for strings.
pub const PAYLOAD_CHANNEL_STRING: u32 = 0x04;
/// Channel presence bit for integers.
pub const PAYLOAD_CHANNEL_INTEGER: u32 = 0x08;
/// Channel presence bit for counts.
pub const PAYLOAD_CHANNEL_COUNT: u32 = 0x10;
/// Channel presence bit for flags.
pub const PAYLOAD_CHANNEL_FLAG: u32 = 0x20;

/// Encoding version advertised in the payloads section.
pub const ENCODING_VERSION: &str = "qyn1.1-multi-channel";

/// Append a `u16`-length-prefixed UTF-8 string.
///
/// # Errors
///
/// `PackageError::Malformed` when the string exceeds 65 535 bytes.
pub fn write_utf8(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| PackageError::malformed("string value exceeds 65535 bytes"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Read a `u16`-length-prefixed UTF-8 string.
///
/// # Errors
///
/// `PackageError::FrameCorrupt` on truncation or invalid UTF-8.
pub fn read_utf8(buffer: &[u8], offset: usize) -> Result<(String, usize)> {
    let corrupt = |reason: &str| PackageError::FrameCorrupt { reason: reason.to_owned() };
    if offset + 2 > buffer.len() {
        return Err(corrupt("buffer truncated while reading string length"));
    }
    let len = u16::from_le_bytes([buffer[offset], buffer[offset + 1]]) as usize;
    let start = offset + 2;
    let end = start + len;
    if end > buffer.len() {
        return Err(corrupt("buffer truncated while reading string payload"));
    }
    let text = std::str::from_utf8(&buffer[start..end])
        .map_err(|_| corrupt("string payload is not UTF-8"))?;
    Ok((text.to_owned(), end))
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<(u32, usize)> {
    if offset + 4 > buffer.len() {
        return Err(PackageError::FrameCorrupt {
            reason: "buffer truncated while reading u32".to_owned(),
        });
    }
    let value = u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ]);
    Ok((value, offset + 4))
}

/// Wrap `data` in the section-local `u32` length prefix.
#[must_use]
pub fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Strip the section-local length prefix, rejecting trailing bytes.
///
/// # Errors
///
/// `PackageError::FrameCorrupt` on truncation or trailing data.
pub fn length_prefixed_bytes(payload: &[u8]) -> Result<&[u8]> {
    let (len, offset) = read_u32(payload, 0)?;
    let end = offset + len as usize;
    if end > payload.len() {
        return Err(PackageError::FrameCorrupt {
            reason: "length-prefixed payload truncated".to_owned(),
        });
    }
    if end != payload.len() {
        return Err(PackageError::FrameCorrupt {
            reason: "unexpected data after length-prefixed payload".to_owned(),
        });
    }
    Ok(&payload[offset..end])
}

/// Parse a length-prefixed JSON section payload.
///
/// # Errors
///
/// `PackageError::FrameCorrupt` on framing damage,
/// `PackageError::Malformed` when the JSON does not parse.
pub fn length_prefixed_json<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T> {
    let data = length_prefixed_bytes(payload)?;
    serde_json::from_slice(data)
        .map_err(|err| PackageError::malformed(format!("section JSON invalid: {err}")))
}

/// Decoded stream-header section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Dictionary revision
    pub dictionary_version: String,
    /// Encoder version
    pub encoder_version: String,
    /// Source language name
    pub source_language: String,
    /// Source language version
    pub source_language_version: String,
    /// Token count
    pub symbol_count: u32,
    /// Hex SHA-256 of the source, or empty
    pub source_hash: String,
    /// Section flag bits
    pub flags: u16,
}

impl StreamHeader {
    /// Serialise the stream header payload.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a field exceeds its width or the
    /// source hash is not a 32-byte hex digest.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_utf8(&mut out, &self.dictionary_version)?;
        write_utf8(&mut out, &self.encoder_version)?;
        write_utf8(&mut out, &self.source_language)?;
        write_utf8(&mut out, &self.source_language_version)?;
        out.extend_from_slice(&self.symbol_count.to_le_bytes());
        out.push(0); // hash type: 0 = SHA-256
        out.extend_from_slice(&decode_source_hash(&self.source_hash)?);
        Ok(out)
    }

    /// Parse a stream header payload.
    ///
    /// # Errors
    ///
    /// `PackageError::FrameCorrupt` on truncation or trailing bytes,
    /// `PackageError::Malformed` on an unsupported hash type.
    pub fn from_payload(payload: &[u8], flags: u16) -> Result<Self> {
        let corrupt = |reason: &str| PackageError::FrameCorrupt { reason: reason.to_owned() };
        let (dictionary_version, offset) = read_utf8(payload, 0)?;
        let (encoder_version, offset) = read_utf8(payload, offset)?;
        let (source_language, offset) = read_utf8(payload, offset)?;
        let (source_language_version, offset) = read_utf8(payload, offset)?;
        if offset + 4 > payload.len() {
            return Err(corrupt("stream header truncated before symbol count"));
        }
        let symbol_count = u32::from_le_bytes([
            payload[offset],
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ]);
        let offset = offset + 4;
        let hash_type = *payload.get(offset).ok_or_else(|| {
            corrupt("stream header truncated before hash type")
        })?;
        if hash_type != 0 {
            return Err(PackageError::malformed("unsupported source hash type"));
        }
        let offset = offset + 1;
        let end = offset + 32;
        if end > payload.len() {
            return Err(corrupt("stream header truncated before hash payload"));
        }
        let hash_bytes = &payload[offset..end];
        if end != payload.len() {
            return Err(corrupt("unexpected data in stream header section"));
        }
        let source_hash = if hash_bytes.iter().all(|&b| b == 0) {
            String::new()
        } else {
            hex::encode(hash_bytes)
        };
        Ok(Self {
            dictionary_version,
            encoder_version,
            source_language,
            source_language_version,
            symbol_count,
            source_hash,
            flags,
        })
    }
}

fn decode_source_hash(value: &str) -> Result<[u8; 32]> {
    if value.is_empty() {
        return Ok([0u8; 32]);
    }
    let bytes = hex::decode(value)
        .map_err(|_| PackageError::malformed("source hash must be hex"))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| PackageError::malformed("source hash must be a 32-byte SHA-256 digest"))
}

/// Optional extras recorded alongside the compression model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompressionExtras {
    /// Compression mode name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Effective model mode after downgrades
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_mode: Option<String>,
    /// Token optimisation plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimisation: Option<PlanMetadata>,
}

impl CompressionExtras {
    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.model_mode.is_none() && self.optimisation.is_none()
    }
}

/// Decoded compression section.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionInfo {
    /// Backend name
    pub backend: String,
    /// Token count
    pub symbol_count: u32,
    /// Compression model
    pub model: crate::model::CompressionModel,
    /// Optional extras
    pub extras: Option<CompressionExtras>,
}

impl CompressionInfo {
    /// Serialise the compression section payload.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when serialisation fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_utf8(&mut out, &self.backend)?;
        out.extend_from_slice(&self.symbol_count.to_le_bytes());
        let model_json = crate::value::canonical_json(&self.model)?.into_bytes();
        out.extend_from_slice(&(model_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&model_json);
        let extras_json = match &self.extras {
            Some(extras) => crate::value::canonical_json(extras)?.into_bytes(),
            None => Vec::new(),
        };
        out.extend_from_slice(&(extras_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&extras_json);
        Ok(out)
    }

    /// Parse a compression section payload.
    ///
    /// # Errors
    ///
    /// `PackageError::FrameCorrupt` on truncation,
    /// `PackageError::Malformed` on invalid JSON.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let corrupt = |reason: &str| PackageError::FrameCorrupt { reason: reason.to_owned() };
        let (backend, offset) = read_utf8(payload, 0)?;
        if offset + 4 > payload.len() {
            return Err(corrupt("compression section truncated before symbol count"));
        }
        let symbol_count = u32::from_le_bytes([
            payload[offset],
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ]);
        let offset = offset + 4;
        let (model_len, offset) = read_u32(payload, offset)?;
        let model_end = offset + model_len as usize;
        if model_end > payload.len() {
            return Err(corrupt("compression model payload truncated"));
        }
        let model = if model_len == 0 {
            crate::model::CompressionModel::default()
        } else {
            serde_json::from_slice(&payload[offset..model_end])
                .map_err(|err| PackageError::malformed(format!("compression model invalid: {err}")))?
        };
        let offset = model_end;
        let (extras_len, offset) = read_u32(payload, offset)?;
        let extras_end = offset + extras_len as usize;
        if extras_end > payload.len() {
            return Err(corrupt("compression extras truncated"));
        }
        let extras = if extras_len == 0 {
            None
        } else {
            Some(
                serde_json::from_slice(&payload[offset..extras_end]).map_err(|err| {
                    PackageError::malformed(format!("compression extras invalid: {err}"))
                })?,
            )
        };
        if extras_end != payload.len() {
            return Err(corrupt("unexpected data in compression section"));
        }
        Ok(Self { backend, symbol_count, model, extras })
    }
}

/// JSON body of the payloads section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadsBody {
    /// Payload encoding revision tag
    pub encoding_version: String,
    /// Presence bits for the channel sections
    pub channel_bits: u32,
    /// Grammar-ordered channel entries
    pub entries: Vec<ChannelEntry>,
    /// Structured channel, carried inline
    #[serde(default)]
    pub structured_channel: StructuredChannel,
}
