//! Typed, length-prefixed section records inside a payload frame body.
//!
//! Sections are concatenated `(id u16, flags u16, len u32, payload)`
//! records, little-endian, with no trailing padding. The section layer is
//! purely structural; identifiers are interpreted by the package layer.

use crate::errors::{FrameError, Result};

/// Size of the `(id, flags, len)` section header.
pub const SECTION_HEADER_SIZE: usize = 8;

/// A single typed payload block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section identifier
    pub identifier: u16,
    /// Per-section flag bits
    pub flags: u16,
    /// Raw section payload
    pub payload: Vec<u8>,
}

impl Section {
    /// Construct a section record.
    #[must_use]
    pub fn new(identifier: u16, flags: u16, payload: Vec<u8>) -> Self {
        Self { identifier, flags, payload }
    }
}

/// Encode `sections` into a binary stream suitable for a payload body.
///
/// # Errors
///
/// `FrameError::BodyTooLarge` when a section payload exceeds the u32
/// length field.
pub fn encode_sections(sections: &[Section]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for section in sections {
        let len = u32::try_from(section.payload.len())
            .map_err(|_| FrameError::BodyTooLarge(section.payload.len()))?;
        out.extend_from_slice(&section.identifier.to_le_bytes());
        out.extend_from_slice(&section.flags.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&section.payload);
    }
    Ok(out)
}

/// Decode every section from `buffer` without interpreting identifiers.
///
/// # Errors
///
/// `FrameError::SectionCorrupt` when a header or payload extends past the
/// end of the buffer.
pub fn decode_sections(buffer: &[u8]) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        if offset + SECTION_HEADER_SIZE > buffer.len() {
            return Err(FrameError::SectionCorrupt("truncated section header"));
        }
        let identifier = u16::from_le_bytes([buffer[offset], buffer[offset + 1]]);
        let flags = u16::from_le_bytes([buffer[offset + 2], buffer[offset + 3]]);
        let length = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;
        offset += SECTION_HEADER_SIZE;
        let end = offset
            .checked_add(length)
            .ok_or(FrameError::SectionCorrupt("section length overflow"))?;
        if end > buffer.len() {
            return Err(FrameError::SectionCorrupt("truncated section payload"));
        }
        sections.push(Section::new(identifier, flags, buffer[offset..end].to_vec()));
        offset = end;
    }
    Ok(sections)
}
