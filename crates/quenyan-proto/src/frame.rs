//! Magic-tagged, versioned, CRC-validated envelopes.
//!
//! A frame is the transport shell for both the outer wrapper (`QYN1`) and
//! the encrypted payload container (`MCS\0`):
//!
//! ```text
//! magic[4] | major u8 | minor u8 | patch u16 | feature_bits u32 |
//! body_len u32 | body | crc32(body) u32
//! ```
//!
//! All fixed-width header integers and the CRC trailer are big-endian.
//! Validation is fail-fast: magic, truncation, and CRC are all checked
//! before the body is handed to the caller.

use crate::{
    FeatureSet, Version,
    errors::{FrameError, Result},
};

/// Magic tag of the outermost wrapper envelope.
pub const WRAPPER_MAGIC: [u8; 4] = *b"QYN1";

/// Magic tag of the payload envelope carried inside the ciphertext.
pub const PAYLOAD_MAGIC: [u8; 4] = *b"MCS\0";

/// Fixed header size preceding the body.
pub const FRAME_HEADER_SIZE: usize = 16;

/// CRC32 trailer size following the body.
pub const FRAME_CRC_SIZE: usize = 4;

/// Parsed frame: header fields plus the validated body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Envelope magic tag
    pub magic: [u8; 4],
    /// Envelope format version
    pub version: Version,
    /// Advertised features, including any unknown bits
    pub features: FeatureSet,
    /// CRC-validated body bytes
    pub body: Vec<u8>,
}

/// Serialise a frame with the given magic, version, and feature bits.
///
/// # Errors
///
/// `FrameError::BodyTooLarge` when the body does not fit the u32 length
/// field.
pub fn write_frame(
    magic: [u8; 4],
    version: Version,
    features: FeatureSet,
    body: &[u8],
) -> Result<Vec<u8>> {
    let body_len =
        u32::try_from(body.len()).map_err(|_| FrameError::BodyTooLarge(body.len()))?;
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len() + FRAME_CRC_SIZE);
    out.extend_from_slice(&magic);
    out.push(version.major);
    out.push(version.minor);
    out.extend_from_slice(&version.patch.to_be_bytes());
    out.extend_from_slice(&features.bits().to_be_bytes());
    out.extend_from_slice(&body_len.to_be_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&crc32fast::hash(body).to_be_bytes());
    Ok(out)
}

/// Parse the leading frame from `data`, returning it with the remainder.
///
/// When `expected_magic` is given, a tag mismatch is rejected before any
/// other field is inspected.
///
/// # Errors
///
/// - `FrameError::Truncated` when the buffer ends inside the header, body,
///   or CRC trailer
/// - `FrameError::BadMagic` on a tag mismatch
/// - `FrameError::CrcMismatch` when the trailer does not match the body
pub fn read_frame<'a>(
    data: &'a [u8],
    expected_magic: Option<[u8; 4]>,
) -> Result<(Frame, &'a [u8])> {
    if data.len() < FRAME_HEADER_SIZE + FRAME_CRC_SIZE {
        return Err(FrameError::Truncated {
            expected: FRAME_HEADER_SIZE + FRAME_CRC_SIZE,
            actual: data.len(),
        });
    }
    let magic = [data[0], data[1], data[2], data[3]];
    if let Some(expected) = expected_magic {
        if magic != expected {
            return Err(FrameError::BadMagic { found: magic, expected });
        }
    }
    let version =
        Version::new(data[4], data[5], u16::from_be_bytes([data[6], data[7]]));
    let feature_bits = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let body_len = u32::from_be_bytes([data[12], data[13], data[14], data[15]]) as usize;

    let body_start = FRAME_HEADER_SIZE;
    let crc_start = body_start
        .checked_add(body_len)
        .ok_or(FrameError::Truncated { expected: usize::MAX, actual: data.len() })?;
    let crc_end = crc_start + FRAME_CRC_SIZE;
    if crc_end > data.len() {
        return Err(FrameError::Truncated { expected: crc_end, actual: data.len() });
    }

    let body = &data[body_start..crc_start];
    let stored = u32::from_be_bytes([
        data[crc_start],
        data[crc_start + 1],
        data[crc_start + 2],
        data[crc_start + 3],
    ]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(FrameError::CrcMismatch { stored, computed });
    }

    let frame = Frame {
        magic,
        version,
        features: FeatureSet::from_bits(feature_bits),
        body: body.to_vec(),
    };
    Ok((frame, &data[crc_end..]))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::Feature;

    #[test]
    fn wire_layout_is_byte_exact() {
        let features = FeatureSet::from_features([Feature::PayloadSourceMap]);
        let wire =
            write_frame(WRAPPER_MAGIC, Version::new(1, 2, 0), features, b"abc").unwrap();
        assert_eq!(&wire[0..4], b"QYN1");
        assert_eq!(wire[4], 1);
        assert_eq!(wire[5], 2);
        assert_eq!(&wire[6..8], &[0, 0]);
        assert_eq!(&wire[8..12], &(1u32 << 2).to_be_bytes());
        assert_eq!(&wire[12..16], &3u32.to_be_bytes());
        assert_eq!(&wire[16..19], b"abc");
        assert_eq!(&wire[19..23], &crc32fast::hash(b"abc").to_be_bytes());
    }

    #[test]
    fn reject_wrong_magic() {
        let wire =
            write_frame(PAYLOAD_MAGIC, Version::new(1, 2, 0), FeatureSet::empty(), b"x").unwrap();
        let result = read_frame(&wire, Some(WRAPPER_MAGIC));
        assert!(matches!(result, Err(FrameError::BadMagic { .. })));
    }

    #[test]
    fn reject_truncated_body() {
        let wire =
            write_frame(WRAPPER_MAGIC, Version::new(1, 2, 0), FeatureSet::empty(), b"body")
                .unwrap();
        let result = read_frame(&wire[..wire.len() - 2], Some(WRAPPER_MAGIC));
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn reject_flipped_body_byte() {
        let mut wire =
            write_frame(WRAPPER_MAGIC, Version::new(1, 2, 0), FeatureSet::empty(), b"body")
                .unwrap();
        wire[FRAME_HEADER_SIZE] ^= 0xFF;
        let result = read_frame(&wire, Some(WRAPPER_MAGIC));
        assert!(matches!(result, Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn reject_flipped_crc_byte() {
        let mut wire =
            write_frame(WRAPPER_MAGIC, Version::new(1, 2, 0), FeatureSet::empty(), b"body")
                .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let result = read_frame(&wire, Some(WRAPPER_MAGIC));
        assert!(matches!(result, Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn empty_body_round_trips() {
        let wire =
            write_frame(PAYLOAD_MAGIC, Version::new(1, 0, 0), FeatureSet::empty(), b"").unwrap();
        let (frame, rest) = read_frame(&wire, Some(PAYLOAD_MAGIC)).unwrap();
        assert!(frame.body.is_empty());
        assert!(rest.is_empty());
    }

    proptest! {
        #[test]
        fn frame_round_trip(
            body in prop::collection::vec(any::<u8>(), 0..2048),
            bits in any::<u32>(),
            major in 0u8..=255,
            minor in 0u8..=255,
            patch in 0u16..=u16::MAX,
            trailing in prop::collection::vec(any::<u8>(), 0..32),
        ) {
            let version = Version::new(major, minor, patch);
            let features = FeatureSet::from_bits(bits);
            let mut wire = write_frame(WRAPPER_MAGIC, version, features, &body).unwrap();
            wire.extend_from_slice(&trailing);

            let (frame, rest) = read_frame(&wire, Some(WRAPPER_MAGIC)).unwrap();
            prop_assert_eq!(frame.magic, WRAPPER_MAGIC);
            prop_assert_eq!(frame.version, version);
            prop_assert_eq!(frame.features.bits(), bits);
            prop_assert_eq!(frame.body, body);
            prop_assert_eq!(rest, &trailing[..]);
        }
    }
}
