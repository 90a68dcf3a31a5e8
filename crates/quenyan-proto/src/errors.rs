//! Error types for QYN-1 wire framing.
//!
//! Strongly-typed errors covering the three framing layers: version
//! negotiation, frame envelopes, and section records. Higher layers map
//! these into their own error vocabulary; nothing here knows about crypto
//! or payload semantics.

use thiserror::Error;

use crate::version::Version;

/// Errors that can occur while parsing or assembling frames and sections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer ended before a complete header, body, or CRC trailer
    #[error("frame truncated: need {expected} bytes, have {actual}")]
    Truncated {
        /// Bytes required to continue parsing
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Leading magic did not match the expected envelope tag
    #[error("unexpected frame magic {found:02x?} (expected {expected:02x?})")]
    BadMagic {
        /// Magic bytes found on the wire
        found: [u8; 4],
        /// Magic bytes the caller expected
        expected: [u8; 4],
    },

    /// Stored CRC32 trailer does not match the body
    #[error("frame CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// CRC stored in the trailer
        stored: u32,
        /// CRC computed over the body
        computed: u32,
    },

    /// Section header or payload extends past the end of the buffer
    #[error("section corrupt: {0}")]
    SectionCorrupt(&'static str),

    /// Version outside the supported compatibility window
    #[error("unsupported package version {0}")]
    UnsupportedVersion(Version),

    /// Textual version failed to parse as semver
    #[error("invalid semantic version {0:?}")]
    InvalidVersion(String),

    /// Version negotiation found no mutually supported revision
    #[error("no compatible package version found for negotiation")]
    VersionMismatch,

    /// Feature bits set outside the closed feature set
    #[error("unknown feature bits {bits:#010x}")]
    UnknownFeature {
        /// Offending bits, masked to the unknown range
        bits: u32,
    },

    /// Frame body larger than the u32 length field can describe
    #[error("frame body of {0} bytes exceeds the u32 length field")]
    BodyTooLarge(usize),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FrameError>;
