//! Error types for the QYN-1 package codec.
//!
//! One flat leaf set for the whole decode/encode pipeline. Wire-level
//! failures from `quenyan-proto` and envelope failures from
//! `quenyan-crypto` are folded into this vocabulary at the crate boundary
//! so callers match on a single enum.

use quenyan_crypto::EnvelopeError;
use quenyan_proto::FrameError;
use thiserror::Error;

/// Errors surfaced by package encode and decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    /// Package or payload version outside the supported window
    #[error("unsupported package version {version}")]
    UnsupportedVersion {
        /// Offending version text
        version: String,
    },

    /// Structural frame or section damage: bad magic, truncation, CRC
    /// mismatch, or a malformed section stream
    #[error("frame corrupt: {reason}")]
    FrameCorrupt {
        /// What failed validation
        reason: String,
    },

    /// Feature bits outside the closed set that the caller did not allow
    #[error("package requires unknown feature bits {bits:#010x}")]
    UnknownFeature {
        /// Disallowed bits
        bits: u32,
    },

    /// AEAD tag verification failed
    #[error("package authentication failed")]
    AuthFailed,

    /// Wrapper and payload disagree about metadata or the model digest
    #[error("metadata mismatch: {reason}")]
    MetadataMismatch {
        /// Which field disagreed
        reason: String,
    },

    /// Payload channel streams do not line up with the entry list
    #[error("payload channel corrupt: {reason}")]
    PayloadChannelCorrupt {
        /// What drifted
        reason: String,
    },

    /// A declared length exceeds the decode resource budget
    #[error("resource budget exceeded: {field} is {actual}, cap is {cap}")]
    ResourceBudgetExceeded {
        /// Budget field that overflowed
        field: &'static str,
        /// Declared value
        actual: u64,
        /// Configured cap
        cap: u64,
    },

    /// Dictionary key absent in strict morpheme mode
    #[error("unknown morpheme key {key:?} in dictionary {version}")]
    UnknownMorpheme {
        /// Missing key
        key: String,
        /// Dictionary version consulted
        version: String,
    },

    /// Requested compression backend is not available
    #[error("compression backend {name:?} unavailable: {reason}")]
    BackendUnavailable {
        /// Backend name
        name: String,
        /// Why it could not be constructed
        reason: String,
    },

    /// Entropy-coded stream failed to decode against its model
    #[error("entropy stream corrupt: {reason}")]
    EntropyCorrupt {
        /// What failed
        reason: String,
    },

    /// Anything else structurally wrong with the package contents
    #[error("malformed package: {reason}")]
    Malformed {
        /// What was malformed
        reason: String,
    },
}

impl PackageError {
    /// Shorthand for a [`PackageError::Malformed`] with a formatted reason.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }

    /// Shorthand for a [`PackageError::PayloadChannelCorrupt`].
    #[must_use]
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::PayloadChannelCorrupt { reason: reason.into() }
    }

    /// Shorthand for a [`PackageError::EntropyCorrupt`].
    #[must_use]
    pub fn entropy(reason: impl Into<String>) -> Self {
        Self::EntropyCorrupt { reason: reason.into() }
    }
}

impl From<FrameError> for PackageError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnsupportedVersion(version) => {
                Self::UnsupportedVersion { version: version.to_string() }
            },
            FrameError::InvalidVersion(version) => Self::UnsupportedVersion { version },
            FrameError::VersionMismatch => {
                Self::UnsupportedVersion { version: "no mutual version".to_owned() }
            },
            FrameError::UnknownFeature { bits } => Self::UnknownFeature { bits },
            other => Self::FrameCorrupt { reason: other.to_string() },
        }
    }
}

impl From<EnvelopeError> for PackageError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::AuthFailed => Self::AuthFailed,
            other => Self::Malformed { reason: other.to_string() },
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PackageError>;
