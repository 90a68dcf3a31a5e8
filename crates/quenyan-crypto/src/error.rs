//! Error types for the QYN-1 crypto envelope.

use thiserror::Error;

/// Errors that can occur while sealing or opening a package envelope.
///
/// `AuthFailed` deliberately carries no detail: distinguishing a bad
/// passphrase from tampered ciphertext would leak information the AEAD is
/// designed to withhold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Passphrase was empty
    #[error("passphrase must be non-empty")]
    EmptyPassphrase,

    /// AEAD tag verification failed
    #[error("authentication tag mismatch")]
    AuthFailed,

    /// Envelope declares an encryption version this codec does not speak
    #[error("unsupported encryption version {0}")]
    UnsupportedVersion(u32),

    /// Envelope declares an AEAD or KDF algorithm this codec does not speak
    #[error("unsupported {kind} algorithm {name:?}")]
    UnsupportedAlgorithm {
        /// Which algorithm slot was unsupported ("aead" or "kdf")
        kind: &'static str,
        /// Declared algorithm name
        name: String,
    },

    /// A binary envelope field has the wrong length
    #[error("envelope field {field} has invalid length {actual} (expected {expected})")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Length found
        actual: usize,
        /// Length required
        expected: usize,
    },

    /// Declared KDF parameters were rejected by the KDF implementation
    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParameters(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
