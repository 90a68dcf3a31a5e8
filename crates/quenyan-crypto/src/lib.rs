//! QYN-1 Cryptographic Envelope
//!
//! Passphrase-based authenticated encryption for package payload frames.
//! Pure synchronous functions; randomness is drawn from the OS per call
//! and every derived key is zeroised before return.
//!
//! # Key Lifecycle
//!
//! ```text
//! Passphrase
//!     │
//!     ▼
//! Argon2id (salt) → Key-Encryption Key          (v2 envelopes)
//!     │
//!     ▼
//! HKDF-SHA256 (hkdf_salt, "QYN1-ENVELOPE:v2") → AEAD key
//!     │
//!     ▼
//! ChaCha20-Poly1305 (nonce, metadata AAD) → ciphertext ‖ tag
//! ```
//!
//! Legacy v1 envelopes derived the AEAD key in a single
//! PBKDF2-HMAC-SHA256 stage; they are still opened for compatibility but
//! never emitted for new packages.
//!
//! # Security
//!
//! - The package metadata rides as AEAD associated data, so any edit to
//!   the authenticated metadata invalidates the tag.
//! - Salts and nonces are fresh per encryption; keys are never reused
//!   across envelopes.
//! - Key material is held in [`zeroize::Zeroizing`] buffers and wiped on
//!   all paths. Passphrases are never cloned into logs or error values.

pub mod envelope;
pub mod error;

pub use envelope::{
    CURRENT_ENCRYPTION_VERSION, DEFAULT_AEAD, DEFAULT_KDF, EncryptionResult, HKDF_SALT_SIZE,
    KdfParameters, LEGACY_KDF, NONCE_SIZE, PBKDF2_ROUNDS, SALT_SIZE, TAG_SIZE,
    default_kdf_parameters, decrypt, encrypt, encrypt_with_version,
};
pub use error::EnvelopeError;
