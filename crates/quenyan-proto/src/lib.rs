//! QYN-1 wire framing.
//!
//! This crate owns the structural layer of the QYN-1 package format: the
//! magic-tagged, CRC-validated frame envelopes, the typed section records
//! inside a payload body, the closed feature-bit set, and semver
//! negotiation for the supported compatibility window.
//!
//! Nothing here touches cryptography or payload semantics. The crypto
//! envelope lives in `quenyan-crypto`, and section interpretation in
//! `quenyan-core`; both consume this crate for their wire surfaces.
//!
//! Validation is deliberately front-loaded: frames reject bad magic,
//! truncation, and CRC mismatches before returning any body bytes, so the
//! upper layers never see structurally invalid input.

pub mod errors;
pub mod features;
pub mod frame;
pub mod section;
pub mod version;

pub use errors::FrameError;
pub use features::{Feature, FeatureSet};
pub use frame::{
    FRAME_CRC_SIZE, FRAME_HEADER_SIZE, Frame, PAYLOAD_MAGIC, WRAPPER_MAGIC, read_frame,
    write_frame,
};
pub use section::{SECTION_HEADER_SIZE, Section, decode_sections, encode_sections};
pub use version::{
    CURRENT_PACKAGE_VERSION, MINIMUM_SUPPORTED_PACKAGE_VERSION, SUPPORTED_PACKAGE_VERSIONS,
    Version, advertised_versions, compatibility_matrix, ensure_supported, negotiate_version,
    parse_any_version,
};
