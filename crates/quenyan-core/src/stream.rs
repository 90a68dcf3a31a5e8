//! The encoded-stream boundary between encoder front-ends and the codec.
//!
//! An [`EncodedStream`] is what an encoder collaborator hands to the
//! codec and what decode returns: the morphemic token stream, the
//! payload list with its channel entries, and the optional source map.
//! The codec only relies on three guarantees: token indices are valid
//! for the named dictionary version, entries are in grammar order, and
//! `source_hash` is either empty or a hex SHA-256.

use crate::channels::{Payload, PayloadChannels};
use crate::source_map::SourceMap;

/// Encoded representation of one source module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedStream {
    /// Dictionary revision the tokens index into
    pub dictionary_version: String,
    /// Encoder that produced the stream
    pub encoder_version: String,
    /// Source language name
    pub source_language: String,
    /// Source language version
    pub source_language_version: String,
    /// Hex SHA-256 of the source, or empty
    pub source_hash: String,
    /// Morpheme dictionary indices in grammar order
    pub tokens: Vec<u32>,
    /// Payloads in grammar order
    pub payloads: Vec<Payload>,
    /// Channelised payload view; `entries` is authoritative
    pub payload_channels: PayloadChannels,
    /// Optional token-to-span index
    pub source_map: Option<SourceMap>,
    /// Package author
    pub author: Option<String>,
    /// Source license
    pub license: Option<String>,
    /// Encode timestamp
    pub timestamp: Option<String>,
}

impl EncodedStream {
    /// Build a stream, deriving channel entries from the payload list.
    ///
    /// Front-ends that track token positions can refine
    /// `payload_channels.entries[..].token_index` afterwards.
    #[must_use]
    pub fn new(
        dictionary_version: impl Into<String>,
        encoder_version: impl Into<String>,
        tokens: Vec<u32>,
        payloads: Vec<Payload>,
    ) -> Self {
        let entries = PayloadChannels::classify_entries(&payloads);
        Self {
            dictionary_version: dictionary_version.into(),
            encoder_version: encoder_version.into(),
            source_language: "unknown".to_owned(),
            source_language_version: "unknown".to_owned(),
            source_hash: String::new(),
            tokens,
            payloads,
            payload_channels: PayloadChannels::from_entries(entries),
            source_map: None,
            author: None,
            license: None,
            timestamp: None,
        }
    }
}
