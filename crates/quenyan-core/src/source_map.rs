//! Token-to-source-span index for debugging decoded streams.
//!
//! The source map is a separate serialisable value, never embedded in
//! token iteration: a builder records spans during encode and the map is
//! carried as one zlib-compressed JSON section.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::errors::{PackageError, Result};

/// Current source map format revision.
pub const SOURCE_MAP_VERSION: &str = "1.0";

fn default_version() -> String {
    SOURCE_MAP_VERSION.to_owned()
}

/// One mapping between a morpheme token and its original source span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// Index of the token in the stream
    #[serde(rename = "token")]
    pub token_index: u32,
    /// Grammar key of the token
    pub key: String,
    /// `[line, column]` where the span starts
    pub start: [u32; 2],
    /// `[line, column]` where the span ends
    pub end: [u32; 2],
    /// Source AST node type, or `synthetic` for generated tokens
    #[serde(rename = "node")]
    pub node_type: String,
}

/// Source map entries plus the context they were captured against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    /// Format revision
    #[serde(default = "default_version")]
    pub version: String,
    /// Hex SHA-256 of the original source, or empty
    pub source_hash: String,
    /// Dictionary the token indices refer to
    pub dictionary_version: String,
    /// Encoder that produced the stream
    pub encoder_version: String,
    /// Span mappings in token order
    pub mappings: Vec<SourceMapEntry>,
}

impl SourceMap {
    /// Serialise to compact JSON and zlib-compress it.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when serialisation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|err| PackageError::malformed(format!("source map serialise: {err}")))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|()| encoder.finish())
            .map_err(|err| PackageError::malformed(format!("source map compress: {err}")))
    }

    /// Decompress and parse a serialised source map.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` on a damaged blob.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut decoder = ZlibDecoder::new(data);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|err| PackageError::malformed(format!("source map decompress: {err}")))?;
        serde_json::from_slice(&json)
            .map_err(|err| PackageError::malformed(format!("source map parse: {err}")))
    }

    /// Aggregate view used by inspection tooling.
    #[must_use]
    pub fn summary(&self) -> SourceMapSummary {
        SourceMapSummary {
            version: self.version.clone(),
            entries: self.mappings.len(),
            source_hash: self.source_hash.clone(),
            dictionary_version: self.dictionary_version.clone(),
            encoder_version: self.encoder_version.clone(),
        }
    }
}

/// Aggregate source map statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMapSummary {
    /// Format revision
    pub version: String,
    /// Number of mappings
    pub entries: usize,
    /// Hex SHA-256 of the original source
    pub source_hash: String,
    /// Dictionary version
    pub dictionary_version: String,
    /// Encoder version
    pub encoder_version: String,
}

/// Captures token locations while an encoder walks its AST.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    entries: Vec<SourceMapEntry>,
}

impl SourceMapBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token with a concrete source span.
    pub fn record(
        &mut self,
        token_index: u32,
        key: impl Into<String>,
        start: (u32, u32),
        end: (u32, u32),
        node_type: impl Into<String>,
    ) {
        self.entries.push(SourceMapEntry {
            token_index,
            key: key.into(),
            start: [start.0, start.1],
            end: [end.0, end.1],
            node_type: node_type.into(),
        });
    }

    /// Record a token with no source backing.
    pub fn record_synthetic(&mut self, token_index: u32, key: impl Into<String>) {
        self.record(token_index, key, (0, 0), (0, 0), "synthetic");
    }

    /// Finish the map with its capture context.
    #[must_use]
    pub fn build(
        self,
        source_hash: impl Into<String>,
        dictionary_version: impl Into<String>,
        encoder_version: impl Into<String>,
    ) -> SourceMap {
        SourceMap {
            version: SOURCE_MAP_VERSION.to_owned(),
            source_hash: source_hash.into(),
            dictionary_version: dictionary_version.into(),
            encoder_version: encoder_version.into(),
            mappings: self.entries,
        }
    }
}
