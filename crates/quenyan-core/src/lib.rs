//! QYN-1 Package Codec
//!
//! A versioned, authenticated, compressed container for serialized
//! source-code streams. The pipeline, leaves first:
//!
//! ```text
//! EncodedStream
//!     │  frequency plan          (token_plan)
//!     │  string table            (string_table)
//!     │  payload channels        (channels)
//!     │  per-channel rANS        (rans, backend, model)
//!     │  section assembly        (sections)
//!     ▼
//! payload frame ── AEAD encrypt with metadata AAD ──► wrapper frame
//! ```
//!
//! Decode reverses in strict order with [`Budget`] checks before every
//! allocation. The [`Codec`] handle owns all shared registries — global
//! models, FSE dictionaries, the dictionary cache — so nothing lives in
//! module globals. Everything is single-threaded and synchronous per
//! package; a codec is safely shared across threads for read-only
//! lookups only.

pub mod backend;
pub mod budget;
pub mod channels;
pub mod codec;
pub mod config;
pub mod dictionary;
pub mod errors;
pub mod legacy;
pub mod metadata;
pub mod model;
pub mod package;
pub mod rans;
pub mod sections;
pub mod source_map;
pub mod stream;
pub mod string_table;
pub mod token_plan;
pub mod value;
mod varint;

pub use backend::{BackendOptions, CompressionBackend, DEFAULT_CHUNK_SIZE};
pub use budget::Budget;
pub use channels::{Channel, ChannelEntry, Payload, PayloadChannels};
pub use codec::Codec;
pub use config::{CompressionConfig, CompressionMode, TokenOptimisation};
pub use dictionary::{
    DictionaryLoader, MorphemeDictionary, MorphemeEntry, StaticDictionaryLoader,
    UNKNOWN_MORPHEME_KEY,
};
pub use errors::PackageError;
pub use metadata::PackageMetadata;
pub use model::{CompressionModel, GlobalModel, ModelMode, digest_model};
pub use package::{
    DecodeOptions, EncodeOptions, Package, PackageInfo, inspect_package, verify_source_hash,
};
pub use source_map::{SourceMap, SourceMapBuilder, SourceMapEntry};
pub use stream::EncodedStream;
pub use string_table::StringTable;
pub use token_plan::{TokenOptimisationPlan, build_frequency_plan};
pub use value::Value;
