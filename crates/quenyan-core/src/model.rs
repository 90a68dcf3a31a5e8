//! Compression model construction and the three model modes.
//!
//! `static` uses a registered global frequency table with no per-package
//! adaptation, `adaptive` builds a fresh table from the token stream, and
//! `hybrid` starts from the global table and applies sparse overrides
//! derived from the package-level distribution. Static and hybrid only
//! make sense for the rANS family; other backends silently downgrade to
//! adaptive.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{PackageError, Result};
use crate::rans::DEFAULT_PRECISION_BITS;
use crate::value::canonical_json;

/// Default global model identifier.
pub const DEFAULT_MODEL_ID: &str = "global_v1";

/// Model construction mode for morphemic token streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    /// Packaged global frequency table, no per-package adaptation
    Static,
    /// Fresh model built from the package's own token stream
    Adaptive,
    /// Global table plus sparse per-package overrides
    Hybrid,
}

impl ModelMode {
    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Adaptive => "adaptive",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parse a wire name; unknown names are `None`.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "static" => Some(Self::Static),
            "adaptive" => Some(Self::Adaptive),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Per-chunk metadata recorded by the chunked rANS backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Byte offset of the chunk within the compressed blob
    pub offset: u64,
    /// Compressed chunk length in bytes
    pub length: u64,
    /// Symbols coded in this chunk
    pub symbol_count: u64,
    /// Normalised frequency table for this chunk
    pub frequencies: Vec<u32>,
}

/// Serialised compression model, shared by every backend.
///
/// Only the fields a backend actually uses are present; the canonical
/// JSON of this struct is what the metadata digest commits to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompressionModel {
    /// Model mode marker (`static`, `hybrid`, `chunked`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Global model referenced by static/hybrid modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// rANS table precision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision_bits: Option<u8>,
    /// Dense alphabet size the model was built for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alphabet_size: Option<u64>,
    /// Inline frequency table (adaptive mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<u32>>,
    /// Sparse overrides relative to the global baseline (hybrid mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<BTreeMap<String, u32>>,
    /// Chunk size used by the chunked backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// Per-chunk tables recorded by the chunked backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<ChunkInfo>>,
    /// Raw symbol counts recorded by the FSE backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u32>>,
    /// FSE table log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_log: Option<u8>,
    /// Shared FSE dictionary key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dictionary_key: Option<String>,
}

impl CompressionModel {
    /// Model precision, falling back to the codec default.
    #[must_use]
    pub fn precision_or_default(&self) -> u8 {
        self.precision_bits.unwrap_or(DEFAULT_PRECISION_BITS)
    }

    /// Rough in-memory size estimate used for budget checks: element
    /// counts of the list fields plus byte lengths of the string fields.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        let mut total = 0u64;
        total += self.frequencies.as_ref().map_or(0, |f| f.len() as u64);
        total += self.counts.as_ref().map_or(0, |c| c.len() as u64);
        total += self.overrides.as_ref().map_or(0, |o| o.len() as u64);
        total += self
            .chunks
            .as_ref()
            .map_or(0, |chunks| chunks.iter().map(|c| 4 + c.frequencies.len() as u64).sum());
        for text in [&self.mode, &self.model_id, &self.dictionary_key] {
            total += text.as_ref().map_or(0, |t| t.len() as u64);
        }
        total
    }
}

/// SHA-256 hex digest of the canonical JSON of `model`.
///
/// # Errors
///
/// `PackageError::Malformed` when the model cannot be serialised.
pub fn digest_model(model: &CompressionModel) -> Result<String> {
    let canonical = canonical_json(model)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// A packaged global frequency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalModel {
    /// Registry identifier
    pub model_id: String,
    /// rANS table precision the frequencies were normalised for
    pub precision_bits: u8,
    /// Alphabet size; frequencies are padded to this length on register
    pub alphabet_size: u64,
    /// Frequency table
    pub frequencies: Vec<u32>,
}

/// Registry of packaged global models, immutable after registration.
///
/// Held by the `Codec` handle; lookups are read-locked so a populated
/// registry can be shared across threads.
#[derive(Debug, Default)]
pub struct GlobalModelRegistry {
    models: RwLock<BTreeMap<String, Arc<GlobalModel>>>,
}

impl GlobalModelRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global model, padding short frequency tables with ones.
    pub fn register(&self, mut model: GlobalModel) {
        let target = model.alphabet_size as usize;
        if model.frequencies.len() < target {
            model.frequencies.resize(target, 1);
        }
        if let Ok(mut models) = self.models.write() {
            models.insert(model.model_id.clone(), Arc::new(model));
        }
    }

    /// Load a registered model by id.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when the id is not registered.
    pub fn load(&self, model_id: &str) -> Result<Arc<GlobalModel>> {
        self.models
            .read()
            .ok()
            .and_then(|models| models.get(model_id).cloned())
            .ok_or_else(|| {
                PackageError::malformed(format!("global model {model_id:?} is not registered"))
            })
    }
}

/// Concrete frequency table for a hybrid model: the global baseline padded
/// to `alphabet_size`, with `overrides` applied on top.
#[must_use]
pub fn apply_hybrid_overrides(
    base: &GlobalModel,
    overrides: &BTreeMap<u64, u32>,
    alphabet_size: Option<u64>,
) -> Vec<u32> {
    let target = alphabet_size.unwrap_or(base.alphabet_size) as usize;
    let mut frequencies = base.frequencies.clone();
    if frequencies.len() < target {
        frequencies.resize(target, 1);
    }
    for (&index, &freq) in overrides {
        let index = index as usize;
        if index >= frequencies.len() {
            frequencies.resize(index + 1, 1);
        }
        frequencies[index] = freq;
    }
    frequencies
}

/// Compute sparse overrides from adaptive frequencies relative to a base
/// table: every index where the two differ by more than `threshold`, plus
/// the adaptive tail beyond the base table's length.
#[must_use]
pub fn build_sparse_overrides(
    adaptive: &[u32],
    base: &[u32],
    threshold: u32,
) -> BTreeMap<u64, u32> {
    let mut overrides = BTreeMap::new();
    for (index, (&a, &b)) in adaptive.iter().zip(base.iter()).enumerate() {
        if a.abs_diff(b) > threshold {
            overrides.insert(index as u64, a);
        }
    }
    for (index, &a) in adaptive.iter().enumerate().skip(base.len()) {
        overrides.insert(index as u64, a);
    }
    overrides
}

/// Resolve a model to the concrete frequency table used for token coding.
///
/// Static and hybrid modes are reconstituted through the registry; any
/// other (or absent) mode uses the inline frequencies.
///
/// # Errors
///
/// `PackageError::Malformed` when a referenced global model is missing or
/// an adaptive model lacks inline frequencies.
pub fn resolve_frequencies(
    model: &CompressionModel,
    registry: &GlobalModelRegistry,
) -> Result<Vec<u32>> {
    let mode = model.mode.as_deref().and_then(ModelMode::from_str_opt);
    match mode {
        Some(ModelMode::Static) => {
            let global = registry.load(model.model_id.as_deref().unwrap_or(DEFAULT_MODEL_ID))?;
            let mut frequencies = global.frequencies.clone();
            if let Some(alphabet) = model.alphabet_size {
                if frequencies.len() < alphabet as usize {
                    frequencies.resize(alphabet as usize, 1);
                }
            }
            Ok(frequencies)
        },
        Some(ModelMode::Hybrid) => {
            let global = registry.load(model.model_id.as_deref().unwrap_or(DEFAULT_MODEL_ID))?;
            let overrides = parse_overrides(model.overrides.as_ref())?;
            Ok(apply_hybrid_overrides(&global, &overrides, model.alphabet_size))
        },
        _ => model
            .frequencies
            .clone()
            .ok_or_else(|| PackageError::malformed("compression model missing frequency table")),
    }
}

fn parse_overrides(overrides: Option<&BTreeMap<String, u32>>) -> Result<BTreeMap<u64, u32>> {
    let Some(overrides) = overrides else {
        return Ok(BTreeMap::new());
    };
    let mut parsed = BTreeMap::new();
    for (key, &freq) in overrides {
        let index: u64 = key
            .parse()
            .map_err(|_| PackageError::malformed(format!("invalid override index {key:?}")))?;
        parsed.insert(index, freq);
    }
    Ok(parsed)
}
