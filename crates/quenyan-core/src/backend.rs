//! Compression backends for morpheme token streams.
//!
//! Every backend speaks the same three-call protocol: `build_model`
//! derives a serialisable [`CompressionModel`] from the symbols,
//! `encode` compresses against (and may enrich) that model, and `decode`
//! reverses it given the declared symbol count. Backends are stateless;
//! shared state (the global model registry and the FSE dictionary map)
//! travels in a [`BackendContext`] borrowed from the `Codec` handle.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use crate::errors::{PackageError, Result};
use crate::model::{ChunkInfo, CompressionModel, GlobalModelRegistry, resolve_frequencies};
use crate::rans::{DEFAULT_PRECISION_BITS, RansCodec};

/// Default chunk size for the chunked backend.
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// A shared entropy dictionary stored by the FSE backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FseDictionary {
    /// Raw symbol counts
    pub counts: Vec<u32>,
    /// Table log the counts were collected for
    pub table_log: u8,
}

/// Shared dictionary map, process-global via the `Codec` handle.
pub type FseDictionaryMap = Mutex<BTreeMap<String, FseDictionary>>;

/// Shared registries a backend may consult.
#[derive(Clone, Copy)]
pub struct BackendContext<'a> {
    /// Global model registry for static/hybrid token models
    pub models: &'a GlobalModelRegistry,
    /// Shared FSE dictionaries, copy-on-insert
    pub fse_dictionaries: &'a FseDictionaryMap,
}

/// Interface implemented by compression backends.
pub trait CompressionBackend {
    /// Stable backend name recorded in package metadata.
    fn name(&self) -> &'static str;

    /// Derive a model from `symbols` over a dense alphabet.
    fn build_model(
        &self,
        ctx: BackendContext<'_>,
        symbols: &[u32],
        alphabet_size: usize,
    ) -> Result<CompressionModel>;

    /// Compress `symbols` against `model`; backends may record additional
    /// metadata (e.g. chunk tables) into the model.
    fn encode(
        &self,
        ctx: BackendContext<'_>,
        symbols: &[u32],
        model: &mut CompressionModel,
    ) -> Result<Vec<u8>>;

    /// Decompress `data` back into `symbol_count` symbols.
    fn decode(
        &self,
        ctx: BackendContext<'_>,
        data: &[u8],
        model: &CompressionModel,
        symbol_count: usize,
    ) -> Result<Vec<u32>>;
}

/// Tuning knobs accepted by backend constructors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// rANS table precision
    pub precision_bits: Option<u8>,
    /// Chunk size for the chunked backend
    pub chunk_size: Option<usize>,
    /// FSE table log
    pub table_log: Option<u8>,
    /// Shared FSE dictionary key
    pub dictionary_key: Option<String>,
}

/// Whether a backend supports static/hybrid model modes.
#[must_use]
pub fn supports_static_models(name: &str) -> bool {
    matches!(name, "rans" | "chunked-rans")
}

/// Construct a backend by name.
///
/// # Errors
///
/// `PackageError::BackendUnavailable` for unknown names or invalid
/// options.
pub fn create_backend(
    name: &str,
    options: &BackendOptions,
) -> Result<Box<dyn CompressionBackend>> {
    let unavailable = |reason: String| PackageError::BackendUnavailable {
        name: name.to_owned(),
        reason,
    };
    match name {
        "rans" => {
            let codec = RansCodec::new(options.precision_bits.unwrap_or(DEFAULT_PRECISION_BITS))
                .map_err(|err| unavailable(err.to_string()))?;
            Ok(Box::new(RansBackend { codec }))
        },
        "chunked-rans" => {
            let chunk_size = options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
            if chunk_size == 0 {
                return Err(unavailable("chunk_size must be positive".to_owned()));
            }
            let codec = RansCodec::new(options.precision_bits.unwrap_or(DEFAULT_PRECISION_BITS))
                .map_err(|err| unavailable(err.to_string()))?;
            Ok(Box::new(ChunkedRansBackend { chunk_size, codec }))
        },
        "fse" | "fse-production" => Ok(Box::new(FseBackend {
            name: if name == "fse" { "fse" } else { "fse-production" },
            table_log: options.table_log.unwrap_or(DEFAULT_PRECISION_BITS),
            dictionary_key: options.dictionary_key.clone(),
        })),
        other => Err(PackageError::BackendUnavailable {
            name: other.to_owned(),
            reason: "unknown compression backend".to_owned(),
        }),
    }
}

/// Built-in backend using the table-based rANS codec.
pub struct RansBackend {
    codec: RansCodec,
}

impl CompressionBackend for RansBackend {
    fn name(&self) -> &'static str {
        "rans"
    }

    fn build_model(
        &self,
        _ctx: BackendContext<'_>,
        symbols: &[u32],
        alphabet_size: usize,
    ) -> Result<CompressionModel> {
        let table = self.codec.build_table(symbols, alphabet_size)?;
        Ok(CompressionModel {
            precision_bits: Some(table.precision_bits),
            frequencies: Some(table.frequencies),
            ..CompressionModel::default()
        })
    }

    fn encode(
        &self,
        ctx: BackendContext<'_>,
        symbols: &[u32],
        model: &mut CompressionModel,
    ) -> Result<Vec<u8>> {
        let codec = RansCodec::new(model.precision_or_default())?;
        let frequencies = resolve_frequencies(model, ctx.models)?;
        let table = codec.table_from_frequencies(&frequencies)?;
        codec.encode(symbols, &table)
    }

    fn decode(
        &self,
        ctx: BackendContext<'_>,
        data: &[u8],
        model: &CompressionModel,
        symbol_count: usize,
    ) -> Result<Vec<u32>> {
        let codec = RansCodec::new(model.precision_or_default())?;
        let frequencies = resolve_frequencies(model, ctx.models)?;
        let table = codec.table_from_frequencies(&frequencies)?;
        codec.decode(data, &table, symbol_count)
    }
}

/// Chunked rANS backend: fixed-size chunks with per-chunk tables.
pub struct ChunkedRansBackend {
    chunk_size: usize,
    codec: RansCodec,
}

impl CompressionBackend for ChunkedRansBackend {
    fn name(&self) -> &'static str {
        "chunked-rans"
    }

    fn build_model(
        &self,
        _ctx: BackendContext<'_>,
        _symbols: &[u32],
        alphabet_size: usize,
    ) -> Result<CompressionModel> {
        Ok(CompressionModel {
            mode: Some("chunked".to_owned()),
            chunk_size: Some(self.chunk_size as u64),
            precision_bits: Some(self.codec.precision_bits()),
            alphabet_size: Some(alphabet_size as u64),
            chunks: Some(Vec::new()),
            ..CompressionModel::default()
        })
    }

    fn encode(
        &self,
        _ctx: BackendContext<'_>,
        symbols: &[u32],
        model: &mut CompressionModel,
    ) -> Result<Vec<u8>> {
        let alphabet_size = model
            .alphabet_size
            .ok_or_else(|| PackageError::malformed("chunked model missing alphabet size"))?
            as usize;
        let codec = RansCodec::new(model.precision_or_default())?;
        let mut compressed = Vec::new();
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for chunk in symbols.chunks(self.chunk_size) {
            let table = codec.build_table(chunk, alphabet_size)?;
            let encoded = codec.encode(chunk, &table)?;
            chunks.push(ChunkInfo {
                offset,
                length: encoded.len() as u64,
                symbol_count: chunk.len() as u64,
                frequencies: table.frequencies,
            });
            offset += encoded.len() as u64;
            compressed.extend_from_slice(&encoded);
        }
        model.chunks = Some(chunks);
        Ok(compressed)
    }

    fn decode(
        &self,
        _ctx: BackendContext<'_>,
        data: &[u8],
        model: &CompressionModel,
        symbol_count: usize,
    ) -> Result<Vec<u32>> {
        let chunks = model
            .chunks
            .as_ref()
            .ok_or_else(|| PackageError::entropy("chunk metadata missing for chunked-rans"))?;
        let codec = RansCodec::new(model.precision_or_default())?;
        let mut decoded = Vec::with_capacity(symbol_count);
        for chunk in chunks {
            let start = chunk.offset as usize;
            let end = start
                .checked_add(chunk.length as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| PackageError::entropy("chunk extends past compressed blob"))?;
            let table = codec.table_from_frequencies(&chunk.frequencies)?;
            let symbols = codec.decode(&data[start..end], &table, chunk.symbol_count as usize)?;
            decoded.extend(symbols);
        }
        if decoded.len() != symbol_count {
            return Err(PackageError::entropy("decoded symbol count mismatch"));
        }
        Ok(decoded)
    }
}

/// Finite-state-entropy backend.
///
/// The native FSE library is not linked in this build, so coding falls
/// back to the deterministic rANS path; the frequency table is still
/// recorded (and optionally shared through the dictionary map) so a
/// native decoder can consume the same packages.
pub struct FseBackend {
    name: &'static str,
    table_log: u8,
    dictionary_key: Option<String>,
}

impl FseBackend {
    fn fallback_precision(&self, model: &CompressionModel) -> u8 {
        model.table_log.unwrap_or(self.table_log).clamp(8, 16)
    }

    fn counts_for(
        &self,
        ctx: BackendContext<'_>,
        model: &CompressionModel,
    ) -> Result<Vec<u32>> {
        if let Some(counts) = &model.counts {
            return Ok(counts.clone());
        }
        if let Some(key) = model.dictionary_key.as_deref() {
            if let Ok(dictionaries) = ctx.fse_dictionaries.lock() {
                if let Some(dictionary) = dictionaries.get(key) {
                    return Ok(dictionary.counts.clone());
                }
            }
        }
        Err(PackageError::malformed("compression model missing frequency table"))
    }
}

impl CompressionBackend for FseBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn build_model(
        &self,
        ctx: BackendContext<'_>,
        symbols: &[u32],
        alphabet_size: usize,
    ) -> Result<CompressionModel> {
        let mut counts = vec![0u32; alphabet_size];
        for &symbol in symbols {
            let slot = counts.get_mut(symbol as usize).ok_or_else(|| {
                PackageError::entropy(format!(
                    "symbol {symbol} exceeds alphabet size {alphabet_size}"
                ))
            })?;
            *slot += 1;
        }
        if let Some(key) = &self.dictionary_key {
            if let Ok(mut dictionaries) = ctx.fse_dictionaries.lock() {
                dictionaries.insert(key.clone(), FseDictionary {
                    counts: counts.clone(),
                    table_log: self.table_log,
                });
            }
        }
        Ok(CompressionModel {
            table_log: Some(self.table_log),
            counts: Some(counts),
            dictionary_key: self.dictionary_key.clone(),
            ..CompressionModel::default()
        })
    }

    fn encode(
        &self,
        ctx: BackendContext<'_>,
        symbols: &[u32],
        model: &mut CompressionModel,
    ) -> Result<Vec<u8>> {
        debug!(backend = self.name, "native FSE unavailable, using rANS fallback");
        let codec = RansCodec::new(self.fallback_precision(model))?;
        let counts = self.counts_for(ctx, model)?;
        let table = codec.table_from_frequencies(&counts)?;
        codec.encode(symbols, &table)
    }

    fn decode(
        &self,
        ctx: BackendContext<'_>,
        data: &[u8],
        model: &CompressionModel,
        symbol_count: usize,
    ) -> Result<Vec<u32>> {
        let codec = RansCodec::new(self.fallback_precision(model))?;
        let counts = self.counts_for(ctx, model)?;
        let table = codec.table_from_frequencies(&counts)?;
        codec.decode(data, &table, symbol_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_parts() -> (GlobalModelRegistry, FseDictionaryMap) {
        (GlobalModelRegistry::new(), Mutex::new(BTreeMap::new()))
    }

    fn roundtrip(backend: &dyn CompressionBackend, symbols: &[u32], alphabet: usize) {
        let (models, fse) = context_parts();
        let ctx = BackendContext { models: &models, fse_dictionaries: &fse };
        let mut model = backend.build_model(ctx, symbols, alphabet).unwrap();
        let encoded = backend.encode(ctx, symbols, &mut model).unwrap();
        let decoded = backend.decode(ctx, &encoded, &model, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn rans_roundtrip() {
        let backend = create_backend("rans", &BackendOptions::default()).unwrap();
        roundtrip(backend.as_ref(), &[1, 2, 3, 1, 1, 0, 2], 4);
        roundtrip(backend.as_ref(), &[], 4);
    }

    #[test]
    fn chunked_roundtrip_records_chunk_tables() {
        let backend = create_backend("chunked-rans", &BackendOptions {
            chunk_size: Some(4),
            ..BackendOptions::default()
        })
        .unwrap();
        let symbols: Vec<u32> = (0..23).map(|i| i % 5).collect();
        let (models, fse) = context_parts();
        let ctx = BackendContext { models: &models, fse_dictionaries: &fse };
        let mut model = backend.build_model(ctx, &symbols, 5).unwrap();
        let encoded = backend.encode(ctx, &symbols, &mut model).unwrap();

        let chunks = model.chunks.as_ref().unwrap();
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.iter().map(|c| c.symbol_count).sum::<u64>(), 23);

        let decoded = backend.decode(ctx, &encoded, &model, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn chunked_decode_rejects_symbol_count_drift() {
        let backend =
            create_backend("chunked-rans", &BackendOptions::default()).unwrap();
        let symbols = vec![0u32, 1, 2, 0, 1];
        let (models, fse) = context_parts();
        let ctx = BackendContext { models: &models, fse_dictionaries: &fse };
        let mut model = backend.build_model(ctx, &symbols, 3).unwrap();
        let encoded = backend.encode(ctx, &symbols, &mut model).unwrap();
        assert!(backend.decode(ctx, &encoded, &model, 4).is_err());
    }

    #[test]
    fn fse_falls_back_to_rans_and_keeps_counts() {
        let backend = create_backend("fse-production", &BackendOptions {
            table_log: Some(11),
            ..BackendOptions::default()
        })
        .unwrap();
        let symbols = vec![0u32, 0, 1, 2, 2, 2];
        let (models, fse) = context_parts();
        let ctx = BackendContext { models: &models, fse_dictionaries: &fse };
        let mut model = backend.build_model(ctx, &symbols, 3).unwrap();
        assert_eq!(model.counts, Some(vec![2, 1, 3]));
        assert_eq!(model.table_log, Some(11));

        let encoded = backend.encode(ctx, &symbols, &mut model).unwrap();
        let decoded = backend.decode(ctx, &encoded, &model, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn fse_shared_dictionary_is_stored_and_consulted() {
        let backend = create_backend("fse-production", &BackendOptions {
            dictionary_key: Some("project".to_owned()),
            ..BackendOptions::default()
        })
        .unwrap();
        let symbols = vec![0u32, 1, 1, 2];
        let (models, fse) = context_parts();
        let ctx = BackendContext { models: &models, fse_dictionaries: &fse };
        let mut model = backend.build_model(ctx, &symbols, 3).unwrap();
        assert!(fse.lock().unwrap().contains_key("project"));

        // Strip the inline counts; decode must fall back to the shared map.
        model.counts = None;
        let mut sealed_model = model.clone();
        let encoded = backend.encode(ctx, &symbols, &mut sealed_model).unwrap();
        let decoded = backend.decode(ctx, &encoded, &model, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn unknown_backend_is_unavailable() {
        let err = create_backend("duda", &BackendOptions::default()).err().unwrap();
        assert!(matches!(err, PackageError::BackendUnavailable { .. }));
    }

    #[test]
    fn static_support_is_rans_family_only() {
        assert!(supports_static_models("rans"));
        assert!(supports_static_models("chunked-rans"));
        assert!(!supports_static_models("fse"));
        assert!(!supports_static_models("fse-production"));
    }
}
