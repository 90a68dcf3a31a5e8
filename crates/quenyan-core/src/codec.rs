//! The `Codec` handle: explicit home for every shared registry.
//!
//! The codec replaces module-level singletons with one constructed
//! value: it owns the global model registry, the shared FSE dictionary
//! map, and the per-version dictionary cache. A single process-wide
//! instance is fine, but it is built, not imported. Read paths
//! (registry and cache lookups) are safe to share across threads; a
//! running encode or decode owns all of its mutable state on the stack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backend::{
    BackendContext, BackendOptions, CompressionBackend, FseDictionaryMap, create_backend,
};
use crate::dictionary::{DictionaryLoader, MorphemeDictionary};
use crate::errors::Result;
use crate::model::{GlobalModel, GlobalModelRegistry};

/// Shared registries and collaborators for encode/decode.
pub struct Codec {
    models: GlobalModelRegistry,
    fse_dictionaries: FseDictionaryMap,
    dictionary_cache: Mutex<HashMap<String, Arc<MorphemeDictionary>>>,
    loader: Box<dyn DictionaryLoader>,
    strict_morphemes: bool,
}

impl Codec {
    /// Construct a codec around a dictionary loader.
    #[must_use]
    pub fn new(loader: Box<dyn DictionaryLoader>) -> Self {
        Self {
            models: GlobalModelRegistry::new(),
            fse_dictionaries: FseDictionaryMap::default(),
            dictionary_cache: Mutex::new(HashMap::new()),
            loader,
            strict_morphemes: false,
        }
    }

    /// Enable strict morpheme resolution: unknown keys error instead of
    /// falling back to the sentinel.
    #[must_use]
    pub fn with_strict_morphemes(mut self, strict: bool) -> Self {
        self.strict_morphemes = strict;
        self
    }

    /// Whether strict morpheme resolution is enabled.
    #[must_use]
    pub fn strict_morphemes(&self) -> bool {
        self.strict_morphemes
    }

    /// Register a packaged global model.
    pub fn register_model(&self, model: GlobalModel) {
        self.models.register(model);
    }

    /// The global model registry.
    #[must_use]
    pub fn models(&self) -> &GlobalModelRegistry {
        &self.models
    }

    /// Backend context borrowing this codec's shared state.
    #[must_use]
    pub fn backend_context(&self) -> BackendContext<'_> {
        BackendContext { models: &self.models, fse_dictionaries: &self.fse_dictionaries }
    }

    /// Construct a compression backend by name.
    ///
    /// # Errors
    ///
    /// `PackageError::BackendUnavailable` for unknown names or invalid
    /// options.
    pub fn backend(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Box<dyn CompressionBackend>> {
        create_backend(name, options)
    }

    /// Load the dictionary for `version`, caching the result.
    ///
    /// Loads are idempotent: concurrent callers may both hit the loader,
    /// but the cache converges on one instance per version.
    ///
    /// # Errors
    ///
    /// Whatever the loader surfaces for an unsupported version.
    pub fn dictionary(&self, version: &str) -> Result<Arc<MorphemeDictionary>> {
        if let Ok(cache) = self.dictionary_cache.lock() {
            if let Some(dictionary) = cache.get(version) {
                return Ok(Arc::clone(dictionary));
            }
        }
        let dictionary = self.loader.load(version)?;
        if let Ok(mut cache) = self.dictionary_cache.lock() {
            return Ok(Arc::clone(
                cache.entry(version.to_owned()).or_insert_with(|| Arc::clone(&dictionary)),
            ));
        }
        Ok(dictionary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dictionary::{MorphemeEntry, UNKNOWN_MORPHEME_KEY};

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl DictionaryLoader for CountingLoader {
        fn load(&self, version: &str) -> Result<Arc<MorphemeDictionary>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let entries = vec![MorphemeEntry {
                key: UNKNOWN_MORPHEME_KEY.to_owned(),
                morpheme: "uvanwa".to_owned(),
                kind: "meta".to_owned(),
            }];
            Ok(Arc::new(MorphemeDictionary::new(version, entries)?))
        }
    }

    #[test]
    fn dictionary_loads_are_cached() {
        let codec = Codec::new(Box::new(CountingLoader { loads: AtomicUsize::new(0) }));
        let first = codec.dictionary("1.0").unwrap();
        let second = codec.dictionary("1.0").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let _other = codec.dictionary("1.1").unwrap();
    }

    #[test]
    fn backend_construction_goes_through_handle() {
        let codec = Codec::new(Box::new(CountingLoader { loads: AtomicUsize::new(0) }));
        assert!(codec.backend("rans", &BackendOptions::default()).is_ok());
        assert!(codec.backend("nope", &BackendOptions::default()).is_err());
    }
}
