//! Morpheme dictionary collaborator interface.
//!
//! The codec treats the dictionary as an opaque ordered alphabet: it
//! needs the alphabet size for model construction, key lookups for
//! context conditioning, and an `unknown` sentinel for lenient key
//! resolution. Loading is a collaborator concern behind
//! [`DictionaryLoader`]; the `Codec` handle caches loads per version.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::errors::{PackageError, Result};

/// Dictionary key of the unknown-morpheme sentinel.
pub const UNKNOWN_MORPHEME_KEY: &str = "meta:unknown";

/// One morpheme mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphemeEntry {
    /// Grammar key, e.g. `op:add` or `construct:function`
    pub key: String,
    /// Morpheme text
    pub morpheme: String,
    /// Entry kind tag
    pub kind: String,
}

/// Lookup structure over an ordered morpheme alphabet.
#[derive(Debug, Clone)]
pub struct MorphemeDictionary {
    version: String,
    entries: Vec<MorphemeEntry>,
    key_to_index: HashMap<String, u32>,
    unknown_index: u32,
}

impl MorphemeDictionary {
    /// Build a dictionary from ordered entries.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when the `meta:unknown` sentinel is
    /// missing.
    pub fn new(version: impl Into<String>, entries: Vec<MorphemeEntry>) -> Result<Self> {
        let mut key_to_index = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            key_to_index.entry(entry.key.clone()).or_insert(index as u32);
        }
        let unknown_index = key_to_index
            .get(UNKNOWN_MORPHEME_KEY)
            .copied()
            .ok_or_else(|| PackageError::malformed("dictionary must contain meta:unknown"))?;
        Ok(Self { version: version.into(), entries, key_to_index, unknown_index })
    }

    /// Dictionary version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Alphabet size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the unknown-morpheme sentinel.
    #[must_use]
    pub fn unknown_index(&self) -> u32 {
        self.unknown_index
    }

    /// Grammar key at `index`.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when the index is outside the alphabet.
    pub fn key_for_index(&self, index: u32) -> Result<&str> {
        self.entries.get(index as usize).map(|entry| entry.key.as_str()).ok_or_else(|| {
            PackageError::malformed(format!(
                "token {index} outside dictionary {} alphabet",
                self.version
            ))
        })
    }

    /// Resolve a grammar key to its index.
    ///
    /// In lenient mode unknown keys fall back to the sentinel; strict
    /// mode surfaces them.
    ///
    /// # Errors
    ///
    /// `PackageError::UnknownMorpheme` in strict mode when the key is
    /// absent.
    pub fn index_for_key(&self, key: &str, strict: bool) -> Result<u32> {
        if let Some(&index) = self.key_to_index.get(key) {
            return Ok(index);
        }
        if strict {
            return Err(PackageError::UnknownMorpheme {
                key: key.to_owned(),
                version: self.version.clone(),
            });
        }
        warn!(key, dictionary = %self.version, "unknown morpheme key, using fallback");
        Ok(self.unknown_index)
    }

    /// Grammar keys for a token stream, for context conditioning.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a token is outside the alphabet.
    pub fn token_keys(&self, tokens: &[u32]) -> Result<Vec<String>> {
        tokens.iter().map(|&token| self.key_for_index(token).map(str::to_owned)).collect()
    }
}

/// Collaborator that materialises dictionaries by version.
pub trait DictionaryLoader: Send + Sync {
    /// Load the dictionary for `version`.
    fn load(&self, version: &str) -> Result<Arc<MorphemeDictionary>>;
}

/// Loader over a fixed in-memory set of dictionaries.
#[derive(Debug, Default)]
pub struct StaticDictionaryLoader {
    dictionaries: HashMap<String, Arc<MorphemeDictionary>>,
}

impl StaticDictionaryLoader {
    /// Empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dictionary under its version.
    pub fn insert(&mut self, dictionary: MorphemeDictionary) {
        self.dictionaries.insert(dictionary.version().to_owned(), Arc::new(dictionary));
    }
}

impl DictionaryLoader for StaticDictionaryLoader {
    fn load(&self, version: &str) -> Result<Arc<MorphemeDictionary>> {
        self.dictionaries.get(version).cloned().ok_or_else(|| {
            PackageError::malformed(format!("unsupported dictionary version: {version}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dictionary() -> MorphemeDictionary {
        let entries = vec![
            MorphemeEntry {
                key: "construct:function".to_owned(),
                morpheme: "carda".to_owned(),
                kind: "construct".to_owned(),
            },
            MorphemeEntry {
                key: "op:add".to_owned(),
                morpheme: "napan".to_owned(),
                kind: "operator".to_owned(),
            },
            MorphemeEntry {
                key: UNKNOWN_MORPHEME_KEY.to_owned(),
                morpheme: "uvanwa".to_owned(),
                kind: "meta".to_owned(),
            },
        ];
        MorphemeDictionary::new("1.0", entries).unwrap()
    }

    #[test]
    fn missing_sentinel_is_rejected() {
        let entries = vec![MorphemeEntry {
            key: "op:add".to_owned(),
            morpheme: "napan".to_owned(),
            kind: "operator".to_owned(),
        }];
        assert!(MorphemeDictionary::new("1.0", entries).is_err());
    }

    #[test]
    fn key_lookups() {
        let dictionary = sample_dictionary();
        assert_eq!(dictionary.index_for_key("op:add", true).unwrap(), 1);
        assert_eq!(dictionary.key_for_index(0).unwrap(), "construct:function");
        assert!(dictionary.key_for_index(9).is_err());
    }

    #[test]
    fn lenient_mode_falls_back_to_sentinel() {
        let dictionary = sample_dictionary();
        assert_eq!(dictionary.index_for_key("op:mystery", false).unwrap(), 2);
        let err = dictionary.index_for_key("op:mystery", true).unwrap_err();
        assert!(matches!(err, PackageError::UnknownMorpheme { .. }));
    }

    #[test]
    fn token_keys_follow_stream_order() {
        let dictionary = sample_dictionary();
        let keys = dictionary.token_keys(&[1, 0, 2]).unwrap();
        assert_eq!(keys, vec!["op:add", "construct:function", UNKNOWN_MORPHEME_KEY]);
    }

    #[test]
    fn static_loader_round_trip() {
        let mut loader = StaticDictionaryLoader::new();
        loader.insert(sample_dictionary());
        assert!(loader.load("1.0").is_ok());
        assert!(loader.load("9.9").is_err());
    }
}
