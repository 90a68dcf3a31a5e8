//! Closed-set feature bits advertised by frame headers.
//!
//! The bit assignments are frozen: once a feature ships its index is never
//! reused. Decoders reject bits outside the closed set unless the caller
//! explicitly opted into them, which keeps old decoders from silently
//! misreading packages that depend on behaviour they do not implement.

use std::fmt;

use crate::errors::{FrameError, Result};

/// Known payload/compression features, by frozen bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Token stream was remapped by a frequency optimisation plan (bit 0)
    CompressionOptimisation,
    /// Compression section carries an extras JSON block (bit 1)
    CompressionExtras,
    /// Payload frame contains a source map section (bit 2)
    PayloadSourceMap,
    /// Token stream was coded with an FSE backend (bit 3)
    CompressionFse,
}

impl Feature {
    /// Every feature in the closed set, in bit order.
    pub const ALL: [Self; 4] = [
        Self::CompressionOptimisation,
        Self::CompressionExtras,
        Self::PayloadSourceMap,
        Self::CompressionFse,
    ];

    /// Frozen bit index for this feature.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::CompressionOptimisation => 0,
            Self::CompressionExtras => 1,
            Self::PayloadSourceMap => 2,
            Self::CompressionFse => 3,
        }
    }

    /// Stable wire name, as advertised in wrapper JSON.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CompressionOptimisation => "compression:optimisation",
            Self::CompressionExtras => "compression:extras",
            Self::PayloadSourceMap => "payload:source-map",
            Self::CompressionFse => "compression:fse",
        }
    }

    /// Look a feature up by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|feature| feature.name() == name)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of known features plus any unknown bits seen on the wire.
///
/// Unknown bits are preserved so the caller can decide whether they were
/// opted into; [`FeatureSet::ensure_known`] is the enforcement point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet {
    known: u32,
    unknown: u32,
}

impl FeatureSet {
    /// Empty feature set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { known: 0, unknown: 0 }
    }

    /// Build a set from an iterator of known features.
    pub fn from_features<I: IntoIterator<Item = Feature>>(features: I) -> Self {
        let mut set = Self::empty();
        for feature in features {
            set.insert(feature);
        }
        set
    }

    /// Split raw wire bits into known features and unknown leftovers.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        let mut known = 0;
        for feature in Feature::ALL {
            known |= 1 << feature.bit();
        }
        Self { known: bits & known, unknown: bits & !known }
    }

    /// Add a known feature.
    pub fn insert(&mut self, feature: Feature) {
        self.known |= 1 << feature.bit();
    }

    /// Whether the set contains `feature`.
    #[must_use]
    pub fn contains(&self, feature: Feature) -> bool {
        self.known & (1 << feature.bit()) != 0
    }

    /// Raw wire bits, including any unknown ones.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.known | self.unknown
    }

    /// Bits that fell outside the closed set when parsing.
    #[must_use]
    pub fn unknown_bits(&self) -> u32 {
        self.unknown
    }

    /// Sorted wire names of the known features present.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        Feature::ALL
            .into_iter()
            .filter(|feature| self.contains(*feature))
            .map(Feature::name)
            .collect()
    }

    /// Reject unknown bits the caller did not explicitly allow.
    ///
    /// `allowed_bits` is a mask of bit indices outside the closed set the
    /// caller accepts anyway (forward-compatibility escape hatch).
    ///
    /// # Errors
    ///
    /// `FrameError::UnknownFeature` carrying the disallowed bits.
    pub fn ensure_known(&self, allowed_bits: u32) -> Result<()> {
        let disallowed = self.unknown & !allowed_bits;
        if disallowed != 0 {
            return Err(FrameError::UnknownFeature { bits: disallowed });
        }
        Ok(())
    }
}
