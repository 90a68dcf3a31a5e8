//! Token alphabet optimisation prior to entropy coding.
//!
//! Dictionary indices are sparse; remapping them onto a dense alphabet
//! ordered by descending frequency tightens the entropy model. The plan
//! is recorded in the compression extras so the decoder can reverse it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{PackageError, Result};

/// Wire name of the frequency-dense strategy.
pub const FREQUENCY_DENSE_STRATEGY: &str = "frequency-dense";

/// Mapping between original dictionary indices and dense ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOptimisationPlan {
    /// Strategy name recorded in metadata
    pub strategy: String,
    /// Dense rank to original index, descending by frequency
    pub dense_to_original: Vec<u32>,
    original_to_dense: BTreeMap<u32, u32>,
}

/// Serialisable form of a plan, stored in compression extras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Strategy name
    pub strategy: String,
    /// Dense rank to original index
    pub dense_to_original: Vec<u32>,
}

impl TokenOptimisationPlan {
    fn from_palette(strategy: String, dense_to_original: Vec<u32>) -> Self {
        let original_to_dense = dense_to_original
            .iter()
            .enumerate()
            .map(|(dense, &original)| (original, dense as u32))
            .collect();
        Self { strategy, dense_to_original, original_to_dense }
    }

    /// Dense alphabet size; never zero so an empty plan still yields a
    /// codable alphabet.
    #[must_use]
    pub fn alphabet_size(&self) -> usize {
        self.dense_to_original.len().max(1)
    }

    /// Remap `tokens` into the dense alphabet.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a token was not present in the
    /// stream the plan was built from.
    pub fn apply(&self, tokens: &[u32]) -> Result<Vec<u32>> {
        tokens
            .iter()
            .map(|token| {
                self.original_to_dense.get(token).copied().ok_or_else(|| {
                    PackageError::malformed(format!("token {token} absent from optimisation plan"))
                })
            })
            .collect()
    }

    /// Map dense tokens back to their original dictionary indices.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a dense rank falls outside the plan.
    pub fn restore(&self, tokens: &[u32]) -> Result<Vec<u32>> {
        tokens
            .iter()
            .map(|&token| {
                self.dense_to_original.get(token as usize).copied().ok_or_else(|| {
                    PackageError::malformed(format!("dense token {token} outside plan alphabet"))
                })
            })
            .collect()
    }

    /// Serialisable plan metadata.
    #[must_use]
    pub fn to_metadata(&self) -> PlanMetadata {
        PlanMetadata {
            strategy: self.strategy.clone(),
            dense_to_original: self.dense_to_original.clone(),
        }
    }

    /// Rebuild a plan from stored metadata.
    #[must_use]
    pub fn from_metadata(metadata: &PlanMetadata) -> Self {
        Self::from_palette(metadata.strategy.clone(), metadata.dense_to_original.clone())
    }
}

/// Build a frequency-dense plan from a token stream, sorting symbols by
/// `(-count, symbol)`. Returns `None` for an empty stream.
#[must_use]
pub fn build_frequency_plan(tokens: &[u32]) -> Option<TokenOptimisationPlan> {
    if tokens.is_empty() {
        return None;
    }
    let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
    for &token in tokens {
        *counts.entry(token).or_insert(0) += 1;
    }
    let mut ordered: Vec<(u32, u64)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let palette = ordered.into_iter().map(|(symbol, _)| symbol).collect();
    Some(TokenOptimisationPlan::from_palette(FREQUENCY_DENSE_STRATEGY.to_owned(), palette))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn plan_orders_by_count_then_symbol() {
        let plan = build_frequency_plan(&[7, 3, 3, 9, 9, 1]).unwrap();
        // 3 and 9 tie at two occurrences; the lower symbol ranks first.
        assert_eq!(plan.dense_to_original, vec![3, 9, 1, 7]);
        assert_eq!(plan.alphabet_size(), 4);
    }

    #[test]
    fn empty_stream_has_no_plan() {
        assert!(build_frequency_plan(&[]).is_none());
    }

    #[test]
    fn apply_then_restore_is_identity() {
        let tokens = vec![5, 5, 2, 9, 5, 2];
        let plan = build_frequency_plan(&tokens).unwrap();
        let dense = plan.apply(&tokens).unwrap();
        assert!(dense.iter().all(|&t| (t as usize) < plan.alphabet_size()));
        assert_eq!(plan.restore(&dense).unwrap(), tokens);
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let plan = build_frequency_plan(&[1, 2]).unwrap();
        assert!(plan.apply(&[3]).is_err());
        assert!(plan.restore(&[9]).is_err());
    }

    #[test]
    fn metadata_round_trip() {
        let plan = build_frequency_plan(&[4, 4, 4, 2]).unwrap();
        let rebuilt = TokenOptimisationPlan::from_metadata(&plan.to_metadata());
        assert_eq!(rebuilt, plan);
    }

    proptest! {
        #[test]
        fn restore_inverts_apply(tokens in prop::collection::vec(0u32..64, 1..256)) {
            let plan = build_frequency_plan(&tokens).unwrap();
            let dense = plan.apply(&tokens).unwrap();
            prop_assert_eq!(plan.restore(&dense).unwrap(), tokens);
        }
    }
}
