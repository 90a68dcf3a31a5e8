//! Declarative resource caps enforced while decoding untrusted packages.
//!
//! Every length read during decode is checked here *before* the matching
//! allocation, so a forged package fails fast instead of exhausting
//! memory. The budget is an explicit parameter on decode entry points;
//! there is no process-wide default to mutate.

use crate::errors::{PackageError, Result};
use crate::model::CompressionModel;

/// Allocation caps applied during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Maximum declared symbol count
    pub max_symbols: u64,
    /// Maximum serialized model size estimate in bytes
    pub max_model_bytes: u64,
    /// Maximum compressed token blob size in bytes
    pub max_compressed_bytes: u64,
    /// Maximum serialized string table size in bytes
    pub max_string_table_bytes: u64,
    /// Maximum payload section / decrypted frame size in bytes
    pub max_payload_bytes: u64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_symbols: 10_000_000,
            max_model_bytes: 4_000_000,
            max_compressed_bytes: 64_000_000,
            max_string_table_bytes: 64_000_000,
            max_payload_bytes: 64_000_000,
        }
    }
}

impl Budget {
    fn check(field: &'static str, actual: u64, cap: u64) -> Result<()> {
        if actual > cap {
            return Err(PackageError::ResourceBudgetExceeded { field, actual, cap });
        }
        Ok(())
    }

    /// Validate a declared symbol count.
    pub fn ensure_symbols(&self, count: u64) -> Result<()> {
        Self::check("symbols", count, self.max_symbols)
    }

    /// Validate a compressed blob length.
    pub fn ensure_compressed(&self, size: u64) -> Result<()> {
        Self::check("compressed_bytes", size, self.max_compressed_bytes)
    }

    /// Validate the estimated in-memory size of a compression model.
    pub fn ensure_model(&self, model: &CompressionModel) -> Result<()> {
        Self::check("model_bytes", model.estimated_size(), self.max_model_bytes)
    }

    /// Validate a serialized string table length.
    pub fn ensure_string_table(&self, size: u64) -> Result<()> {
        Self::check("string_table_bytes", size, self.max_string_table_bytes)
    }

    /// Validate a payload section or decrypted payload frame length.
    pub fn ensure_payload_bytes(&self, size: u64) -> Result<()> {
        Self::check("payload_bytes", size, self.max_payload_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_caps() {
        let budget = Budget::default();
        assert_eq!(budget.max_symbols, 10_000_000);
        assert_eq!(budget.max_model_bytes, 4_000_000);
        assert_eq!(budget.max_compressed_bytes, 64_000_000);
        assert_eq!(budget.max_string_table_bytes, 64_000_000);
        assert_eq!(budget.max_payload_bytes, 64_000_000);
    }

    #[test]
    fn exceeding_a_cap_names_the_field() {
        let budget = Budget::default();
        let err = budget.ensure_symbols(20_000_000).unwrap_err();
        assert_eq!(err, PackageError::ResourceBudgetExceeded {
            field: "symbols",
            actual: 20_000_000,
            cap: 10_000_000,
        });
    }

    #[test]
    fn at_cap_is_allowed() {
        let budget = Budget::default();
        assert!(budget.ensure_symbols(10_000_000).is_ok());
        assert!(budget.ensure_payload_bytes(64_000_000).is_ok());
    }

    #[test]
    fn caps_are_configurable() {
        let budget = Budget { max_string_table_bytes: 16, ..Budget::default() };
        assert!(budget.ensure_string_table(16).is_ok());
        assert!(matches!(
            budget.ensure_string_table(17),
            Err(PackageError::ResourceBudgetExceeded { field: "string_table_bytes", .. })
        ));
    }
}
