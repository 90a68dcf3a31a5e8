//! Compression configuration presets.
//!
//! Three user-facing modes trade size against determinism and isolation:
//! `balanced` is the default, `maximum` leans on project-wide statistics,
//! and `security` disables cross-file statistical coupling entirely.

use crate::backend::BackendOptions;
use crate::errors::{PackageError, Result};
use crate::model::ModelMode;

/// User-facing compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Balance size and determinism
    Balanced,
    /// Aggressively compress with project-wide statistics
    Maximum,
    /// Prioritise cryptographic isolation over compression
    Security,
}

impl CompressionMode {
    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Maximum => "maximum",
            Self::Security => "security",
        }
    }
}

/// Token optimisation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOptimisation {
    /// Build a plan from this package's tokens
    Local,
    /// Use a caller-provided project-wide plan
    Project,
    /// Identity plan; no remapping
    Disabled,
}

/// Options controlling the compression pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Preset mode
    pub mode: CompressionMode,
    /// Backend name
    pub backend: String,
    /// Model construction mode
    pub model_mode: ModelMode,
    /// Backend tuning knobs
    pub backend_options: BackendOptions,
    /// Token optimisation policy
    pub token_optimisation: TokenOptimisation,
    /// Whether a project-shared string table is expected
    pub shared_string_table: bool,
    /// Whether project-wide planning applies
    pub project_scope: bool,
    /// Human-readable description
    pub description: &'static str,
}

impl CompressionConfig {
    /// Preset for a mode.
    #[must_use]
    pub fn preset(mode: CompressionMode) -> Self {
        match mode {
            CompressionMode::Balanced => Self {
                mode,
                backend: "fse-production".to_owned(),
                model_mode: ModelMode::Adaptive,
                backend_options: BackendOptions {
                    table_log: Some(12),
                    ..BackendOptions::default()
                },
                token_optimisation: TokenOptimisation::Local,
                shared_string_table: false,
                project_scope: false,
                description: "Default mode balancing size and determinism.",
            },
            CompressionMode::Maximum => Self {
                mode,
                backend: "chunked-rans".to_owned(),
                model_mode: ModelMode::Adaptive,
                backend_options: BackendOptions {
                    precision_bits: Some(14),
                    chunk_size: Some(32_768),
                    ..BackendOptions::default()
                },
                token_optimisation: TokenOptimisation::Project,
                shared_string_table: true,
                project_scope: true,
                description: "Aggressively compress using project-wide statistics.",
            },
            CompressionMode::Security => Self {
                mode,
                backend: "fse-production".to_owned(),
                model_mode: ModelMode::Adaptive,
                backend_options: BackendOptions {
                    table_log: Some(11),
                    ..BackendOptions::default()
                },
                token_optimisation: TokenOptimisation::Disabled,
                shared_string_table: false,
                project_scope: false,
                description: "Prioritise cryptographic isolation over compression.",
            },
        }
    }

    /// Parse a mode name into its preset.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` on an unknown mode name.
    pub fn from_mode_name(name: &str) -> Result<Self> {
        match name {
            "balanced" => Ok(Self::preset(CompressionMode::Balanced)),
            "maximum" => Ok(Self::preset(CompressionMode::Maximum)),
            "security" => Ok(Self::preset(CompressionMode::Security)),
            other => Err(PackageError::malformed(format!("unknown compression mode: {other}"))),
        }
    }

    /// The same config with a different backend.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>, options: BackendOptions) -> Self {
        self.backend = backend.into();
        self.backend_options = options;
        self
    }

    /// The same config with a different model mode.
    #[must_use]
    pub fn with_model_mode(mut self, model_mode: ModelMode) -> Self {
        self.model_mode = model_mode;
        self
    }

    /// Whether this config expects project-wide shared state.
    #[must_use]
    pub fn wants_project_planning(&self) -> bool {
        self.project_scope
            || self.token_optimisation == TokenOptimisation::Project
            || self.shared_string_table
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::preset(CompressionMode::Balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_documented_policies() {
        let balanced = CompressionConfig::preset(CompressionMode::Balanced);
        assert_eq!(balanced.backend, "fse-production");
        assert_eq!(balanced.backend_options.table_log, Some(12));
        assert_eq!(balanced.token_optimisation, TokenOptimisation::Local);

        let maximum = CompressionConfig::preset(CompressionMode::Maximum);
        assert_eq!(maximum.backend, "chunked-rans");
        assert_eq!(maximum.backend_options.precision_bits, Some(14));
        assert_eq!(maximum.backend_options.chunk_size, Some(32_768));
        assert!(maximum.wants_project_planning());

        let security = CompressionConfig::preset(CompressionMode::Security);
        assert_eq!(security.token_optimisation, TokenOptimisation::Disabled);
        assert_eq!(security.backend_options.table_log, Some(11));
        assert!(!security.wants_project_planning());
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(
            CompressionConfig::from_mode_name("maximum").unwrap().mode,
            CompressionMode::Maximum
        );
        assert!(CompressionConfig::from_mode_name("turbo").is_err());
    }

    #[test]
    fn with_backend_overrides_preset() {
        let config = CompressionConfig::default()
            .with_backend("rans", BackendOptions::default())
            .with_model_mode(ModelMode::Static);
        assert_eq!(config.backend, "rans");
        assert_eq!(config.model_mode, ModelMode::Static);
        assert_eq!(config.mode, CompressionMode::Balanced);
    }
}
