//! Migration configuration.

use std::path::PathBuf;

use crate::defaults;
use crate::error::Result;
use crate::legacy::LegacyLocatorConfig;
use crate::models::MigrationPolicy;

/// Settings shared by the trigger and the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// How much of a file set must exist in the destination to skip migration.
    pub policy: MigrationPolicy,
    /// Legacy identifier prefix and rewrite.
    pub legacy: LegacyLocatorConfig,
    /// Root the derivative enumerator scans.
    pub derivatives_path: PathBuf,
    /// Root of the filesystem destination backend.
    pub storage_path: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            policy: MigrationPolicy::default(),
            legacy: LegacyLocatorConfig::default(),
            derivatives_path: PathBuf::from(defaults::DERIVATIVES_PATH),
            storage_path: PathBuf::from(defaults::STORAGE_PATH),
        }
    }
}

impl MigrationConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FREYJA_MIGRATION_POLICY` | `any` | `any` or `all` |
    /// | `FREYJA_LEGACY_PREFIX` | `fedora:` | Legacy identifier prefix |
    /// | `FREYJA_LEGACY_REWRITE` | `http:` | Replacement scheme for fetching |
    /// | `FREYJA_DERIVATIVES_PATH` | `./storage/derivatives` | Derivatives root |
    /// | `FREYJA_STORAGE_PATH` | `./storage/files` | Filesystem storage root |
    ///
    /// An unrecognised policy is a configuration error rather than a silent
    /// fallback.
    pub fn from_env() -> Result<Self> {
        let policy = match std::env::var(defaults::ENV_MIGRATION_POLICY) {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => MigrationPolicy::default(),
        };

        let derivatives_path = std::env::var(defaults::ENV_DERIVATIVES_PATH)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults::DERIVATIVES_PATH.to_string());

        let storage_path = std::env::var(defaults::ENV_STORAGE_PATH)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults::STORAGE_PATH.to_string());

        Ok(Self {
            policy,
            legacy: LegacyLocatorConfig::from_env(),
            derivatives_path: derivatives_path.into(),
            storage_path: storage_path.into(),
        })
    }

    pub fn with_policy(mut self, policy: MigrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_legacy(mut self, legacy: LegacyLocatorConfig) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn with_derivatives_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.derivatives_path = path.into();
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }
}
