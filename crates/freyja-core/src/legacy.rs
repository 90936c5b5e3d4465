//! Legacy store ownership test and address rewriting.
//!
//! A file identifier such as `fedora://repo:8080/rest/prod/ab/cd/f1` is owned
//! by the legacy store. Fetching it means swapping the prefix for a scheme the
//! HTTP client understands. Everything else in a file identifier is opaque.

use crate::defaults;

/// Prefix convention for legacy-owned file identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLocatorConfig {
    /// Identifier prefix marking legacy ownership.
    pub prefix: String,
    /// Replacement for `prefix` that yields a fetchable address.
    pub rewrite: String,
}

impl Default for LegacyLocatorConfig {
    fn default() -> Self {
        Self {
            prefix: defaults::LEGACY_PREFIX.to_string(),
            rewrite: defaults::LEGACY_REWRITE.to_string(),
        }
    }
}

impl LegacyLocatorConfig {
    pub fn new(prefix: impl Into<String>, rewrite: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            rewrite: rewrite.into(),
        }
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FREYJA_LEGACY_PREFIX` | `fedora:` |
    /// | `FREYJA_LEGACY_REWRITE` | `http:` |
    pub fn from_env() -> Self {
        let prefix = std::env::var(defaults::ENV_LEGACY_PREFIX)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults::LEGACY_PREFIX.to_string());
        let rewrite = std::env::var(defaults::ENV_LEGACY_REWRITE)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults::LEGACY_REWRITE.to_string());
        Self { prefix, rewrite }
    }

    /// Whether the legacy store still owns the bytes behind this identifier.
    pub fn is_legacy(&self, file_identifier: &str) -> bool {
        !self.prefix.is_empty() && file_identifier.starts_with(&self.prefix)
    }

    /// Network address for a legacy identifier, `None` when not legacy-owned.
    pub fn fetchable_address(&self, file_identifier: &str) -> Option<String> {
        file_identifier
            .strip_prefix(self.prefix.as_str())
            .filter(|_| !self.prefix.is_empty())
            .map(|rest| format!("{}{}", self.rewrite, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_prefix_test() {
        let config = LegacyLocatorConfig::default();
        assert!(config.is_legacy("fedora://repo:8080/rest/f1"));
        assert!(!config.is_legacy("disk:///var/files/f1"));
        assert!(!config.is_legacy("s3://bucket/f1"));
        assert!(!config.is_legacy("http://repo/fedora:/f1"));
        assert!(!config.is_legacy(""));
    }

    #[test]
    fn fetchable_address_rewrites_only_the_prefix() {
        let config = LegacyLocatorConfig::default();
        assert_eq!(
            config.fetchable_address("fedora://repo:8080/rest/fedora:x"),
            Some("http://repo:8080/rest/fedora:x".to_string())
        );
        assert_eq!(config.fetchable_address("disk:///f1"), None);
    }

    #[test]
    fn custom_prefix_and_rewrite() {
        let config = LegacyLocatorConfig::new("legacy:", "https://legacy.example.org/");
        assert!(config.is_legacy("legacy:store/f1"));
        assert_eq!(
            config.fetchable_address("legacy:store/f1"),
            Some("https://legacy.example.org/store/f1".to_string())
        );
        assert!(!config.is_legacy("new:store/f2"));
    }

    #[test]
    fn empty_prefix_never_matches() {
        let config = LegacyLocatorConfig::new("", "http:");
        assert!(!config.is_legacy("anything"));
        assert_eq!(config.fetchable_address("anything"), None);
    }
}
