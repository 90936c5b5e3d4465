//! HTTP reader for legacy-owned file content.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tracing::{debug, warn};

use freyja_core::{
    defaults, ContentSource, ContentStream, Error, LegacyLocatorConfig, Result,
};

/// Streams legacy file bytes by rewriting the identifier prefix into an
/// HTTP address.
#[derive(Clone)]
pub struct LegacyContentLocator {
    config: LegacyLocatorConfig,
    client: Client,
}

impl LegacyContentLocator {
    pub fn new(config: LegacyLocatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::LEGACY_FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { config, client })
    }

    /// Use an existing client (shared pools, custom TLS).
    pub fn with_client(config: LegacyLocatorConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &LegacyLocatorConfig {
        &self.config
    }
}

#[async_trait]
impl ContentSource for LegacyContentLocator {
    fn is_legacy(&self, file_identifier: &str) -> bool {
        self.config.is_legacy(file_identifier)
    }

    async fn open(&self, file_identifier: &str) -> Result<ContentStream> {
        let address = self.config.fetchable_address(file_identifier).ok_or_else(|| {
            Error::InvalidInput(format!("{} is not a legacy identifier", file_identifier))
        })?;

        debug!(
            subsystem = "migration",
            component = "locator",
            address = %address,
            "Fetching legacy content"
        );

        let response = self.client.get(&address).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                subsystem = "migration",
                component = "locator",
                address = %address,
                status = status.as_u16(),
                "Legacy store refused content request"
            );
            return Err(Error::Request(format!("GET {} returned {}", address, status)));
        }

        Ok(Box::pin(response.bytes_stream().map_err(Error::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_legacy_identifier_is_invalid_input() {
        let locator = LegacyContentLocator::new(LegacyLocatorConfig::default()).unwrap();
        assert!(!locator.is_legacy("disk:///var/freyja/f1.bin"));

        let err = match locator.open("disk:///var/freyja/f1.bin").await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
