//! Federated query router.
//!
//! Single-resource lookups ask the primary store first and only consult the
//! legacy store when the primary does not answer. Multi-result queries ask
//! both and merge, primary first.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use freyja_core::{Error, FileMetadataQuery, QueryService, Resource, ResourceId, Result};

use crate::merge::{merge_with_stats, order_by_ids};

/// [`QueryService`] composed of a primary and a legacy backend.
///
/// The router never writes to either backend.
#[derive(Clone)]
pub struct FederatedQueryService {
    primary: Arc<dyn QueryService>,
    legacy: Arc<dyn QueryService>,
}

impl FederatedQueryService {
    pub fn new(primary: Arc<dyn QueryService>, legacy: Arc<dyn QueryService>) -> Self {
        Self { primary, legacy }
    }

    pub fn primary(&self) -> &Arc<dyn QueryService> {
        &self.primary
    }

    pub fn legacy(&self) -> &Arc<dyn QueryService> {
        &self.legacy
    }

    /// Resolve a single-resource lookup from the two backend answers.
    ///
    /// `legacy` is only evaluated when the primary did not return a resource.
    async fn first_found<F>(
        &self,
        op: &'static str,
        key: &ResourceId,
        primary: Result<Resource>,
        legacy: F,
    ) -> Result<Resource>
    where
        F: std::future::Future<Output = Result<Resource>>,
    {
        let primary_err = match primary {
            Ok(resource) => {
                debug!(subsystem = "query", op, resource_id = %key, backend = "primary", "Resolved");
                return Ok(resource);
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(
                    subsystem = "query",
                    op,
                    resource_id = %key,
                    backend = self.primary.name(),
                    error = %e,
                    "Primary backend failed, falling back to legacy"
                );
                Some(e)
            }
        };

        match legacy.await {
            Ok(resource) => {
                debug!(subsystem = "query", op, resource_id = %key, backend = "legacy", "Resolved");
                Ok(resource)
            }
            Err(e) if e.is_not_found() => Err(primary_err.unwrap_or(e)),
            Err(e) => {
                warn!(
                    subsystem = "query",
                    op,
                    resource_id = %key,
                    backend = self.legacy.name(),
                    error = %e,
                    "Legacy backend failed"
                );
                Err(primary_err.unwrap_or(e))
            }
        }
    }

    /// Combine two multi-result answers. A failing backend contributes
    /// nothing; when both fail the primary error is returned.
    fn gather(
        &self,
        op: &'static str,
        started: Instant,
        primary: Result<Vec<Resource>>,
        legacy: Result<Vec<Resource>>,
    ) -> Result<Vec<Resource>> {
        let (primary, legacy) = match (primary, legacy) {
            (Ok(p), Ok(l)) => (p, l),
            (Ok(p), Err(e)) => {
                self.warn_partial(op, self.legacy.name(), &e);
                (p, Vec::new())
            }
            (Err(e), Ok(l)) => {
                self.warn_partial(op, self.primary.name(), &e);
                (Vec::new(), l)
            }
            (Err(pe), Err(le)) => {
                self.warn_partial(op, self.legacy.name(), &le);
                return Err(pe);
            }
        };

        let (merged, stats) = merge_with_stats(primary, legacy);
        debug!(
            subsystem = "query",
            op,
            result_count = merged.len(),
            primary = stats.primary,
            legacy_only = stats.legacy_only,
            shadowed = stats.shadowed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Merged federated results"
        );
        Ok(merged)
    }

    fn warn_partial(&self, op: &'static str, backend: &'static str, error: &Error) {
        warn!(
            subsystem = "query",
            op,
            backend,
            error = %error,
            "Backend failed, returning results from the other backend only"
        );
    }
}

#[async_trait]
impl QueryService for FederatedQueryService {
    fn name(&self) -> &'static str {
        "federated"
    }

    async fn find_by(&self, id: &ResourceId) -> Result<Resource> {
        let primary = self.primary.find_by(id).await;
        self.first_found("find_by", id, primary, self.legacy.find_by(id))
            .await
    }

    async fn find_by_alternate_identifier(&self, alternate_id: &ResourceId) -> Result<Resource> {
        let primary = self.primary.find_by_alternate_identifier(alternate_id).await;
        self.first_found(
            "find_by_alternate_identifier",
            alternate_id,
            primary,
            self.legacy.find_by_alternate_identifier(alternate_id),
        )
        .await
    }

    async fn find_many_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        let started = Instant::now();
        let (primary, legacy) = tokio::join!(
            self.primary.find_many_by_ids(ids),
            self.legacy.find_many_by_ids(ids)
        );
        self.gather("find_many_by_ids", started, primary, legacy)
    }

    async fn find_all(&self) -> Result<Vec<Resource>> {
        let started = Instant::now();
        let (primary, legacy) = tokio::join!(self.primary.find_all(), self.legacy.find_all());
        self.gather("find_all", started, primary, legacy)
    }

    async fn find_all_of_model(&self, model: &str) -> Result<Vec<Resource>> {
        let started = Instant::now();
        let (primary, legacy) = tokio::join!(
            self.primary.find_all_of_model(model),
            self.legacy.find_all_of_model(model)
        );
        self.gather("find_all_of_model", started, primary, legacy)
    }

    async fn find_members(&self, resource: &Resource) -> Result<Vec<Resource>> {
        let started = Instant::now();
        let (primary, legacy) = tokio::join!(
            self.primary.find_members(resource),
            self.legacy.find_members(resource)
        );
        let merged = self.gather("find_members", started, primary, legacy)?;
        Ok(order_by_ids(merged, &resource.member_ids))
    }

    async fn find_inverse_references_by(
        &self,
        id: &ResourceId,
        property: &str,
    ) -> Result<Vec<Resource>> {
        let started = Instant::now();
        let (primary, legacy) = tokio::join!(
            self.primary.find_inverse_references_by(id, property),
            self.legacy.find_inverse_references_by(id, property)
        );
        self.gather("find_inverse_references_by", started, primary, legacy)
    }

    async fn count_all_of_model(&self, model: &str) -> Result<usize> {
        Ok(self.find_all_of_model(model).await?.len())
    }
}

#[async_trait]
impl FileMetadataQuery for FederatedQueryService {
    /// File metadata records among `ids`, in `ids` order, from either backend.
    async fn find_many_file_metadata_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        let found = self.find_many_by_ids(ids).await?;
        let records = found
            .into_iter()
            .filter(|resource| resource.file_metadata().is_some())
            .collect();
        Ok(order_by_ids(records, ids))
    }
}
