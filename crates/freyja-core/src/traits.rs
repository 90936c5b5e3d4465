//! Core traits for Freyja collaborators.
//!
//! Every backend the migration layer touches is reached through one of these
//! traits and passed in explicitly at construction; nothing is looked up from
//! a global registry.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Readable content handed to a storage backend.
pub type ContentReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Byte stream produced by a content source.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

// =============================================================================
// QUERY TRAITS
// =============================================================================

/// Read access to a metadata backend.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Find one resource by id. Missing ids are `Error::NotFound`.
    async fn find_by(&self, id: &ResourceId) -> Result<Resource>;

    /// Find one resource by an alternate identifier.
    async fn find_by_alternate_identifier(&self, alternate_id: &ResourceId) -> Result<Resource>;

    /// Resources for the given ids; unknown ids are skipped.
    async fn find_many_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>>;

    /// Every resource.
    async fn find_all(&self) -> Result<Vec<Resource>>;

    /// Every resource of one model.
    async fn find_all_of_model(&self, model: &str) -> Result<Vec<Resource>>;

    /// Members of `resource`, in `member_ids` order.
    async fn find_members(&self, resource: &Resource) -> Result<Vec<Resource>>;

    /// Resources whose `property` references `id`.
    async fn find_inverse_references_by(
        &self,
        id: &ResourceId,
        property: &str,
    ) -> Result<Vec<Resource>>;

    /// Number of resources of one model.
    async fn count_all_of_model(&self, model: &str) -> Result<usize> {
        Ok(self.find_all_of_model(model).await?.len())
    }
}

#[async_trait]
impl<T: QueryService + ?Sized> QueryService for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn find_by(&self, id: &ResourceId) -> Result<Resource> {
        (**self).find_by(id).await
    }

    async fn find_by_alternate_identifier(&self, alternate_id: &ResourceId) -> Result<Resource> {
        (**self).find_by_alternate_identifier(alternate_id).await
    }

    async fn find_many_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        (**self).find_many_by_ids(ids).await
    }

    async fn find_all(&self) -> Result<Vec<Resource>> {
        (**self).find_all().await
    }

    async fn find_all_of_model(&self, model: &str) -> Result<Vec<Resource>> {
        (**self).find_all_of_model(model).await
    }

    async fn find_members(&self, resource: &Resource) -> Result<Vec<Resource>> {
        (**self).find_members(resource).await
    }

    async fn find_inverse_references_by(
        &self,
        id: &ResourceId,
        property: &str,
    ) -> Result<Vec<Resource>> {
        (**self).find_inverse_references_by(id, property).await
    }

    async fn count_all_of_model(&self, model: &str) -> Result<usize> {
        (**self).count_all_of_model(model).await
    }
}

/// File metadata lookup.
#[async_trait]
pub trait FileMetadataQuery: Send + Sync {
    /// File metadata resources for `ids`, in request order; unknown ids are
    /// skipped.
    async fn find_many_file_metadata_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>>;
}

/// Cheap "which of these ids exist" check against one backend.
#[async_trait]
pub trait ResourcePresence: Send + Sync {
    /// The subset of `ids` the backend holds.
    async fn find_present_ids(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>>;
}

/// [`ResourcePresence`] answered by a full query service.
pub struct QueryPresence<Q> {
    query: Q,
}

impl<Q: QueryService> QueryPresence<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }
}

#[async_trait]
impl<Q: QueryService> ResourcePresence for QueryPresence<Q> {
    async fn find_present_ids(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>> {
        let found = self.query.find_many_by_ids(ids).await?;
        Ok(found.into_iter().map(|r| r.id).collect())
    }
}

/// Write access to a metadata backend.
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    /// Insert or replace `resource`, returning the stored copy.
    async fn save(&self, resource: Resource) -> Result<Resource>;
}

// =============================================================================
// STORAGE TRAITS
// =============================================================================

/// Destination storage backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Store a primary file for a file set.
    async fn upload(&self, request: UploadRequest, content: ContentReader) -> Result<StoredFile>;

    /// Store one derivative under the container named by `directives`.
    async fn persist_derivative(
        &self,
        content: ContentReader,
        directives: DerivativeDirectives,
    ) -> Result<StoredFile>;
}

/// Lists the derivative files generated for a resource.
#[async_trait]
pub trait DerivativePathEnumerator: Send + Sync {
    async fn paths_for(&self, resource: &Resource) -> Result<Vec<PathBuf>>;
}

/// Source of bytes for files the legacy store still owns.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Whether the identifier is owned by this source.
    fn is_legacy(&self, file_identifier: &str) -> bool;

    /// Stream the bytes behind `file_identifier`.
    async fn open(&self, file_identifier: &str) -> Result<ContentStream>;
}

// =============================================================================
// MATERIALIZATION
// =============================================================================

/// Called for every resource the materializer produces.
///
/// Implementations report their outcome as a decision; they never fail the
/// read that caused the materialization.
#[async_trait]
pub trait MaterializationHook: Send + Sync {
    async fn on_materialize(&self, resource: &Resource) -> MigrationDecision;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Repository for job queue operations.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job.
    async fn queue(
        &self,
        resource_id: Option<ResourceId>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid>;

    /// Claim the next pending job whose type is in `job_types`.
    /// An empty slice means "claim any type".
    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Update job progress.
    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()>;

    /// Mark job as completed.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Record a failure. The job returns to pending until `max_retries` is
    /// exhausted.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Record a failure that must not be retried.
    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Get pending jobs count.
    async fn pending_count(&self) -> Result<i64>;
}
