//! File and derivative migration out of the legacy store.
//!
//! One run, for one file set:
//!
//! 1. mark the id in progress on this task ([`MigrationGuard`]) and load it
//! 2. persist every derivative file the enumerator knows about
//! 3. reload the file set, since derivatives attach new file ids
//! 4. copy every legacy-owned file into the destination backend
//!
//! Steps run in order. A failed item is recorded and its siblings continue;
//! the run then reports [`Error::PartialMigration`] so the job is retried.
//! Files whose identifier no longer carries the legacy prefix are skipped,
//! which makes repeated runs safe.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, trace, warn};

use freyja_core::{
    container_for, mime_type_for, ContentReader, ContentSource, DerivativeDirectives,
    DerivativePathEnumerator, Error, FileMetadataQuery, ItemFailure, JobType, MetadataWriter,
    MigrationGuard, Owner, QueryService, Resource, ResourceId, Result, StorageAdapter,
    UploadRequest,
};
use freyja_db::FilesystemStorage;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub resource_id: ResourceId,
    /// Derivative files persisted.
    pub derivatives_migrated: usize,
    /// Legacy file ids that were copied and removed from the file set.
    pub migrated_file_ids: Vec<ResourceId>,
    /// Ids of the files written to the destination.
    pub stored_file_ids: Vec<ResourceId>,
    /// File records left alone because the legacy store no longer owns them.
    pub skipped_files: usize,
    pub failures: Vec<ItemFailure>,
    /// File ids on the file set after the run.
    pub remaining_file_ids: Vec<ResourceId>,
}

impl MigrationReport {
    fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            derivatives_migrated: 0,
            migrated_file_ids: Vec::new(),
            stored_file_ids: Vec::new(),
            skipped_files: 0,
            failures: Vec::new(),
            remaining_file_ids: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, item: impl Into<String>, error: &Error) {
        self.failures.push(ItemFailure {
            item: item.into(),
            reason: error.to_string(),
        });
    }
}

/// Moves one file set's files and derivatives into the destination backend.
///
/// Every collaborator is passed in; nothing is looked up globally.
pub struct MigrationWorker {
    query: Arc<dyn QueryService>,
    files: Arc<dyn FileMetadataQuery>,
    storage: Arc<dyn StorageAdapter>,
    derivatives: Arc<dyn DerivativePathEnumerator>,
    content: Arc<dyn ContentSource>,
}

impl MigrationWorker {
    pub fn new(
        query: Arc<dyn QueryService>,
        files: Arc<dyn FileMetadataQuery>,
        storage: Arc<dyn StorageAdapter>,
        derivatives: Arc<dyn DerivativePathEnumerator>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            query,
            files,
            storage,
            derivatives,
            content,
        }
    }

    /// Worker writing into a filesystem destination.
    ///
    /// `reads` answers every lookup of the run, including the file set the
    /// storage backend reloads when it attaches a derivative. A file set that
    /// only the legacy store knows must resolve there, so pass the federated
    /// router when a legacy store is configured. New records go to `writer`.
    pub fn with_filesystem<R>(
        reads: Arc<R>,
        writer: Arc<dyn MetadataWriter>,
        storage: FilesystemStorage,
        derivatives: Arc<dyn DerivativePathEnumerator>,
        content: Arc<dyn ContentSource>,
    ) -> Self
    where
        R: QueryService + FileMetadataQuery + 'static,
    {
        let storage = storage.with_metadata(reads.clone(), writer);
        Self::new(reads.clone(), reads, Arc::new(storage), derivatives, content)
    }

    /// Migrate `id`, guarded against re-entrant triggers for the duration.
    ///
    /// Returns the report when every item succeeded and
    /// [`Error::PartialMigration`] otherwise.
    #[instrument(skip(self), fields(subsystem = "migration", resource_id = %id))]
    pub async fn migrate(&self, id: &ResourceId) -> Result<MigrationReport> {
        let start = Instant::now();
        let report = MigrationGuard::scope(id.clone(), self.run(id)).await?;

        info!(
            subsystem = "migration",
            op = "migrate",
            resource_id = %id,
            derivative_count = report.derivatives_migrated,
            file_count = report.migrated_file_ids.len(),
            skipped = report.skipped_files,
            failures = report.failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Migration run finished"
        );

        if report.is_complete() {
            Ok(report)
        } else {
            Err(Error::PartialMigration {
                resource_id: id.clone(),
                failures: report.failures,
            })
        }
    }

    async fn run(&self, id: &ResourceId) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(id.clone());

        let resource = self.query.find_by(id).await?;
        self.migrate_derivatives(&resource, &mut report).await?;

        let mut resource = self.query.find_by(id).await?;
        self.migrate_files(&mut resource, &mut report).await?;

        report.remaining_file_ids = resource.file_ids().map(<[_]>::to_vec).unwrap_or_default();
        Ok(report)
    }

    async fn migrate_derivatives(
        &self,
        resource: &Resource,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let paths = self.derivatives.paths_for(resource).await?;
        debug!(
            subsystem = "migration",
            op = "derivatives",
            resource_id = %resource.id,
            derivative_count = paths.len(),
            "Migrating derivatives"
        );

        for path in paths {
            match self.persist_derivative(&resource.id, &path).await {
                Ok(()) => report.derivatives_migrated += 1,
                Err(e) => {
                    warn!(
                        subsystem = "migration",
                        op = "derivatives",
                        resource_id = %resource.id,
                        path = %path.display(),
                        error = %e,
                        "Derivative migration failed"
                    );
                    report.record_failure(path.display().to_string(), &e);
                }
            }
        }
        Ok(())
    }

    async fn persist_derivative(&self, file_set_id: &ResourceId, path: &Path) -> Result<()> {
        let directives = DerivativeDirectives {
            file_set_id: file_set_id.clone(),
            url: path.to_path_buf(),
            container: container_for(path),
            mime_type: mime_type_for(path).to_string(),
        };
        let content: ContentReader = Box::new(fs::File::open(path).await?);

        let stored = self.storage.persist_derivative(content, directives).await?;
        trace!(
            subsystem = "migration",
            op = "derivatives",
            resource_id = %file_set_id,
            path = %path.display(),
            file_id = %stored.id,
            "Persisted derivative"
        );
        Ok(())
    }

    async fn migrate_files(
        &self,
        resource: &mut Resource,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let Some(file_ids) = resource.file_ids().map(<[_]>::to_vec) else {
            return Ok(());
        };
        let records = self.files.find_many_file_metadata_by_ids(&file_ids).await?;

        for record in records {
            let Some(metadata) = record.file_metadata() else {
                continue;
            };
            if !self.content.is_legacy(&metadata.file_identifier) {
                report.skipped_files += 1;
                continue;
            }

            resource.remove_file_id(&record.id);

            let request = UploadRequest {
                file_set: resource.clone(),
                filename: resource
                    .label
                    .clone()
                    .unwrap_or_else(|| metadata.original_filename.clone()),
                uses: metadata.uses(),
                owner: resource.depositor.as_deref().map(Owner::new),
                mime_type: metadata.mime_type.clone(),
                skip_derivatives: true,
            };

            let uploaded = match self.buffer(&metadata.file_identifier).await {
                Ok(content) => self.storage.upload(request, content).await,
                Err(e) => Err(e),
            };

            match uploaded {
                Ok(stored) => {
                    trace!(
                        subsystem = "migration",
                        op = "files",
                        resource_id = %resource.id,
                        file_id = %record.id,
                        stored_id = %stored.id,
                        size_bytes = stored.size,
                        "Migrated file"
                    );
                    resource.add_file_id(stored.id.clone());
                    report.migrated_file_ids.push(record.id.clone());
                    report.stored_file_ids.push(stored.id);
                }
                Err(e) => {
                    warn!(
                        subsystem = "migration",
                        op = "files",
                        resource_id = %resource.id,
                        file_id = %record.id,
                        error = %e,
                        "File migration failed"
                    );
                    resource.add_file_id(record.id.clone());
                    report.record_failure(record.id.to_string(), &e);
                }
            }
        }
        Ok(())
    }

    /// Copy a legacy file into an anonymous temp file, rewound for reading.
    async fn buffer(&self, file_identifier: &str) -> Result<ContentReader> {
        let mut stream = self.content.open(file_identifier).await?;
        let mut file = fs::File::from_std(tempfile::tempfile()?);

        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.rewind().await?;

        Ok(Box::new(file))
    }
}

/// Job handler running [`MigrationWorker`] for `MigrateFiles` jobs.
pub struct MigrateFilesHandler {
    worker: Arc<MigrationWorker>,
}

impl MigrateFilesHandler {
    pub fn new(worker: Arc<MigrationWorker>) -> Self {
        Self { worker }
    }

    /// The resource id a job targets: payload first, then the job column.
    fn target(ctx: &JobContext) -> Option<ResourceId> {
        ctx.payload()
            .and_then(|p| p.get("resource_id"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(ResourceId::new)
            .or_else(|| ctx.resource_id().cloned())
    }
}

#[async_trait]
impl JobHandler for MigrateFilesHandler {
    fn job_type(&self) -> JobType {
        JobType::MigrateFiles
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(id) = Self::target(&ctx) else {
            return JobResult::Failed("MigrateFiles job has no resource_id".to_string());
        };

        ctx.report_progress(0, Some("Migrating files"));
        match self.worker.migrate(&id).await {
            Ok(report) => {
                ctx.report_progress(100, Some("Migration complete"));
                match serde_json::to_value(&report) {
                    Ok(value) => JobResult::Success(Some(value)),
                    Err(e) => JobResult::Success(Some(serde_json::json!({
                        "resource_id": id.as_str(),
                        "report_error": e.to_string(),
                    }))),
                }
            }
            Err(e @ Error::PartialMigration { .. }) => JobResult::Retry(e.to_string()),
            Err(e) if e.is_not_found() => JobResult::Failed(e.to_string()),
            Err(e) => JobResult::Retry(format!("Migration error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_job;
    use serde_json::json;

    #[test]
    fn test_handler_target_prefers_payload() {
        let ctx = JobContext::new(test_job(Some("fs-col"), Some(json!({"resource_id": "fs-1"}))));
        assert_eq!(MigrateFilesHandler::target(&ctx), Some(ResourceId::new("fs-1")));

        let ctx = JobContext::new(test_job(Some("fs-col"), Some(json!({}))));
        assert_eq!(MigrateFilesHandler::target(&ctx), Some(ResourceId::new("fs-col")));

        let ctx = JobContext::new(test_job(None, Some(json!({"resource_id": ""}))));
        assert_eq!(MigrateFilesHandler::target(&ctx), None);
    }

    #[test]
    fn test_report_serializes_failures() {
        let mut report = MigrationReport::new("fs-1".into());
        report.record_failure("f1", &Error::Request("404".to_string()));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["resource_id"], "fs-1");
        assert_eq!(value["failures"][0]["item"], "f1");
        assert!(!report.is_complete());
    }
}
