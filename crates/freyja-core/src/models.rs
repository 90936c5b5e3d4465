//! Core data models for Freyja.
//!
//! A [`Resource`] is the domain object every query service returns. Its
//! [`ResourceKind`] is a tagged variant, so callers ask for a capability
//! (`file_ids()`, `file_metadata()`) instead of checking a runtime type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque, globally unique resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(crate::uuid_utils::new_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// USE TAGS
// =============================================================================

/// Semantic classification of a stored file.
///
/// The vocabulary is fixed; strings outside of it are dropped when a file is
/// re-uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseTag {
    OriginalFile,
    ThumbnailImage,
    ExtractedText,
    ServiceFile,
    PreservationFile,
    IntermediateFile,
    Transcript,
}

impl UseTag {
    /// Every tag in the vocabulary.
    pub const ALL: [UseTag; 7] = [
        UseTag::OriginalFile,
        UseTag::ThumbnailImage,
        UseTag::ExtractedText,
        UseTag::ServiceFile,
        UseTag::PreservationFile,
        UseTag::IntermediateFile,
        UseTag::Transcript,
    ];

    /// PCDM use URI.
    pub fn uri(self) -> &'static str {
        match self {
            UseTag::OriginalFile => "http://pcdm.org/use#OriginalFile",
            UseTag::ThumbnailImage => "http://pcdm.org/use#ThumbnailImage",
            UseTag::ExtractedText => "http://pcdm.org/use#ExtractedText",
            UseTag::ServiceFile => "http://pcdm.org/use#ServiceFile",
            UseTag::PreservationFile => "http://pcdm.org/use#PreservationFile",
            UseTag::IntermediateFile => "http://pcdm.org/use#IntermediateFile",
            UseTag::Transcript => "http://pcdm.org/use#Transcript",
        }
    }

    /// Container name used by derivative persistence.
    pub fn container(self) -> &'static str {
        match self {
            UseTag::OriginalFile => "original_file",
            UseTag::ThumbnailImage => "thumbnail_image",
            UseTag::ExtractedText => "extracted_text",
            UseTag::ServiceFile => "service_file",
            UseTag::PreservationFile => "preservation_file",
            UseTag::IntermediateFile => "intermediate_file",
            UseTag::Transcript => "transcript",
        }
    }

    /// Parse either the URI or the container form. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|tag| tag.uri() == value || tag.container() == value)
    }
}

impl fmt::Display for UseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Model names as persisted in `internal_resource`.
pub const MODEL_WORK: &str = "work";
pub const MODEL_COLLECTION: &str = "collection";
pub const MODEL_FILE_SET: &str = "file_set";
pub const MODEL_FILE_METADATA: &str = "file_metadata";

/// Metadata describing one stored binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Location of the bytes; the scheme prefix names the owning store.
    pub file_identifier: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Raw use strings as recorded; may contain values outside the vocabulary.
    #[serde(default)]
    pub pcdm_use: Vec<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileMetadata {
    pub fn new(file_identifier: impl Into<String>, original_filename: impl Into<String>) -> Self {
        Self {
            file_identifier: file_identifier.into(),
            original_filename: original_filename.into(),
            mime_type: None,
            pcdm_use: Vec::new(),
            size: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_use(mut self, value: impl Into<String>) -> Self {
        self.pcdm_use.push(value.into());
        self
    }

    /// Recorded uses restricted to the fixed vocabulary, first occurrence wins.
    pub fn uses(&self) -> Vec<UseTag> {
        let mut uses = Vec::new();
        for tag in self.pcdm_use.iter().filter_map(|u| UseTag::parse(u)) {
            if !uses.contains(&tag) {
                uses.push(tag);
            }
        }
        uses
    }
}

/// Variant data per resource model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ResourceKind {
    Work,
    Collection,
    FileSet {
        #[serde(default)]
        file_ids: Vec<ResourceId>,
    },
    FileMetadata(FileMetadata),
    Other {
        name: String,
    },
}

impl ResourceKind {
    /// Persisted model name.
    pub fn model_name(&self) -> &str {
        match self {
            ResourceKind::Work => MODEL_WORK,
            ResourceKind::Collection => MODEL_COLLECTION,
            ResourceKind::FileSet { .. } => MODEL_FILE_SET,
            ResourceKind::FileMetadata(_) => MODEL_FILE_METADATA,
            ResourceKind::Other { name } => name.as_str(),
        }
    }
}

/// A materialized domain resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub alternate_ids: Vec<ResourceId>,
    #[serde(default)]
    pub member_ids: Vec<ResourceId>,
    #[serde(default)]
    pub label: Option<String>,
    /// User key of the depositor.
    #[serde(default)]
    pub depositor: Option<String>,
    pub kind: ResourceKind,
    /// Model attributes this layer does not interpret.
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            alternate_ids: Vec::new(),
            member_ids: Vec::new(),
            label: None,
            depositor: None,
            kind,
            attributes: Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn work(id: impl Into<ResourceId>) -> Self {
        Self::new(id, ResourceKind::Work)
    }

    pub fn file_set(id: impl Into<ResourceId>, file_ids: Vec<ResourceId>) -> Self {
        Self::new(id, ResourceKind::FileSet { file_ids })
    }

    pub fn file_metadata_record(id: impl Into<ResourceId>, metadata: FileMetadata) -> Self {
        Self::new(id, ResourceKind::FileMetadata(metadata))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_depositor(mut self, depositor: impl Into<String>) -> Self {
        self.depositor = Some(depositor.into());
        self
    }

    pub fn with_members(mut self, member_ids: Vec<ResourceId>) -> Self {
        self.member_ids = member_ids;
        self
    }

    pub fn with_alternate_id(mut self, alternate_id: impl Into<ResourceId>) -> Self {
        self.alternate_ids.push(alternate_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn model_name(&self) -> &str {
        self.kind.model_name()
    }

    /// File ids, for resource kinds that own files.
    pub fn file_ids(&self) -> Option<&[ResourceId]> {
        match &self.kind {
            ResourceKind::FileSet { file_ids } => Some(file_ids),
            _ => None,
        }
    }

    pub fn file_ids_mut(&mut self) -> Option<&mut Vec<ResourceId>> {
        match &mut self.kind {
            ResourceKind::FileSet { file_ids } => Some(file_ids),
            _ => None,
        }
    }

    /// Remove a file id, returning whether it was present.
    pub fn remove_file_id(&mut self, id: &ResourceId) -> bool {
        match self.file_ids_mut() {
            Some(file_ids) => {
                let before = file_ids.len();
                file_ids.retain(|f| f != id);
                file_ids.len() != before
            }
            None => false,
        }
    }

    /// Append a file id unless it is already present.
    pub fn add_file_id(&mut self, id: ResourceId) {
        if let Some(file_ids) = self.file_ids_mut() {
            if !file_ids.contains(&id) {
                file_ids.push(id);
            }
        }
    }

    pub fn file_metadata(&self) -> Option<&FileMetadata> {
        match &self.kind {
            ResourceKind::FileMetadata(metadata) => Some(metadata),
            _ => None,
        }
    }

    /// Ids this resource points at through `property`.
    ///
    /// `member_ids` and `file_ids` are first-class; any other property is read
    /// from `attributes` as a string or an array of strings / `{"id": ..}`.
    pub fn references(&self, property: &str) -> Vec<ResourceId> {
        match property {
            "member_ids" => self.member_ids.clone(),
            "file_ids" => self.file_ids().map(<[_]>::to_vec).unwrap_or_default(),
            "alternate_ids" => self.alternate_ids.clone(),
            other => self
                .attributes
                .get(other)
                .map(ids_from_json)
                .unwrap_or_default(),
        }
    }
}

/// Read ids from a JSON value: `"x"`, `{"id": "x"}`, or arrays of either.
pub fn ids_from_json(value: &JsonValue) -> Vec<ResourceId> {
    match value {
        JsonValue::String(s) => vec![ResourceId::new(s.clone())],
        JsonValue::Object(map) => map
            .get("id")
            .and_then(JsonValue::as_str)
            .map(|s| vec![ResourceId::new(s)])
            .unwrap_or_default(),
        JsonValue::Array(items) => items.iter().flat_map(ids_from_json).collect(),
        _ => Vec::new(),
    }
}

/// Raw storage record as held by a metadata adapter, before materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrmRecord {
    pub id: ResourceId,
    pub internal_resource: String,
    pub metadata: JsonValue,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub lock_version: Option<i32>,
}

// =============================================================================
// STORAGE
// =============================================================================

/// Identity a file is uploaded on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_key: String,
}

impl Owner {
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
        }
    }
}

/// Arguments for a destination-backend upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// File set the upload attaches to, already stripped of the legacy file id.
    pub file_set: Resource,
    pub filename: String,
    pub uses: Vec<UseTag>,
    pub owner: Option<Owner>,
    pub mime_type: Option<String>,
    /// Never regenerate derivatives for this upload.
    pub skip_derivatives: bool,
}

/// Arguments for persisting one derivative file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeDirectives {
    /// File set the derivative belongs to.
    pub file_set_id: ResourceId,
    /// Local path the derivative was read from.
    pub url: std::path::PathBuf,
    pub container: UseTag,
    pub mime_type: String,
}

/// A file written to the destination backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: ResourceId,
    pub file_identifier: String,
    pub size: u64,
    pub digest: Option<String>,
    pub mime_type: Option<String>,
    pub uses: Vec<UseTag>,
}

// =============================================================================
// MIGRATION
// =============================================================================

/// Outcome of the migration trigger for one materialized resource.
///
/// Every variant is a status; none of them is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MigrationDecision {
    /// The resource does not own files.
    NotApplicable,
    /// The destination already knows this resource's files.
    AlreadyMigrated,
    /// A migration for this id is running on the current task.
    InProgress,
    /// A migration job was queued.
    Enqueued { job_id: Uuid },
    /// The trigger could not decide (lookup or enqueue failed); retried on next read.
    Deferred { reason: String },
}

impl MigrationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDecision::NotApplicable => "not_applicable",
            MigrationDecision::AlreadyMigrated => "already_migrated",
            MigrationDecision::InProgress => "in_progress",
            MigrationDecision::Enqueued { .. } => "enqueued",
            MigrationDecision::Deferred { .. } => "deferred",
        }
    }

    pub fn is_enqueued(&self) -> bool {
        matches!(self, MigrationDecision::Enqueued { .. })
    }
}

/// How much of a file set must be present in the destination before the
/// trigger treats it as migrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationPolicy {
    /// Any one file id present is enough. Cheapest; may skip a partial migration.
    #[default]
    Any,
    /// Every file id must be present.
    All,
}

impl MigrationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPolicy::Any => "any",
            MigrationPolicy::All => "all",
        }
    }
}

impl FromStr for MigrationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(MigrationPolicy::Any),
            "all" => Ok(MigrationPolicy::All),
            other => Err(Error::Config(format!(
                "unknown migration policy '{}', expected 'any' or 'all'",
                other
            ))),
        }
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Job status in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Move a file set's files and derivatives out of the legacy store
    MigrateFiles,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::MigrateFiles => "migrate_files",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "migrate_files" => Some(JobType::MigrateFiles),
            _ => None,
        }
    }
}

/// A queued background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub resource_id: Option<ResourceId>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn use_tag_parses_uri_and_container_forms() {
        for tag in UseTag::ALL {
            assert_eq!(UseTag::parse(tag.uri()), Some(tag));
            assert_eq!(UseTag::parse(tag.container()), Some(tag));
        }
        assert_eq!(UseTag::parse("http://example.com/use#Custom"), None);
        assert_eq!(UseTag::parse(""), None);
    }

    #[test]
    fn file_metadata_uses_filters_unknown_and_duplicates() {
        let metadata = FileMetadata::new("fedora://host/rest/f1", "a.tif")
            .with_use("http://pcdm.org/use#OriginalFile")
            .with_use("http://example.com/use#Bogus")
            .with_use("original_file")
            .with_use("http://pcdm.org/use#PreservationFile");

        assert_eq!(
            metadata.uses(),
            vec![UseTag::OriginalFile, UseTag::PreservationFile]
        );
    }

    #[test]
    fn file_ids_capability_only_on_file_sets() {
        let fs = Resource::file_set("fs", vec!["f1".into(), "f2".into()]);
        assert_eq!(fs.file_ids().map(<[_]>::len), Some(2));

        let work = Resource::work("w");
        assert!(work.file_ids().is_none());

        let fm = Resource::file_metadata_record("f1", FileMetadata::new("fedora:x", "x"));
        assert!(fm.file_ids().is_none());
        assert!(fm.file_metadata().is_some());
    }

    #[test]
    fn remove_and_add_file_ids() {
        let mut fs = Resource::file_set("fs", vec!["f1".into(), "f2".into()]);
        assert!(fs.remove_file_id(&"f1".into()));
        assert!(!fs.remove_file_id(&"f1".into()));
        fs.add_file_id("f3".into());
        fs.add_file_id("f3".into());
        assert_eq!(
            fs.file_ids().unwrap(),
            &[ResourceId::new("f2"), ResourceId::new("f3")]
        );

        let mut work = Resource::work("w");
        assert!(!work.remove_file_id(&"f1".into()));
    }

    #[test]
    fn references_reads_attributes() {
        let work = Resource::work("w")
            .with_members(vec!["m1".into()])
            .with_attribute("parent_id", json!({"id": "p1"}))
            .with_attribute("related", json!(["r1", {"id": "r2"}]));

        assert_eq!(work.references("member_ids"), vec![ResourceId::new("m1")]);
        assert_eq!(work.references("parent_id"), vec![ResourceId::new("p1")]);
        assert_eq!(
            work.references("related"),
            vec![ResourceId::new("r1"), ResourceId::new("r2")]
        );
        assert!(work.references("missing").is_empty());
    }

    #[test]
    fn migration_policy_from_str() {
        assert_eq!("any".parse::<MigrationPolicy>().unwrap(), MigrationPolicy::Any);
        assert_eq!(" ALL ".parse::<MigrationPolicy>().unwrap(), MigrationPolicy::All);
        assert!("some".parse::<MigrationPolicy>().is_err());
        assert_eq!(MigrationPolicy::default(), MigrationPolicy::Any);
    }

    #[test]
    fn migration_decision_serializes_tagged() {
        let value = serde_json::to_value(MigrationDecision::AlreadyMigrated).unwrap();
        assert_eq!(value, json!({"decision": "already_migrated"}));
        assert_eq!(MigrationDecision::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn job_type_and_status_round_trip_strings() {
        assert_eq!(JobType::parse(JobType::MigrateFiles.as_str()), Some(JobType::MigrateFiles));
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobType::parse("embedding"), None);
    }
}
