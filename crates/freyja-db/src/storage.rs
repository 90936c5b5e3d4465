//! Filesystem storage adapter with BLAKE3 digests.
//!
//! Files are streamed to `{base_path}/blobs/{aa}/{bb}/{uuid}.bin` through a
//! temp file and an atomic rename, hashing as they go. Identifiers handed
//! back to callers use the `disk://` prefix.
//!
//! When metadata collaborators are attached, every stored file also gets a
//! `file_metadata` resource and its id is appended to the owning file set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use freyja_db::FilesystemStorage;
//!
//! let storage = FilesystemStorage::new("/var/freyja/files")
//!     .with_metadata(query.clone(), writer.clone());
//! let stored = storage.upload(request, Box::new(file)).await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use freyja_core::{
    defaults, detect_content_type, new_v7, ContentReader, DerivativeDirectives, Error, FileMetadata,
    MetadataWriter, QueryService, Resource, ResourceId, Result, StorageAdapter, StoredFile,
    UploadRequest,
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Leading bytes kept for content type sniffing.
const SNIFF_LEN: usize = 8 * 1024;

/// Generate the blob path for a UUID.
///
/// Path format: `blobs/{first-2-hex}/{next-2-hex}/{uuid}.bin`
pub fn storage_path(uuid: &Uuid) -> String {
    let hex = uuid.simple().to_string();
    format!(
        "blobs/{}/{}/{}.bin",
        &hex[0..2],
        &hex[2..4],
        uuid.as_hyphenated()
    )
}

/// Bytes written by one streaming copy.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Written {
    path: PathBuf,
    size: u64,
    digest: String,
    /// First bytes of the content, at most [`SNIFF_LEN`].
    head: Vec<u8>,
}

/// Filesystem implementation of [`StorageAdapter`].
pub struct FilesystemStorage {
    base_path: PathBuf,
    query: Option<Arc<dyn QueryService>>,
    writer: Option<Arc<dyn MetadataWriter>>,
}

impl FilesystemStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            query: None,
            writer: None,
        }
    }

    /// Record file metadata and file set membership for stored files.
    ///
    /// `query` loads the file set a derivative belongs to; `writer` saves
    /// both the new `file_metadata` resource and the updated file set.
    pub fn with_metadata(
        mut self,
        query: Arc<dyn QueryService>,
        writer: Arc<dyn MetadataWriter>,
    ) -> Self {
        self.query = Some(query);
        self.writer = Some(writer);
        self
    }

    /// Write, read back, and delete a scratch file.
    ///
    /// Run at startup to surface permission and mount problems early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join("blobs/.health-check");
        let test_file = test_dir.join(".health-check.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }

    /// Stream `content` into a fresh blob, hashing as it goes.
    async fn write_stream(&self, blob_id: &Uuid, mut content: ContentReader) -> Result<Written> {
        let full_path = self.base_path.join(storage_path(blob_id));

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "storage: create_dir_all failed");
                e
            })?;
        }

        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "storage: File::create failed");
            e
        })?;

        let mut hasher = blake3::Hasher::new();
        let mut size: u64 = 0;
        let mut head = Vec::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let copied: Result<()> = async {
            loop {
                let n = content.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                if head.len() < SNIFF_LEN {
                    let take = n.min(SNIFF_LEN - head.len());
                    head.extend_from_slice(&buf[..take]);
                }
                file.write_all(&buf[..n]).await?;
                size += n as u64;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = copied {
            warn!(temp_path = %temp_path.display(), error = %e, "storage: stream copy failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "storage: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(Written {
            path: full_path,
            size,
            digest: format!("blake3:{}", hasher.finalize().to_hex()),
            head,
        })
    }

    /// Save the `file_metadata` resource for a stored file and append its id
    /// to `file_set`.
    async fn record(
        &self,
        writer: &Arc<dyn MetadataWriter>,
        stored: &StoredFile,
        original_filename: &str,
        depositor: Option<&str>,
        mut file_set: Resource,
    ) -> Result<()> {
        let mut metadata = FileMetadata::new(stored.file_identifier.clone(), original_filename);
        metadata.mime_type = stored.mime_type.clone();
        metadata.pcdm_use = stored.uses.iter().map(|u| u.uri().to_string()).collect();
        metadata.size = i64::try_from(stored.size).ok();

        let mut resource = Resource::file_metadata_record(stored.id.clone(), metadata);
        if let Some(depositor) = depositor {
            resource = resource.with_depositor(depositor);
        }
        writer.save(resource).await?;

        file_set.add_file_id(stored.id.clone());
        writer.save(file_set).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FilesystemStorage {
    async fn upload(&self, request: UploadRequest, content: ContentReader) -> Result<StoredFile> {
        let blob_id = new_v7();
        let written = self.write_stream(&blob_id, content).await?;

        let mime_type = request
            .mime_type
            .clone()
            .unwrap_or_else(|| detect_content_type(&request.filename, &written.head));

        let stored = StoredFile {
            id: ResourceId::new(blob_id.to_string()),
            file_identifier: format!("{}{}", defaults::DISK_PREFIX, written.path.display()),
            size: written.size,
            digest: Some(written.digest),
            mime_type: Some(mime_type),
            uses: request.uses.clone(),
        };

        info!(
            subsystem = "storage",
            op = "upload",
            resource_id = %request.file_set.id,
            file_id = %stored.id,
            size_bytes = stored.size,
            skip_derivatives = request.skip_derivatives,
            "Stored file"
        );

        if let Some(writer) = &self.writer {
            let depositor = request.owner.as_ref().map(|o| o.user_key.as_str());
            self.record(
                writer,
                &stored,
                &request.filename,
                depositor,
                request.file_set,
            )
            .await?;
        }

        Ok(stored)
    }

    async fn persist_derivative(
        &self,
        content: ContentReader,
        directives: DerivativeDirectives,
    ) -> Result<StoredFile> {
        let blob_id = new_v7();
        let written = self.write_stream(&blob_id, content).await?;

        let filename = directives
            .url
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| blob_id.to_string());

        let stored = StoredFile {
            id: ResourceId::new(blob_id.to_string()),
            file_identifier: format!("{}{}", defaults::DISK_PREFIX, written.path.display()),
            size: written.size,
            digest: Some(written.digest),
            mime_type: Some(directives.mime_type.clone()),
            uses: vec![directives.container],
        };

        debug!(
            subsystem = "storage",
            op = "persist_derivative",
            resource_id = %directives.file_set_id,
            file_id = %stored.id,
            container = directives.container.container(),
            size_bytes = stored.size,
            "Stored derivative"
        );

        match (&self.writer, &self.query) {
            (Some(writer), Some(query)) => {
                let file_set = query.find_by(&directives.file_set_id).await?;
                if file_set.file_ids().is_none() {
                    return Err(Error::InvalidInput(format!(
                        "{} is a {}, not a file set",
                        file_set.id,
                        file_set.model_name()
                    )));
                }
                self.record(writer, &stored, &filename, None, file_set).await?;
            }
            (Some(_), None) => {
                warn!(
                    subsystem = "storage",
                    resource_id = %directives.file_set_id,
                    "No query service attached, derivative left unattached"
                );
            }
            _ => {}
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freyja_core::{MemoryQueryService, Owner, ResourceKind, UseTag};
    use tempfile::TempDir;

    /// Local path behind a `disk://` identifier written under `storage`.
    fn resolve(storage: &FilesystemStorage, file_identifier: &str) -> Option<PathBuf> {
        let path = PathBuf::from(file_identifier.strip_prefix(defaults::DISK_PREFIX)?);
        path.starts_with(&storage.base_path).then_some(path)
    }

    fn reader(data: &'static [u8]) -> ContentReader {
        Box::new(data)
    }

    fn upload_request(file_set: Resource) -> UploadRequest {
        UploadRequest {
            file_set,
            filename: "page.tif".to_string(),
            uses: vec![UseTag::OriginalFile],
            owner: Some(Owner::new("depositor@example.com")),
            mime_type: None,
            skip_derivatives: true,
        }
    }

    #[test]
    fn test_storage_path_format() {
        let uuid = Uuid::parse_str("01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f").unwrap();
        assert_eq!(
            storage_path(&uuid),
            "blobs/01/94/01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f.bin"
        );
    }

    #[tokio::test]
    async fn test_upload_writes_bytes_and_digest() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(dir.path());

        let stored = storage
            .upload(upload_request(Resource::file_set("fs-1", vec![])), reader(b"hello"))
            .await
            .unwrap();

        assert_eq!(stored.size, 5);
        assert_eq!(
            stored.digest.as_deref(),
            Some(format!("blake3:{}", blake3::hash(b"hello").to_hex()).as_str())
        );
        assert_eq!(stored.mime_type.as_deref(), Some("image/tiff"));
        assert!(stored.file_identifier.starts_with("disk://"));

        let path = resolve(&storage, &stored.file_identifier).unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"hello");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_upload_without_mime_type_sniffs_content() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let png: &'static [u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

        let mut request = upload_request(Resource::file_set("fs-1", vec![]));
        request.filename = "scan.bin".to_string();
        let stored = storage.upload(request, reader(png)).await.unwrap();
        assert_eq!(stored.mime_type.as_deref(), Some("image/png"));

        // A recorded type wins over the bytes.
        let mut request = upload_request(Resource::file_set("fs-1", vec![]));
        request.mime_type = Some("image/tiff".to_string());
        let stored = storage.upload(request, reader(png)).await.unwrap();
        assert_eq!(stored.mime_type.as_deref(), Some("image/tiff"));
    }

    #[tokio::test]
    async fn test_upload_records_metadata_and_membership() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryQueryService::new("primary"));
        let storage =
            FilesystemStorage::new(dir.path()).with_metadata(store.clone(), store.clone());

        let first = storage
            .upload(upload_request(Resource::file_set("fs-1", vec![])), reader(b"one"))
            .await
            .unwrap();
        let file_set = store.find_by(&"fs-1".into()).await.unwrap();
        assert_eq!(file_set.file_ids().unwrap(), &[first.id.clone()]);

        let second = storage
            .upload(upload_request(file_set), reader(b"two"))
            .await
            .unwrap();
        let file_set = store.find_by(&"fs-1".into()).await.unwrap();
        assert_eq!(file_set.file_ids().unwrap(), &[first.id, second.id.clone()]);

        let metadata = store.find_by(&second.id).await.unwrap();
        assert_eq!(metadata.depositor.as_deref(), Some("depositor@example.com"));
        match metadata.kind {
            ResourceKind::FileMetadata(m) => {
                assert_eq!(m.file_identifier, second.file_identifier);
                assert_eq!(m.original_filename, "page.tif");
                assert_eq!(m.uses(), vec![UseTag::OriginalFile]);
                assert_eq!(m.size, Some(3));
            }
            other => panic!("expected file metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_persist_derivative_attaches_to_file_set() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryQueryService::new("primary"));
        store.put(&Resource::file_set("fs-1", vec!["f1".into()])).await;
        let storage =
            FilesystemStorage::new(dir.path()).with_metadata(store.clone(), store.clone());

        let stored = storage
            .persist_derivative(
                reader(b"jpeg"),
                DerivativeDirectives {
                    file_set_id: "fs-1".into(),
                    url: PathBuf::from("/derivatives/fs/-1/fs-1-thumbnail.jpeg"),
                    container: UseTag::ThumbnailImage,
                    mime_type: "image/jpeg".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(stored.uses, vec![UseTag::ThumbnailImage]);
        let file_set = store.find_by(&"fs-1".into()).await.unwrap();
        assert_eq!(file_set.file_ids().unwrap(), &[ResourceId::new("f1"), stored.id.clone()]);

        let metadata = store.find_by(&stored.id).await.unwrap();
        let m = metadata.file_metadata().unwrap();
        assert_eq!(m.original_filename, "fs-1-thumbnail.jpeg");
        assert_eq!(m.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_persist_derivative_missing_file_set_fails() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryQueryService::new("primary"));
        let storage =
            FilesystemStorage::new(dir.path()).with_metadata(store.clone(), store.clone());

        let err = storage
            .persist_derivative(
                reader(b"text"),
                DerivativeDirectives {
                    file_set_id: "gone".into(),
                    url: PathBuf::from("gone-extracted_text.txt"),
                    container: UseTag::ExtractedText,
                    mime_type: "text/plain".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        assert!(storage.validate().await.is_ok());
    }
}
