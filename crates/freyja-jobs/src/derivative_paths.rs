//! Pairtree layout of generated derivative files.
//!
//! A resource id `abc123` maps to the prefix `{root}/ab/c1/23`; its
//! derivatives are the files beside that prefix named `23-{kind}.{ext}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::trace;

use freyja_core::{DerivativePathEnumerator, Resource, ResourceId, Result};

/// Split an id into two-character path segments.
pub fn pair_path(id: &ResourceId) -> PathBuf {
    let chars: Vec<char> = id.as_str().chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect()
}

/// Derivatives stored under a pairtree root.
#[derive(Debug, Clone)]
pub struct PairtreeDerivativePaths {
    root: PathBuf,
}

impl PairtreeDerivativePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a derivative of `kind` with `extension` is written to.
    pub fn derivative_path(&self, id: &ResourceId, kind: &str, extension: &str) -> PathBuf {
        let prefix = self.root.join(pair_path(id));
        let leaf = prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        prefix.with_file_name(format!("{}-{}.{}", leaf, kind, extension))
    }
}

#[async_trait]
impl DerivativePathEnumerator for PairtreeDerivativePaths {
    async fn paths_for(&self, resource: &Resource) -> Result<Vec<PathBuf>> {
        let prefix = self.root.join(pair_path(&resource.id));
        let (Some(dir), Some(leaf)) = (prefix.parent(), prefix.file_name()) else {
            return Ok(Vec::new());
        };
        let wanted = format!("{}-", leaf.to_string_lossy());

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&wanted) && entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        trace!(
            subsystem = "migration",
            component = "derivatives",
            resource_id = %resource.id,
            result_count = paths.len(),
            "Enumerated derivatives"
        );
        Ok(paths)
    }
}
