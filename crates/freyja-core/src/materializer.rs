//! Resource materialization.
//!
//! Converts raw [`OrmRecord`]s into [`Resource`]s and back. Every conversion
//! to a resource runs the configured [`MaterializationHook`], which is where
//! lazy migration is triggered.

use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::MaterializationHook;

/// Metadata keys the materializer interprets; everything else is kept in
/// `Resource::attributes`.
const RESERVED_KEYS: &[&str] = &[
    "alternate_ids",
    "member_ids",
    "label",
    "title",
    "depositor",
    "file_ids",
    "file_identifier",
    "original_filename",
    "mime_type",
    "pcdm_use",
    "use",
    "size",
];

/// Builds resources from storage records.
#[derive(Clone, Default)]
pub struct ResourceFactory {
    hook: Option<Arc<dyn MaterializationHook>>,
}

impl std::fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFactory")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl ResourceFactory {
    pub fn new() -> Self {
        Self { hook: None }
    }

    /// Run `hook` on every materialized resource.
    pub fn with_hook(mut self, hook: Arc<dyn MaterializationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Decode a record and notify the hook.
    ///
    /// The hook's decision is logged and otherwise ignored; only decoding
    /// errors fail the conversion.
    pub async fn to_resource(&self, record: OrmRecord) -> Result<Resource> {
        let resource = Self::decode(record)?;

        if let Some(hook) = &self.hook {
            let decision = hook.on_materialize(&resource).await;
            debug!(
                subsystem = "core",
                component = "materializer",
                resource_id = %resource.id,
                decision = decision.as_str(),
                "Materialization hook finished"
            );
        }

        Ok(resource)
    }

    /// Decode a record without running the hook.
    pub fn decode(record: OrmRecord) -> Result<Resource> {
        let OrmRecord {
            id,
            internal_resource,
            metadata,
            created_at,
            updated_at,
            lock_version: _,
        } = record;

        let metadata = match metadata {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                return Err(Error::Serialization(format!(
                    "metadata for {} must be a JSON object, got {}",
                    id,
                    json_type(&other)
                )))
            }
        };

        let kind = match normalize_model(&internal_resource).as_str() {
            MODEL_FILE_SET => ResourceKind::FileSet {
                file_ids: unique(ids_at(&metadata, "file_ids")),
            },
            MODEL_FILE_METADATA => ResourceKind::FileMetadata(decode_file_metadata(&id, &metadata)?),
            MODEL_COLLECTION | "pcdm_collection" => ResourceKind::Collection,
            MODEL_WORK | "generic_work" => ResourceKind::Work,
            _ => ResourceKind::Other {
                name: internal_resource.clone(),
            },
        };

        let attributes = metadata
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        trace!(
            resource_id = %id,
            model = %internal_resource,
            "Decoded record"
        );

        Ok(Resource {
            alternate_ids: ids_at(&metadata, "alternate_ids"),
            member_ids: ids_at(&metadata, "member_ids"),
            label: first_string(metadata.get("label")).or_else(|| first_string(metadata.get("title"))),
            depositor: first_string(metadata.get("depositor")),
            kind,
            attributes,
            created_at,
            updated_at,
            id,
        })
    }

    /// Encode a resource as a storage record.
    pub fn from_resource(resource: &Resource) -> OrmRecord {
        let mut metadata = resource.attributes.clone();

        let id_list = |ids: &[ResourceId]| -> JsonValue {
            JsonValue::Array(ids.iter().map(|id| json!({ "id": id })).collect())
        };

        metadata.insert("alternate_ids".into(), id_list(&resource.alternate_ids));
        metadata.insert("member_ids".into(), id_list(&resource.member_ids));
        if let Some(label) = &resource.label {
            metadata.insert("label".into(), json!([label]));
        }
        if let Some(depositor) = &resource.depositor {
            metadata.insert("depositor".into(), json!(depositor));
        }

        match &resource.kind {
            ResourceKind::FileSet { file_ids } => {
                metadata.insert("file_ids".into(), id_list(file_ids));
            }
            ResourceKind::FileMetadata(file) => {
                metadata.insert("file_identifier".into(), json!({ "id": file.file_identifier }));
                metadata.insert("original_filename".into(), json!([file.original_filename]));
                if let Some(mime_type) = &file.mime_type {
                    metadata.insert("mime_type".into(), json!([mime_type]));
                }
                metadata.insert("pcdm_use".into(), json!(file.pcdm_use));
                if let Some(size) = file.size {
                    metadata.insert("size".into(), json!([size]));
                }
            }
            ResourceKind::Work | ResourceKind::Collection | ResourceKind::Other { .. } => {}
        }

        OrmRecord {
            id: resource.id.clone(),
            internal_resource: resource.model_name().to_string(),
            metadata: JsonValue::Object(metadata),
            created_at: resource.created_at,
            updated_at: resource.updated_at,
            lock_version: None,
        }
    }
}

fn decode_file_metadata(id: &ResourceId, metadata: &Map<String, JsonValue>) -> Result<FileMetadata> {
    let file_identifier = metadata
        .get("file_identifier")
        .and_then(|v| ids_from_json(v).into_iter().next())
        .ok_or_else(|| {
            Error::Serialization(format!("file metadata {} has no file_identifier", id))
        })?;

    let mut pcdm_use = strings(metadata.get("pcdm_use"));
    pcdm_use.extend(strings(metadata.get("use")));

    let size = metadata.get("size").and_then(|v| match v {
        JsonValue::Array(items) => items.first().and_then(as_i64),
        other => as_i64(other),
    });

    Ok(FileMetadata {
        file_identifier: file_identifier.to_string(),
        original_filename: first_string(metadata.get("original_filename")).unwrap_or_default(),
        mime_type: first_string(metadata.get("mime_type")),
        pcdm_use,
        size,
    })
}

/// `Hyrax::FileSet` → `file_set`, `GenericWork` → `generic_work`.
fn normalize_model(internal_resource: &str) -> String {
    let name = internal_resource
        .rsplit("::")
        .next()
        .unwrap_or(internal_resource);

    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn ids_at(metadata: &Map<String, JsonValue>, key: &str) -> Vec<ResourceId> {
    metadata.get(key).map(ids_from_json).unwrap_or_default()
}

fn unique(ids: Vec<ResourceId>) -> Vec<ResourceId> {
    let mut out: Vec<ResourceId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn strings(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(scalar_string)
            .collect(),
        Some(other) => scalar_string(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn first_string(value: Option<&JsonValue>) -> Option<String> {
    strings(value).into_iter().next()
}

/// A string, `{"@value": ..}` or `{"id": ..}`.
fn scalar_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Object(map) => map
            .get("@value")
            .or_else(|| map.get("id"))
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
