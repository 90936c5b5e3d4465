//! Primary store query service over `orm_resources`.
//!
//! Rows hold a model name and a JSONB metadata document. Every row returned
//! to a caller goes through the [`ResourceFactory`], so the migration hook
//! sees each resource the primary store materializes.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};

use freyja_core::{
    Error, FileMetadataQuery, MetadataWriter, OrmRecord, QueryService, Resource, ResourceFactory,
    ResourceId, ResourcePresence, Result, MODEL_FILE_METADATA,
};

const COLUMNS: &str = "id, internal_resource, metadata, created_at, updated_at, lock_version";

/// Name of this backend in logs and errors.
pub const BACKEND: &str = "primary";

/// Names a model may be persisted under: `file_set`, `FileSet`,
/// `Hyrax::FileSet`.
pub fn model_aliases(model: &str) -> Vec<String> {
    let camel: String = model
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    let mut aliases = vec![model.to_string()];
    if camel != model {
        aliases.push(camel.clone());
    }
    aliases.push(format!("Hyrax::{}", camel));
    aliases
}

fn record_from_row(row: &PgRow) -> Result<OrmRecord> {
    Ok(OrmRecord {
        id: ResourceId::new(row.try_get::<String, _>("id")?),
        internal_resource: row.try_get("internal_resource")?,
        metadata: row.try_get::<JsonValue, _>("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        lock_version: row.try_get("lock_version")?,
    })
}

fn id_strings(ids: &[ResourceId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

/// Id-presence lookup against `orm_resources`, without materialization.
#[derive(Clone)]
pub struct PgResourcePresence {
    pool: Pool<Postgres>,
}

impl PgResourcePresence {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourcePresence for PgResourcePresence {
    async fn find_present_ids(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found: Vec<String> = sqlx::query_scalar("SELECT id FROM orm_resources WHERE id = ANY($1)")
            .bind(id_strings(ids))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        // Request order, for stable logging.
        Ok(ids
            .iter()
            .filter(|id| found.iter().any(|f| f == id.as_str()))
            .cloned()
            .collect())
    }
}

/// PostgreSQL implementation of the primary [`QueryService`].
#[derive(Clone)]
pub struct PgQueryService {
    pool: Pool<Postgres>,
    factory: ResourceFactory,
}

impl PgQueryService {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            factory: ResourceFactory::new(),
        }
    }

    /// Materialize rows through `factory` (and its hook).
    pub fn with_factory(mut self, factory: ResourceFactory) -> Self {
        self.factory = factory;
        self
    }

    async fn materialize(&self, rows: Vec<PgRow>) -> Result<Vec<Resource>> {
        let mut resources = Vec::with_capacity(rows.len());
        for row in &rows {
            resources.push(self.factory.to_resource(record_from_row(row)?).await?);
        }
        Ok(resources)
    }

    async fn fetch_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<PgRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources WHERE id = ANY($1)"
        ))
        .bind(id_strings(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(order_rows(rows, ids))
    }
}

/// Sort rows into `ids` order, dropping repeats.
fn order_rows(rows: Vec<PgRow>, ids: &[ResourceId]) -> Vec<PgRow> {
    let mut keyed: Vec<(usize, PgRow)> = rows
        .into_iter()
        .filter_map(|row| {
            let id: String = row.try_get("id").ok()?;
            let pos = ids.iter().position(|want| want.as_str() == id)?;
            Some((pos, row))
        })
        .collect();
    keyed.sort_by_key(|(pos, _)| *pos);
    keyed.dedup_by_key(|(pos, _)| *pos);
    keyed.into_iter().map(|(_, row)| row).collect()
}

#[async_trait]
impl QueryService for PgQueryService {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn find_by(&self, id: &ResourceId) -> Result<Resource> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM orm_resources WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => self.factory.to_resource(record_from_row(&row)?).await,
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn find_by_alternate_identifier(&self, alternate_id: &ResourceId) -> Result<Resource> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources
             WHERE metadata @> jsonb_build_object('alternate_ids',
                   jsonb_build_array(jsonb_build_object('id', $1::text)))
             LIMIT 1"
        ))
        .bind(alternate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => self.factory.to_resource(record_from_row(&row)?).await,
            None => Err(Error::NotFound(alternate_id.to_string())),
        }
    }

    async fn find_many_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        let start = Instant::now();
        let rows = self.fetch_by_ids(ids).await?;
        trace!(
            subsystem = "db",
            op = "find_many_by_ids",
            requested = ids.len(),
            result_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched rows"
        );
        self.materialize(rows).await
    }

    async fn find_all(&self) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.materialize(rows).await
    }

    async fn find_all_of_model(&self, model: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources
             WHERE internal_resource = ANY($1)
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(model_aliases(model))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.materialize(rows).await
    }

    async fn find_members(&self, resource: &Resource) -> Result<Vec<Resource>> {
        let rows = self.fetch_by_ids(&resource.member_ids).await?;
        self.materialize(rows).await
    }

    async fn find_inverse_references_by(
        &self,
        id: &ResourceId,
        property: &str,
    ) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources
             WHERE metadata @> jsonb_build_object($1::text, jsonb_build_array(jsonb_build_object('id', $2::text)))
                OR metadata @> jsonb_build_object($1::text, jsonb_build_object('id', $2::text))
                OR metadata @> jsonb_build_object($1::text, jsonb_build_array($2::text))
                OR metadata->>$1 = $2
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(property)
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.materialize(rows).await
    }

    async fn count_all_of_model(&self, model: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM orm_resources WHERE internal_resource = ANY($1)")
                .bind(model_aliases(model))
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl ResourcePresence for PgQueryService {
    async fn find_present_ids(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>> {
        PgResourcePresence::new(self.pool.clone())
            .find_present_ids(ids)
            .await
    }
}

#[async_trait]
impl FileMetadataQuery for PgQueryService {
    async fn find_many_file_metadata_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM orm_resources
             WHERE id = ANY($1) AND internal_resource = ANY($2)"
        ))
        .bind(id_strings(ids))
        .bind(model_aliases(MODEL_FILE_METADATA))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.materialize(order_rows(rows, ids)).await
    }
}

#[async_trait]
impl MetadataWriter for PgQueryService {
    /// Upsert the resource. Saved rows are decoded without the hook.
    async fn save(&self, resource: Resource) -> Result<Resource> {
        let record = ResourceFactory::from_resource(&resource);

        let row = sqlx::query(&format!(
            "INSERT INTO orm_resources (id, internal_resource, metadata, created_at, updated_at, lock_version)
             VALUES ($1, $2, $3, COALESCE($4, now()), now(), 0)
             ON CONFLICT (id) DO UPDATE
                SET internal_resource = EXCLUDED.internal_resource,
                    metadata = EXCLUDED.metadata,
                    updated_at = now(),
                    lock_version = orm_resources.lock_version + 1
             RETURNING {COLUMNS}"
        ))
        .bind(record.id.as_str())
        .bind(&record.internal_resource)
        .bind(&record.metadata)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            op = "save",
            resource_id = %record.id,
            model = %record.internal_resource,
            "Saved resource"
        );

        ResourceFactory::decode(record_from_row(&row)?)
    }
}
