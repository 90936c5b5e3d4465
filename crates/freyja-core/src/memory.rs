//! In-memory metadata adapter.
//!
//! Holds [`OrmRecord`]s and materializes them through a [`ResourceFactory`],
//! exactly like the Postgres adapter, so the trigger hook fires the same way.
//! Per-operation call counters and an offline switch make it usable as a test
//! double for either side of the federated router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{Error, Result};
use crate::materializer::ResourceFactory;
use crate::models::*;
use crate::traits::{FileMetadataQuery, MetadataWriter, QueryService, ResourcePresence};

/// Query service backed by a vector of records.
pub struct MemoryQueryService {
    name: &'static str,
    factory: ResourceFactory,
    records: Arc<RwLock<Vec<OrmRecord>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    offline: AtomicBool,
}

impl MemoryQueryService {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            factory: ResourceFactory::new(),
            records: Arc::new(RwLock::new(Vec::new())),
            calls: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Materialize through `factory` (and its hook).
    pub fn with_factory(mut self, factory: ResourceFactory) -> Self {
        self.factory = factory;
        self
    }

    /// A second service over the same records, with its own name, factory,
    /// and counters. Writes through either are visible to both.
    pub fn share(&self, name: &'static str, factory: ResourceFactory) -> Self {
        Self {
            name,
            factory,
            records: self.records.clone(),
            calls: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Insert or replace a raw record, keeping insertion order.
    pub async fn insert(&self, record: OrmRecord) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Insert or replace a resource.
    pub async fn put(&self, resource: &Resource) {
        self.insert(ResourceFactory::from_resource(resource)).await;
    }

    /// Remove a record, returning whether it existed.
    pub async fn delete(&self, id: &ResourceId) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| &r.id != id);
        records.len() != before
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Make every subsequent call fail with `Error::BackendUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of calls made to `op` (trait method name).
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of calls made to any operation.
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        trace!(backend = self.name, op, "Memory query");
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable {
                backend: self.name,
                message: "backend is offline".to_string(),
            });
        }
        Ok(())
    }

    /// Decoded copies of every record, paired with the raw record.
    async fn decoded(&self) -> Result<Vec<(Resource, OrmRecord)>> {
        let records = self.records.read().await.clone();
        records
            .into_iter()
            .map(|record| ResourceFactory::decode(record.clone()).map(|r| (r, record)))
            .collect()
    }

    async fn materialize_all(&self, records: Vec<OrmRecord>) -> Result<Vec<Resource>> {
        let mut resources = Vec::with_capacity(records.len());
        for record in records {
            resources.push(self.factory.to_resource(record).await?);
        }
        Ok(resources)
    }

    async fn record(&self, id: &ResourceId) -> Option<OrmRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }
}

#[async_trait]
impl QueryService for MemoryQueryService {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn find_by(&self, id: &ResourceId) -> Result<Resource> {
        self.enter("find_by")?;
        match self.record(id).await {
            Some(record) => self.factory.to_resource(record).await,
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn find_by_alternate_identifier(&self, alternate_id: &ResourceId) -> Result<Resource> {
        self.enter("find_by_alternate_identifier")?;
        let found = self
            .decoded()
            .await?
            .into_iter()
            .find(|(resource, _)| resource.alternate_ids.contains(alternate_id));
        match found {
            Some((_, record)) => self.factory.to_resource(record).await,
            None => Err(Error::NotFound(alternate_id.to_string())),
        }
    }

    async fn find_many_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        self.enter("find_many_by_ids")?;
        let mut records = Vec::new();
        for id in ids {
            if records.iter().any(|r: &OrmRecord| &r.id == id) {
                continue;
            }
            if let Some(record) = self.record(id).await {
                records.push(record);
            }
        }
        self.materialize_all(records).await
    }

    async fn find_all(&self) -> Result<Vec<Resource>> {
        self.enter("find_all")?;
        let records = self.records.read().await.clone();
        self.materialize_all(records).await
    }

    async fn find_all_of_model(&self, model: &str) -> Result<Vec<Resource>> {
        self.enter("find_all_of_model")?;
        let records = self
            .decoded()
            .await?
            .into_iter()
            .filter(|(resource, _)| resource.model_name() == model)
            .map(|(_, record)| record)
            .collect();
        self.materialize_all(records).await
    }

    async fn find_members(&self, resource: &Resource) -> Result<Vec<Resource>> {
        self.enter("find_members")?;
        let mut records = Vec::new();
        for id in &resource.member_ids {
            if let Some(record) = self.record(id).await {
                records.push(record);
            }
        }
        self.materialize_all(records).await
    }

    async fn find_inverse_references_by(
        &self,
        id: &ResourceId,
        property: &str,
    ) -> Result<Vec<Resource>> {
        self.enter("find_inverse_references_by")?;
        let records = self
            .decoded()
            .await?
            .into_iter()
            .filter(|(resource, _)| resource.references(property).contains(id))
            .map(|(_, record)| record)
            .collect();
        self.materialize_all(records).await
    }

    async fn count_all_of_model(&self, model: &str) -> Result<usize> {
        self.enter("count_all_of_model")?;
        Ok(self
            .decoded()
            .await?
            .iter()
            .filter(|(resource, _)| resource.model_name() == model)
            .count())
    }
}

#[async_trait]
impl ResourcePresence for MemoryQueryService {
    async fn find_present_ids(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>> {
        self.enter("find_present_ids")?;
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter(|id| records.iter().any(|r| &r.id == *id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FileMetadataQuery for MemoryQueryService {
    async fn find_many_file_metadata_by_ids(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        self.enter("find_many_file_metadata_by_ids")?;
        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = self.record(id).await {
                if ResourceFactory::decode(record.clone())?.file_metadata().is_some() {
                    records.push(record);
                }
            }
        }
        self.materialize_all(records).await
    }
}

#[async_trait]
impl MetadataWriter for MemoryQueryService {
    async fn save(&self, resource: Resource) -> Result<Resource> {
        self.enter("save")?;
        self.insert(ResourceFactory::from_resource(&resource)).await;
        Ok(resource)
    }
}
