//! Migration trigger run on every materialized resource.
//!
//! Decision order:
//! 1. the id is being migrated on the current task → `InProgress`
//! 2. the resource owns no files → `NotApplicable`
//! 3. the destination already holds its files (per [`MigrationPolicy`]) →
//!    `AlreadyMigrated`
//! 4. otherwise one `MigrateFiles` job is queued → `Enqueued`
//!
//! Lookup and queue failures become `Deferred`; a read never fails because
//! of the trigger.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use freyja_core::{
    defaults, JobRepository, JobType, MaterializationHook, MigrationDecision, MigrationGuard,
    MigrationPolicy, Resource, ResourceId, ResourcePresence,
};

/// Decides, per materialized resource, whether to queue a file migration.
pub struct MigrationTrigger {
    destination: Arc<dyn ResourcePresence>,
    jobs: Arc<dyn JobRepository>,
    policy: MigrationPolicy,
    priority: i32,
}

impl MigrationTrigger {
    pub fn new(destination: Arc<dyn ResourcePresence>, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            destination,
            jobs,
            policy: MigrationPolicy::default(),
            priority: defaults::MIGRATION_JOB_PRIORITY,
        }
    }

    pub fn with_policy(mut self, policy: MigrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn policy(&self) -> MigrationPolicy {
        self.policy
    }

    /// Run the decision for `resource`.
    pub async fn decide(&self, resource: &Resource) -> MigrationDecision {
        if MigrationGuard::is_in_progress(&resource.id) {
            return MigrationDecision::InProgress;
        }

        let Some(file_ids) = resource.file_ids() else {
            return MigrationDecision::NotApplicable;
        };

        match self.already_migrated(file_ids).await {
            Ok(true) => return MigrationDecision::AlreadyMigrated,
            Ok(false) => {}
            Err(e) => {
                warn!(
                    subsystem = "migration",
                    component = "trigger",
                    resource_id = %resource.id,
                    error = %e,
                    "Destination lookup failed, deferring migration"
                );
                return MigrationDecision::Deferred {
                    reason: e.to_string(),
                };
            }
        }

        let payload = json!({ "resource_id": resource.id.as_str() });
        match self
            .jobs
            .queue(
                Some(resource.id.clone()),
                JobType::MigrateFiles,
                self.priority,
                Some(payload),
            )
            .await
        {
            Ok(job_id) => MigrationDecision::Enqueued { job_id },
            Err(e) => {
                warn!(
                    subsystem = "migration",
                    component = "trigger",
                    resource_id = %resource.id,
                    error = %e,
                    "Failed to queue migration job"
                );
                MigrationDecision::Deferred {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn already_migrated(&self, file_ids: &[ResourceId]) -> freyja_core::Result<bool> {
        let unique: Vec<ResourceId> = {
            let mut seen = HashSet::new();
            file_ids
                .iter()
                .filter(|id| seen.insert(*id))
                .cloned()
                .collect()
        };

        if unique.is_empty() {
            return Ok(self.policy == MigrationPolicy::All);
        }

        let present = self.destination.find_present_ids(&unique).await?;
        Ok(match self.policy {
            MigrationPolicy::Any => !present.is_empty(),
            MigrationPolicy::All => unique.iter().all(|id| present.contains(id)),
        })
    }
}

#[async_trait]
impl MaterializationHook for MigrationTrigger {
    async fn on_materialize(&self, resource: &Resource) -> MigrationDecision {
        let decision = self.decide(resource).await;
        debug!(
            subsystem = "migration",
            component = "trigger",
            resource_id = %resource.id,
            decision = decision.as_str(),
            policy = self.policy.as_str(),
            "Migration decision"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobRepository;
    use freyja_core::{MemoryQueryService, QueryPresence};

    struct Fixture {
        destination: Arc<MemoryQueryService>,
        jobs: Arc<InMemoryJobRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                destination: Arc::new(MemoryQueryService::new("primary")),
                jobs: Arc::new(InMemoryJobRepository::new()),
            }
        }

        fn trigger(&self, policy: MigrationPolicy) -> MigrationTrigger {
            MigrationTrigger::new(
                Arc::new(QueryPresence::new(self.destination.clone())),
                self.jobs.clone(),
            )
            .with_policy(policy)
        }
    }

    fn file_set(ids: &[&str]) -> Resource {
        Resource::file_set("fs-1", ids.iter().map(|id| ResourceId::new(*id)).collect())
    }

    #[tokio::test]
    async fn test_non_file_set_is_not_applicable() {
        let f = Fixture::new();
        let decision = f.trigger(MigrationPolicy::Any).decide(&Resource::work("w1")).await;
        assert_eq!(decision, MigrationDecision::NotApplicable);
        assert!(f.jobs.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_guarded_id_is_in_progress() {
        let f = Fixture::new();
        let trigger = f.trigger(MigrationPolicy::Any);
        let resource = file_set(&["f1"]);

        let decision = MigrationGuard::scope(resource.id.clone(), trigger.decide(&resource)).await;
        assert_eq!(decision, MigrationDecision::InProgress);
        assert!(f.jobs.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_any_match_counts_as_migrated() {
        let f = Fixture::new();
        f.destination.put(&Resource::work("f2")).await;

        let decision = f
            .trigger(MigrationPolicy::Any)
            .decide(&file_set(&["f1", "f2"]))
            .await;
        assert_eq!(decision, MigrationDecision::AlreadyMigrated);
        assert!(f.jobs.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_all_policy_requires_every_file() {
        let f = Fixture::new();
        f.destination.put(&Resource::work("f2")).await;

        let decision = f
            .trigger(MigrationPolicy::All)
            .decide(&file_set(&["f1", "f2", "f2"]))
            .await;
        assert!(decision.is_enqueued());

        f.destination.put(&Resource::work("f1")).await;
        let decision = f
            .trigger(MigrationPolicy::All)
            .decide(&file_set(&["f1", "f2", "f2"]))
            .await;
        assert_eq!(decision, MigrationDecision::AlreadyMigrated);
    }

    #[tokio::test]
    async fn test_empty_file_ids_depend_on_policy() {
        let f = Fixture::new();
        assert_eq!(
            f.trigger(MigrationPolicy::All).decide(&file_set(&[])).await,
            MigrationDecision::AlreadyMigrated
        );
        assert!(f
            .trigger(MigrationPolicy::Any)
            .decide(&file_set(&[]))
            .await
            .is_enqueued());
    }

    #[tokio::test]
    async fn test_enqueue_carries_resource_id() {
        let f = Fixture::new();
        let decision = f.trigger(MigrationPolicy::Any).decide(&file_set(&["f1"])).await;

        let MigrationDecision::Enqueued { job_id } = decision else {
            panic!("expected enqueue, got {:?}", decision);
        };
        let job = f.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_type, JobType::MigrateFiles);
        assert_eq!(job.resource_id, Some(ResourceId::new("fs-1")));
        assert_eq!(job.payload, Some(json!({"resource_id": "fs-1"})));
    }

    #[tokio::test]
    async fn test_lookup_failure_defers() {
        let f = Fixture::new();
        f.destination.set_offline(true);

        let decision = f.trigger(MigrationPolicy::Any).decide(&file_set(&["f1"])).await;
        assert!(matches!(decision, MigrationDecision::Deferred { .. }));
        assert!(f.jobs.all().await.is_empty());
    }
}
