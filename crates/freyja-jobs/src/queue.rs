//! In-process job repository.
//!
//! Mirrors the Postgres queue's semantics (priority then age ordering,
//! retry-until-`max_retries`) for tests and single-process deployments.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use freyja_core::{
    defaults, new_v7, Error, Job, JobRepository, JobStatus, JobType, ResourceId, Result,
};

/// [`JobRepository`] kept in memory.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<Job>>,
    notify: Arc<Notify>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle signalled on every `queue`; pass it to
    /// [`WorkerBuilder::with_wakeup`](crate::WorkerBuilder::with_wakeup).
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Every job, in queue order.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    async fn update<F>(&self, job_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| Error::Job(format!("job {} not found", job_id)))?;
        f(job);
        Ok(())
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn queue(
        &self,
        resource_id: Option<ResourceId>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let job = Job {
            id: new_v7(),
            resource_id,
            job_type,
            status: JobStatus::Pending,
            priority,
            payload,
            result: None,
            error_message: None,
            progress_percent: 0,
            progress_message: None,
            retry_count: 0,
            max_retries: defaults::JOB_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let job_id = job.id;
        self.jobs.lock().await.push(job);
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        // Queue order breaks priority ties, matching `created_at ASC`.
        let next = jobs
            .iter_mut()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Pending)
            .filter(|(_, job)| job_types.is_empty() || job_types.contains(&job.job_type))
            .max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))
            .map(|(_, job)| job);

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        self.update(job_id, |job| {
            job.progress_percent = percent.clamp(0, 100);
            job.progress_message = message.map(String::from);
        })
        .await
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        self.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = result;
            job.progress_percent = 100;
        })
        .await
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update(job_id, |job| {
            job.error_message = Some(error.to_string());
            if job.retry_count < job.max_retries {
                job.retry_count += 1;
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.progress_percent = 0;
                job.progress_message = None;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update(job_id, |job| {
            job.error_message = Some(error.to_string());
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let repo = InMemoryJobRepository::new();
        let low = repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();
        let high = repo.queue(None, JobType::MigrateFiles, 5, None).await.unwrap();
        let low_later = repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();

        let order: Vec<Uuid> = [
            repo.claim_next_for_types(&[]).await.unwrap().unwrap().id,
            repo.claim_next_for_types(&[]).await.unwrap().unwrap().id,
            repo.claim_next_for_types(&[]).await.unwrap().unwrap().id,
        ]
        .to_vec();
        assert_eq!(order, vec![high, low, low_later]);
        assert!(repo.claim_next_for_types(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_running() {
        let repo = InMemoryJobRepository::new();
        let id = repo
            .queue(
                Some("fs-1".into()),
                JobType::MigrateFiles,
                0,
                Some(json!({"resource_id": "fs-1"})),
            )
            .await
            .unwrap();

        let job = repo
            .claim_next_for_types(&[JobType::MigrateFiles])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(repo.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_leaves_a_wakeup_permit() {
        let repo = InMemoryJobRepository::new();
        let notify = repo.job_notify();
        repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();

        // Nobody was waiting; the permit is kept for the next idle worker.
        tokio::time::timeout(std::time::Duration::from_millis(50), notify.notified())
            .await
            .expect("queue should signal the worker");
    }

    #[tokio::test]
    async fn test_fail_retries_until_exhausted() {
        let repo = InMemoryJobRepository::new();
        let id = repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();

        for attempt in 1..=defaults::JOB_MAX_RETRIES {
            repo.claim_next_for_types(&[]).await.unwrap().unwrap();
            repo.fail(id, "boom").await.unwrap();
            let job = repo.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, attempt);
        }

        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        repo.fail(id, "boom").await.unwrap();
        let job = repo.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fail_permanently_and_complete() {
        let repo = InMemoryJobRepository::new();
        let failed = repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();
        let done = repo.queue(None, JobType::MigrateFiles, 0, None).await.unwrap();

        repo.fail_permanently(failed, "bad payload").await.unwrap();
        assert_eq!(
            repo.get(failed).await.unwrap().unwrap().status,
            JobStatus::Failed
        );

        repo.update_progress(done, 150, Some("nearly")).await.unwrap();
        assert_eq!(repo.get(done).await.unwrap().unwrap().progress_percent, 100);

        repo.complete(done, Some(json!({"ok": true}))).await.unwrap();
        let job = repo.get(done).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_error() {
        let repo = InMemoryJobRepository::new();
        let err = repo.complete(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, Error::Job(_)));
    }
}
