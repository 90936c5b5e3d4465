//! Job handlers for each job type.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use freyja_core::{Job, JobType, ResourceId};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// The resource this job works on, if any.
    pub fn resource_id(&self) -> Option<&ResourceId> {
        self.job.resource_id.as_ref()
    }

    /// Get the job payload.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed and must not be retried.
    Failed(String),
    /// Job should be retried.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

#[cfg(test)]
pub(crate) fn test_job(resource_id: Option<&str>, payload: Option<JsonValue>) -> Job {
    Job {
        id: uuid::Uuid::new_v4(),
        resource_id: resource_id.map(ResourceId::new),
        job_type: JobType::MigrateFiles,
        status: freyja_core::JobStatus::Running,
        priority: 0,
        payload,
        result: None,
        error_message: None,
        progress_percent: 0,
        progress_message: None,
        retry_count: 0,
        max_retries: 3,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_job_context_resource_id() {
        let ctx = JobContext::new(test_job(Some("fs-1"), None));
        assert_eq!(ctx.resource_id(), Some(&ResourceId::new("fs-1")));

        let ctx = JobContext::new(test_job(None, None));
        assert!(ctx.resource_id().is_none());
    }

    #[test]
    fn test_job_context_payload() {
        let ctx = JobContext::new(test_job(None, Some(json!({"resource_id": "fs-1"}))));
        assert_eq!(ctx.payload().unwrap()["resource_id"], "fs-1");

        let ctx = JobContext::new(test_job(None, None));
        assert!(ctx.payload().is_none());
    }

    #[test]
    fn test_job_context_report_progress_no_callback() {
        let ctx = JobContext::new(test_job(None, None));
        // Should not panic
        ctx.report_progress(50, Some("test"));
        ctx.report_progress(100, None);
    }

    #[test]
    fn test_job_context_with_progress_callback() {
        let progress_log = Arc::new(Mutex::new(Vec::new()));
        let progress_log_clone = progress_log.clone();

        let ctx = JobContext::new(test_job(None, None)).with_progress_callback(
            move |percent, message| {
                progress_log_clone
                    .lock()
                    .unwrap()
                    .push((percent, message.map(String::from)));
            },
        );

        ctx.report_progress(25, Some("Starting"));
        ctx.report_progress(100, None);

        let log = progress_log.lock().unwrap();
        assert_eq!(
            *log,
            vec![(25, Some("Starting".to_string())), (100, None)]
        );
    }

    #[test]
    fn test_can_handle_defaults_to_job_type() {
        struct Fixed;

        #[async_trait]
        impl JobHandler for Fixed {
            fn job_type(&self) -> JobType {
                JobType::MigrateFiles
            }

            async fn execute(&self, _ctx: JobContext) -> JobResult {
                JobResult::Success(None)
            }
        }

        assert!(Fixed.can_handle(JobType::MigrateFiles));
    }
}
