//! Background job runtime.
//!
//! A [`JobWorker`] claims up to `max_concurrent_jobs` jobs at a time, runs
//! each on its own task under the per-job timeout, and writes the outcome
//! back to the [`JobRepository`]. With nothing to claim it waits for the poll
//! interval or for a wakeup from the repository, whichever comes first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use freyja_core::{defaults, Error, Job, JobRepository, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle wait between claims in milliseconds.
    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    pub enabled: bool,
    /// A job running longer than this is handed back to the queue.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Idle wait when the queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `1800` | Per-job timeout |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("JOB_WORKER_ENABLED") {
            config.enabled = v != "false" && v != "0";
        }
        if let Some(n) = lookup("JOB_MAX_CONCURRENT").and_then(|v| v.parse::<usize>().ok()) {
            config.max_concurrent_jobs = n.max(1);
        }
        if let Some(ms) = lookup("JOB_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = lookup("JOB_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.job_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted { job_id: Uuid, job_type: JobType },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// `retry` is true when the job went back to the queue.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        retry: bool,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask the worker to stop once its current batch has finished.
    ///
    /// Fails when the worker loop is no longer running.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .map_err(|_| Error::Internal("Job worker is not running".into()))
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Shared state of the tasks running claimed jobs.
struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl JobRunner {
    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Progress callback that broadcasts and persists each update.
    fn progress_for(&self, job_id: Uuid) -> impl Fn(i32, Option<&str>) + Send + Sync + 'static {
        let event_tx = self.event_tx.clone();
        let jobs = self.jobs.clone();
        move |percent, message| {
            let message = message.map(String::from);
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id,
                percent,
                message: message.clone(),
            });
            let jobs = jobs.clone();
            tokio::spawn(async move {
                if let Err(e) = jobs
                    .update_progress(job_id, percent, message.as_deref())
                    .await
                {
                    debug!(subsystem = "jobs", %job_id, error = %e, "Failed to record job progress");
                }
            });
        }
    }

    async fn run(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;

        info!(
            subsystem = "jobs",
            job_id = %job_id,
            job_type = job_type.as_str(),
            resource_id = job.resource_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            attempt = job.retry_count + 1,
            "Processing job"
        );
        self.emit(WorkerEvent::JobStarted { job_id, job_type });

        let result = match self.handlers.get(&job_type) {
            Some(handler) => {
                let ctx = JobContext::new(job).with_progress_callback(self.progress_for(job_id));
                tokio::time::timeout(self.job_timeout, handler.execute(ctx))
                    .await
                    .unwrap_or_else(|_| {
                        JobResult::Retry(format!(
                            "Job exceeded timeout of {}s",
                            self.job_timeout.as_secs_f32()
                        ))
                    })
            }
            None => JobResult::Failed(format!("No handler for job type {}", job_type.as_str())),
        };

        self.settle(job_id, job_type, result, start).await;
    }

    /// Write the outcome back to the queue and announce it.
    async fn settle(&self, job_id: Uuid, job_type: JobType, result: JobResult, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;

        let (recorded, event) = match result {
            JobResult::Success(data) => (
                self.jobs.complete(job_id, data).await,
                WorkerEvent::JobCompleted { job_id, job_type },
            ),
            JobResult::Retry(error) => (
                self.jobs.fail(job_id, &error).await,
                WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                    retry: true,
                },
            ),
            JobResult::Failed(error) => (
                self.jobs.fail_permanently(job_id, &error).await,
                WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                    retry: false,
                },
            ),
        };

        if let Err(e) = recorded {
            error!(subsystem = "jobs", %job_id, error = %e, "Failed to record job outcome");
            return;
        }

        match &event {
            WorkerEvent::JobFailed { error, retry, .. } => warn!(
                subsystem = "jobs",
                job_id = %job_id,
                job_type = job_type.as_str(),
                %error,
                retry,
                duration_ms,
                "Job failed"
            ),
            _ => info!(
                subsystem = "jobs",
                job_id = %job_id,
                job_type = job_type.as_str(),
                duration_ms,
                "Job completed"
            ),
        }
        self.emit(event);
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    runner: Arc<JobRunner>,
    config: WorkerConfig,
    wakeup: Option<Arc<Notify>>,
}

impl JobWorker {
    /// Spawn the worker loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.runner.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip_all, fields(subsystem = "jobs"))]
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Job worker is disabled, not starting");
            return;
        }

        let job_types: Vec<JobType> = self.runner.handlers.keys().copied().collect();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let batch_size = self.config.max_concurrent_jobs.max(1);

        info!(
            subsystem = "jobs",
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = batch_size,
            wakeups = self.wakeup.is_some(),
            "Job worker started"
        );
        self.runner.emit(WorkerEvent::WorkerStarted);

        while !*shutdown_rx.borrow() {
            let mut tasks = JoinSet::new();
            while tasks.len() < batch_size {
                let Some(job) = self.claim(&job_types).await else {
                    break;
                };
                let runner = self.runner.clone();
                tasks.spawn(async move { runner.run(job).await });
            }

            if tasks.is_empty() {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // Handle dropped.
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(poll_interval) => {}
                    _ = wait_for(self.wakeup.as_deref()) => {
                        debug!(subsystem = "jobs", "Woken by newly queued job");
                    }
                }
                continue;
            }

            debug!(subsystem = "jobs", claimed = tasks.len(), "Running job batch");
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(subsystem = "jobs", error = %e, "Job task panicked");
                }
            }
        }

        self.runner.emit(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", "Job worker stopped");
    }

    async fn claim(&self, job_types: &[JobType]) -> Option<Job> {
        if job_types.is_empty() {
            return None;
        }
        match self.runner.jobs.claim_next_for_types(job_types).await {
            Ok(job) => job,
            Err(e) => {
                error!(subsystem = "jobs", error = %e, "Failed to claim job");
                None
            }
        }
    }
}

/// Resolves on the next wakeup, or never without a notify handle.
async fn wait_for(wakeup: Option<&Notify>) {
    match wakeup {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    wakeup: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: HashMap::new(),
            wakeup: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler; a later handler for the same job type replaces
    /// the earlier one.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.job_type(), Arc::new(handler));
        self
    }

    /// Wake the idle worker as soon as the repository queues a job.
    pub fn with_wakeup(mut self, notify: Arc<Notify>) -> Self {
        self.wakeup = Some(notify);
        self
    }

    pub async fn build(self) -> JobWorker {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        for job_type in self.handlers.keys() {
            debug!(subsystem = "jobs", job_type = job_type.as_str(), "Registered job handler");
        }

        JobWorker {
            runner: Arc::new(JobRunner {
                jobs: self.jobs,
                handlers: self.handlers,
                event_tx,
                job_timeout: self.config.job_timeout,
            }),
            config: self.config,
            wakeup: self.wakeup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, defaults::JOB_MAX_CONCURRENT);
        assert_eq!(config.job_timeout, Duration::from_secs(defaults::JOB_TIMEOUT_SECS));
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_from_lookup() {
        let config = WorkerConfig::from_lookup(|key| match key {
            "JOB_WORKER_ENABLED" => Some("0".to_string()),
            "JOB_MAX_CONCURRENT" => Some("0".to_string()),
            "JOB_TIMEOUT_SECS" => Some("90".to_string()),
            "JOB_POLL_INTERVAL_MS" => Some("soon".to_string()),
            _ => None,
        });

        assert!(!config.enabled);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.job_timeout, Duration::from_secs(90));
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
    }

    #[tokio::test]
    async fn test_wait_for_without_handle_never_resolves() {
        let waited = tokio::time::timeout(Duration::from_millis(20), wait_for(None)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_keeps_a_stored_permit() {
        let notify = Notify::new();
        notify.notify_one();
        let waited = tokio::time::timeout(Duration::from_millis(20), wait_for(Some(&notify))).await;
        assert!(waited.is_ok());
    }
}
