//! # freyja-jobs
//!
//! Lazy file migration for the Freyja storage layer.
//!
//! This crate provides:
//! - The migration trigger run on every materialized resource
//! - The migration worker that copies derivatives and legacy-owned files into
//!   the destination backend
//! - A priority job queue runtime with retries, progress, and worker events
//! - The HTTP reader for legacy content and the pairtree derivative enumerator
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use freyja_jobs::{MigrateFilesHandler, MigrationWorker, WorkerBuilder, WorkerConfig};
//!
//! let worker = Arc::new(MigrationWorker::new(query, files, storage, derivatives, content));
//!
//! let handle = WorkerBuilder::new(jobs)
//!     .with_config(WorkerConfig::default().with_poll_interval(1000))
//!     .with_handler(MigrateFilesHandler::new(worker))
//!     .build()
//!     .await
//!     .start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod derivative_paths;
pub mod handler;
pub mod locator;
pub mod migration;
pub mod queue;
pub mod trigger;
pub mod worker;

// Re-export core types
pub use freyja_core::*;
pub use freyja_query::FederatedQueryService;

pub use derivative_paths::{pair_path, PairtreeDerivativePaths};
pub use handler::{JobContext, JobHandler, JobResult, ProgressCallback};
pub use locator::LegacyContentLocator;
pub use migration::{MigrateFilesHandler, MigrationReport, MigrationWorker};
pub use queue::InMemoryJobRepository;
pub use trigger::MigrationTrigger;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = freyja_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = freyja_core::defaults::JOB_POLL_INTERVAL_MS;
