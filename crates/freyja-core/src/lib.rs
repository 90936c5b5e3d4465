//! # freyja-core
//!
//! Core types, traits, and migration primitives for the Freyja storage layer.
//!
//! This crate provides the data model shared by every backend, the traits
//! each collaborator implements, and the pieces of the lazy migration that do
//! not depend on a particular backend: the legacy ownership test, derivative
//! classification, the re-entrancy guard, and the resource materializer.
//!
//! ## Logging
//!
//! Every crate logs through `tracing` with the same structured fields, so
//! the read path, the trigger and the worker can be queried together:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | `query`, `db`, `storage`, `jobs`, `migration` |
//! | `component` | part of a subsystem, e.g. `router`, `trigger`, `pool` |
//! | `op` | logical operation, e.g. `find_by`, `upload` |
//! | `resource_id`, `file_id`, `job_id` | entity being worked on |
//! | `decision` | trigger outcome (`MigrationDecision::as_str`) |
//! | `derivative_count`, `file_count`, `result_count` | sizes |
//! | `duration_ms` | wall-clock time |
//! | `error` | error message |
//!
//! Levels: ERROR for degraded service, WARN when a fallback was applied, INFO
//! for lifecycle and completed migrations, DEBUG for decisions, TRACE per item.

pub mod config;
pub mod defaults;
pub mod derivatives;
pub mod error;
pub mod guard;
pub mod legacy;
pub mod materializer;
pub mod memory;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use config::MigrationConfig;
pub use derivatives::{container_for, detect_content_type, mime_type_for};
pub use error::{Error, ItemFailure, Result};
pub use guard::MigrationGuard;
pub use legacy::LegacyLocatorConfig;
pub use materializer::ResourceFactory;
pub use memory::MemoryQueryService;
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
