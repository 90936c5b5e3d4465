//! Centralized default constants for Freyja.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// LEGACY STORE
// =============================================================================

/// Identifier prefix marking bytes still owned by the legacy store.
pub const LEGACY_PREFIX: &str = "fedora:";

/// Scheme the legacy prefix is rewritten to when fetching bytes.
pub const LEGACY_REWRITE: &str = "http:";

/// Timeout for a single legacy content fetch in seconds.
pub const LEGACY_FETCH_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// DESTINATION STORAGE
// =============================================================================

/// Identifier prefix for files written by the filesystem storage backend.
pub const DISK_PREFIX: &str = "disk://";

/// Default root of the filesystem storage backend.
pub const STORAGE_PATH: &str = "./storage/files";

/// Default root of generated derivative files.
pub const DERIVATIVES_PATH: &str = "./storage/derivatives";

/// MIME type used when an extension is unknown.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

// =============================================================================
// DATABASE
// =============================================================================

/// Default pool size for the primary metadata store.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default pool size for the legacy metadata store.
pub const LEGACY_DB_MAX_CONNECTIONS: u32 = 4;

/// Default time to wait for a pooled connection in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum retry count for failed jobs.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default priority for migration jobs (higher runs first).
pub const MIGRATION_JOB_PRIORITY: i32 = 0;

/// Default job worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default job execution timeout in seconds (30 minutes; large files stream slowly).
pub const JOB_TIMEOUT_SECS: u64 = 1800;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// `any` or `all`; see `MigrationPolicy`.
pub const ENV_MIGRATION_POLICY: &str = "FREYJA_MIGRATION_POLICY";

/// Legacy identifier prefix override.
pub const ENV_LEGACY_PREFIX: &str = "FREYJA_LEGACY_PREFIX";

/// Legacy rewrite scheme override.
pub const ENV_LEGACY_REWRITE: &str = "FREYJA_LEGACY_REWRITE";

/// Derivatives root override.
pub const ENV_DERIVATIVES_PATH: &str = "FREYJA_DERIVATIVES_PATH";

/// Filesystem storage root override.
pub const ENV_STORAGE_PATH: &str = "FREYJA_STORAGE_PATH";
