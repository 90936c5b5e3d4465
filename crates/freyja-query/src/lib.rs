//! # freyja-query
//!
//! Federated query router for the Freyja storage layer.
//!
//! This crate provides:
//! - A [`QueryService`] that answers from the primary store first and falls
//!   back to the legacy store
//! - Result merging for multi-result queries, with primary results winning
//!   any id present in both backends
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use freyja_query::{FederatedQueryService, QueryService};
//!
//! let router = FederatedQueryService::new(primary, legacy);
//!
//! // Primary first, then legacy
//! let resource = router.find_by(&"fs-1".into()).await?;
//!
//! // Both backends, de-duplicated
//! let file_sets = router.find_all_of_model("file_set").await?;
//! ```

pub mod merge;
pub mod router;

// Re-export core types
pub use freyja_core::*;

pub use merge::{merge_results, merge_with_stats, order_by_ids, MergeStats};
pub use router::FederatedQueryService;
