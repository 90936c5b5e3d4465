//! Re-entrancy guard for migrations.
//!
//! A migration loads the resource it is migrating, which runs the
//! materialization hook, which would enqueue the same migration again. The
//! guard marks ids as in progress for the current task only: the set lives in
//! a `tokio::task_local!`, follows the task across `.await` points and worker
//! threads, is cleared when the scoped future finishes (normally, with an
//! error, or by unwinding), and is never visible to other tasks.

use std::collections::HashSet;
use std::future::Future;

use crate::models::ResourceId;

tokio::task_local! {
    static IN_PROGRESS: HashSet<ResourceId>;
}

/// Task-scoped set of resource ids whose migration is running.
pub struct MigrationGuard;

impl MigrationGuard {
    /// Run `fut` with `id` marked in progress.
    ///
    /// Nested scopes see the ids of their enclosing scopes. The mark is gone
    /// once `fut` completes or is dropped.
    pub async fn scope<F>(id: ResourceId, fut: F) -> F::Output
    where
        F: Future,
    {
        let mut ids = IN_PROGRESS
            .try_with(|current| current.clone())
            .unwrap_or_default();
        ids.insert(id);
        IN_PROGRESS.scope(ids, fut).await
    }

    /// Whether `id` is being migrated by the current task.
    pub fn is_in_progress(id: &ResourceId) -> bool {
        IN_PROGRESS
            .try_with(|current| current.contains(id))
            .unwrap_or(false)
    }

    /// Ids marked on the current task.
    pub fn current() -> Vec<ResourceId> {
        IN_PROGRESS
            .try_with(|current| current.iter().cloned().collect())
            .unwrap_or_default()
    }
}
