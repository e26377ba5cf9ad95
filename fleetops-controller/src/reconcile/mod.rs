//! Reconciliation driver
//!
//! Watch events and periodic resyncs become object keys on a per-kind
//! work queue. A [`Controller`] drains each queue with a bounded worker
//! pool and hands every key to that kind's [`Reconciler`], which reads the
//! current state and converges it.
//!
//! Reconcilers must be idempotent: a key may be delivered many times, late,
//! or after the object is gone.

mod controller;
mod heartbeat;
mod manager;
mod pipeline;
mod pipelinerun;
mod queue;
pub mod schedule;
mod task;
mod taskrun;

pub use controller::Controller;
pub use heartbeat::HeartbeatReconciler;
pub use manager::Manager;
pub use pipeline::PipelineReconciler;
pub use pipelinerun::PipelineRunReconciler;
pub use schedule::CronRegistry;
pub use task::TaskReconciler;
pub use taskrun::TaskRunReconciler;

use async_trait::async_trait;
use fleetops_core::domain::{Kind, NamespacedName, Resource};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::store::{ListFilter, Objects, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the controller does with a key after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> Kind;

    /// Converges the object at `key`
    ///
    /// An error requeues the key with backoff.
    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError>;
}

/// Deletes every object whose parent link points at `owner_kind`/`owner`
///
/// # Returns
/// Number of objects deleted
pub async fn delete_owned<R: Resource>(
    objects: &Objects<R>,
    owner_kind: Kind,
    owner: &NamespacedName,
) -> Result<usize, StoreError> {
    let filter = ListFilter::namespace(&owner.namespace).owned_by(owner_kind, &owner.name);

    let mut deleted = 0;
    for obj in objects.list(&filter).await? {
        match objects.delete(&obj.key()).await {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if deleted > 0 {
        info!("Deleted {} {} owned by {} {}", deleted, R::KIND, owner_kind, owner);
    }
    Ok(deleted)
}
