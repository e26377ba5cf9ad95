//! History retention
//!
//! Keeps at most `limit` finished runs per definition, deleting the oldest
//! by start time. Pruning is advisory: failures are logged and never reach
//! the run that triggered it.

use chrono::{DateTime, Utc};
use fleetops_core::domain::pipelinerun::PipelineRun;
use fleetops_core::domain::taskrun::TaskRun;
use fleetops_core::domain::{Kind, NamespacedName, Resource};
use tracing::{info, warn};

use crate::store::{ListFilter, Objects};

type Candidate = (Option<DateTime<Utc>>, NamespacedName);

/// Prunes finished TaskRuns of `task_ref`
///
/// TaskRuns owned by a PipelineRun are left to their parent.
///
/// # Returns
/// Number of runs deleted
pub async fn prune_task_runs(
    taskruns: &Objects<TaskRun>,
    namespace: &str,
    task_ref: &str,
    limit: usize,
) -> usize {
    let runs = match taskruns.list(&ListFilter::namespace(namespace)).await {
        Ok(runs) => runs,
        Err(e) => {
            warn!("Failed to list TaskRuns of {}/{}: {}", namespace, task_ref, e);
            return 0;
        }
    };

    let candidates = runs
        .into_iter()
        .filter(|r| r.spec.task_ref == task_ref)
        .filter(|r| r.status.run_status.is_finished())
        .filter(|r| {
            !r.metadata
                .owner
                .as_ref()
                .is_some_and(|o| o.kind == Kind::PipelineRun)
        })
        .map(|r| (r.status.start_time.or(r.metadata.created_at), r.key()))
        .collect();

    prune_oldest(taskruns, candidates, limit).await
}

/// Prunes finished PipelineRuns of `pipeline_ref`
pub async fn prune_pipeline_runs(
    pipelineruns: &Objects<PipelineRun>,
    namespace: &str,
    pipeline_ref: &str,
    limit: usize,
) -> usize {
    let runs = match pipelineruns.list(&ListFilter::namespace(namespace)).await {
        Ok(runs) => runs,
        Err(e) => {
            warn!("Failed to list PipelineRuns of {}/{}: {}", namespace, pipeline_ref, e);
            return 0;
        }
    };

    let candidates = runs
        .into_iter()
        .filter(|r| r.spec.pipeline_ref == pipeline_ref)
        .filter(|r| r.status.run_status.is_finished())
        .map(|r| (r.status.start_time.or(r.metadata.created_at), r.key()))
        .collect();

    prune_oldest(pipelineruns, candidates, limit).await
}

async fn prune_oldest<R: Resource>(
    objects: &Objects<R>,
    mut candidates: Vec<Candidate>,
    limit: usize,
) -> usize {
    if candidates.len() <= limit {
        return 0;
    }

    // Runs without a start time sort first
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = candidates.len() - limit;

    let mut deleted = 0;
    for (_, key) in candidates.into_iter().take(excess) {
        match objects.delete(&key).await {
            Ok(()) => {
                info!("Pruned {} {}", R::KIND, key);
                deleted += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to prune {} {}: {}", R::KIND, key, e),
        }
    }
    deleted
}
