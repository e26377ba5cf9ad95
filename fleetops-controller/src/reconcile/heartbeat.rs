use async_trait::async_trait;
use fleetops_core::domain::{Kind, NamespacedName};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::Heartbeat;
use crate::store::ObjectStore;

use super::schedule::{self, CronRegistry};
use super::{Action, ReconcileError, Reconciler};

/// Keeps one heartbeat schedule per Host or Cluster
///
/// The schedule lives as long as the object; an empty crontab disables
/// heartbeats for the kind.
pub struct HeartbeatReconciler {
    kind: Kind,
    store: Arc<dyn ObjectStore>,
    cron: Arc<CronRegistry>,
    heartbeat: Arc<Heartbeat>,
    crontab: String,
}

impl HeartbeatReconciler {
    pub fn new(
        kind: Kind,
        store: Arc<dyn ObjectStore>,
        cron: Arc<CronRegistry>,
        heartbeat: Arc<Heartbeat>,
        crontab: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            store,
            cron,
            heartbeat,
            crontab: crontab.into(),
        }
    }
}

#[async_trait]
impl Reconciler for HeartbeatReconciler {
    fn kind(&self) -> Kind {
        self.kind
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<Action, ReconcileError> {
        match self.store.get(self.kind, key).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if self.cron.remove(self.kind, key).await {
                    debug!("Stopped heartbeat of {} {}", self.kind, key);
                }
                return Ok(Action::Done);
            }
            Err(e) => return Err(e.into()),
        }

        if self.crontab.trim().is_empty() {
            return Ok(Action::Done);
        }

        let heartbeat = self.heartbeat.clone();
        let kind = self.kind;
        let target = key.clone();
        let job = schedule::job(move || {
            let heartbeat = heartbeat.clone();
            let target = target.clone();
            async move {
                if let Err(e) = heartbeat.beat(kind, &target).await {
                    warn!("Heartbeat of {} {} not recorded: {}", kind, target, e);
                }
            }
        });

        match self
            .cron
            .schedule(self.kind, key.clone(), &self.crontab, job)
            .await
        {
            Ok(true) => debug!("Started heartbeat of {} {}", self.kind, key),
            Ok(false) => {}
            Err(e) => warn!("Heartbeat of {} {} not scheduled: {}", self.kind, key, e),
        }

        Ok(Action::Done)
    }
}
