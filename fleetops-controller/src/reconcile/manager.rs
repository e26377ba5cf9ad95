use fleetops_core::domain::Kind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{EventType, ListFilter, ObjectStore, WatchEvent};

use super::{Controller, Reconciler};

/// Feeds store events and periodic resyncs into per-kind controllers
pub struct Manager {
    store: Arc<dyn ObjectStore>,
    controllers: HashMap<Kind, Arc<Controller>>,
    /// Only objects in this namespace are reconciled when set
    scope: Option<String>,
    resync: Duration,
}

impl Manager {
    pub fn new(store: Arc<dyn ObjectStore>, scope: Option<String>, resync: Duration) -> Self {
        Self {
            store,
            controllers: HashMap::new(),
            scope,
            resync,
        }
    }

    /// Registers the reconciler for its kind, replacing any earlier one
    pub fn register(&mut self, reconciler: Arc<dyn Reconciler>, concurrency: usize) {
        let kind = reconciler.kind();
        self.controllers
            .insert(kind, Arc::new(Controller::new(reconciler, concurrency)));
    }

    /// Runs every controller and the dispatch loop until `token` is cancelled
    pub async fn run(self, token: CancellationToken) {
        let mut events = self.store.watch();

        let mut controllers = JoinSet::new();
        for controller in self.controllers.values() {
            controllers.spawn(Arc::clone(controller).run(token.child_token()));
        }

        let mut ticker = time::interval(self.resync);
        info!(
            "Reconciliation manager started ({} kinds, resync every {:?})",
            self.controllers.len(),
            self.resync
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.resync().await,
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watch stream lagged by {} events, resyncing", missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Watch stream closed");
                        break;
                    }
                },
            }
        }

        token.cancel();
        while controllers.join_next().await.is_some() {}
        info!("Reconciliation manager stopped");
    }

    fn filter(&self) -> ListFilter {
        match &self.scope {
            Some(ns) => ListFilter::namespace(ns),
            None => ListFilter::all(),
        }
    }

    /// Enqueues every object of every registered kind
    async fn resync(&self) {
        let filter = self.filter();
        for (kind, controller) in &self.controllers {
            match self.store.list(*kind, &filter).await {
                Ok(objects) => {
                    debug!("Resyncing {} {} object(s)", objects.len(), kind);
                    for obj in objects {
                        controller.queue().add(obj.key()).await;
                    }
                }
                Err(e) => warn!("Failed to list {} for resync: {}", kind, e),
            }
        }
    }

    async fn dispatch(&self, event: WatchEvent) {
        if !self.in_scope(&event) {
            return;
        }

        // Status-only writes never re-trigger business logic
        if event.event == (EventType::Modified { spec_changed: false }) {
            return;
        }

        if let Some(controller) = self.controllers.get(&event.kind) {
            debug!("{} {} {:?}", event.kind, event.key, event.event);
            controller.queue().add(event.key).await;
        }
    }

    fn in_scope(&self, event: &WatchEvent) -> bool {
        self.scope
            .as_ref()
            .is_none_or(|ns| &event.key.namespace == ns)
    }
}
