//! In-memory store
//!
//! Default backend when no database is configured, and the backend every
//! controller test runs against.

use async_trait::async_trait;
use chrono::Utc;
use fleetops_core::domain::{DynObject, Kind, NamespacedName};
use std::collections::BTreeMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::{EventType, ListFilter, ObjectStore, Result, StoreError, WATCH_CAPACITY, WatchEvent};

pub struct MemoryStore {
    objects: RwLock<BTreeMap<(Kind, NamespacedName), DynObject>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn publish(&self, kind: Kind, key: NamespacedName, event: EventType) {
        debug!(%kind, %key, ?event, "publishing watch event");
        // No subscribers is fine
        let _ = self.events.send(WatchEvent { kind, key, event });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: Kind, key: &NamespacedName) -> Result<DynObject> {
        self.objects
            .read()
            .await
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })
    }

    async fn list(&self, kind: Kind, filter: &ListFilter) -> Result<Vec<DynObject>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|((k, _), obj)| *k == kind && filter.matches(&obj.metadata))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, mut obj: DynObject) -> Result<DynObject> {
        let key = obj.key();
        let mut objects = self.objects.write().await;

        if objects.contains_key(&(obj.kind, key.clone())) {
            return Err(StoreError::AlreadyExists {
                kind: obj.kind,
                key,
            });
        }

        if obj.metadata.uid.is_nil() {
            obj.metadata.uid = Uuid::new_v4();
        }
        obj.metadata.resource_version = 1;
        obj.metadata.created_at.get_or_insert_with(Utc::now);

        objects.insert((obj.kind, key.clone()), obj.clone());
        drop(objects);

        self.publish(obj.kind, key, EventType::Added);
        Ok(obj)
    }

    async fn update(&self, obj: DynObject) -> Result<DynObject> {
        let key = obj.key();
        let mut objects = self.objects.write().await;

        let stored = objects
            .get_mut(&(obj.kind, key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                kind: obj.kind,
                key: key.clone(),
            })?;

        if obj.metadata.resource_version != 0
            && obj.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(StoreError::Conflict {
                kind: obj.kind,
                key,
            });
        }

        let spec_changed = stored.spec != obj.spec;
        stored.metadata.labels = obj.metadata.labels;
        stored.metadata.owner = obj.metadata.owner;
        stored.spec = obj.spec;
        stored.metadata.resource_version += 1;
        let updated = stored.clone();
        drop(objects);

        self.publish(updated.kind, key, EventType::Modified { spec_changed });
        Ok(updated)
    }

    async fn update_status(&self, obj: DynObject) -> Result<DynObject> {
        let key = obj.key();
        let mut objects = self.objects.write().await;

        let stored = objects
            .get_mut(&(obj.kind, key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                kind: obj.kind,
                key: key.clone(),
            })?;

        if obj.metadata.resource_version != 0
            && obj.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(StoreError::Conflict {
                kind: obj.kind,
                key,
            });
        }

        stored.status = obj.status;
        stored.metadata.resource_version += 1;
        let updated = stored.clone();
        drop(objects);

        self.publish(
            updated.kind,
            key,
            EventType::Modified {
                spec_changed: false,
            },
        );
        Ok(updated)
    }

    async fn delete(&self, kind: Kind, key: &NamespacedName) -> Result<()> {
        let removed = self.objects.write().await.remove(&(kind, key.clone()));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        }

        self.publish(kind, key.clone(), EventType::Deleted);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
