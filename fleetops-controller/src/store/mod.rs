//! Desired-state store
//!
//! The controller reads and writes every object through [`ObjectStore`]:
//! - spec writes (`update`) and status writes (`update_status`) are separate
//!   paths, both guarded by the object's `resource_version`
//! - every committed write is published as a [`WatchEvent`]
//!
//! [`Objects`] wraps a store with typed access for one resource kind.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use fleetops_core::domain::{DynObject, Kind, NamespacedName, ObjectMeta, Resource};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the watch channel before slow subscribers lag
pub const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: NamespacedName },

    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: Kind, key: NamespacedName },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: Kind, key: NamespacedName },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What happened to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified { spec_changed: bool },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: Kind,
    pub key: NamespacedName,
    pub event: EventType,
}

/// Narrows a list by namespace, labels and owner
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub owner: Option<(Kind, String)>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn owned_by(mut self, kind: Kind, name: impl Into<String>) -> Self {
        self.owner = Some((kind, name.into()));
        self
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if let Some(ns) = &self.namespace {
            if &meta.namespace != ns {
                return false;
            }
        }

        if !self
            .labels
            .iter()
            .all(|(k, v)| meta.labels.get(k) == Some(v))
        {
            return false;
        }

        match &self.owner {
            Some((kind, name)) => meta.is_owned_by(*kind, name),
            None => true,
        }
    }
}

/// Watchable object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: Kind, key: &NamespacedName) -> Result<DynObject>;

    /// Lists objects of `kind` ordered by namespace and name
    async fn list(&self, kind: Kind, filter: &ListFilter) -> Result<Vec<DynObject>>;

    /// Stores a new object, assigning uid, version and creation time
    async fn create(&self, obj: DynObject) -> Result<DynObject>;

    /// Replaces metadata and spec, keeping the stored status
    ///
    /// A non-zero `resource_version` must match the stored one.
    async fn update(&self, obj: DynObject) -> Result<DynObject>;

    /// Replaces only the status
    async fn update_status(&self, obj: DynObject) -> Result<DynObject>;

    async fn delete(&self, kind: Kind, key: &NamespacedName) -> Result<()>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Typed access to one kind
pub struct Objects<R> {
    store: Arc<dyn ObjectStore>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for Objects<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<R: Resource> Objects<R> {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, key: &NamespacedName) -> Result<R> {
        let obj = self.store.get(R::KIND, key).await?;
        Ok(R::from_dyn(obj)?)
    }

    /// Like `get`, mapping NotFound to `None`
    pub async fn get_opt(&self, key: &NamespacedName) -> Result<Option<R>> {
        match self.get(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<R>> {
        self.store
            .list(R::KIND, filter)
            .await?
            .into_iter()
            .map(|obj| R::from_dyn(obj).map_err(StoreError::from))
            .collect()
    }

    pub async fn create(&self, obj: &R) -> Result<R> {
        let created = self.store.create(obj.to_dyn()?).await?;
        Ok(R::from_dyn(created)?)
    }

    pub async fn update(&self, obj: &R) -> Result<R> {
        let updated = self.store.update(obj.to_dyn()?).await?;
        Ok(R::from_dyn(updated)?)
    }

    pub async fn update_status(&self, obj: &R) -> Result<R> {
        let updated = self.store.update_status(obj.to_dyn()?).await?;
        Ok(R::from_dyn(updated)?)
    }

    pub async fn delete(&self, key: &NamespacedName) -> Result<()> {
        self.store.delete(R::KIND, key).await
    }
}
