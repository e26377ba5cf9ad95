//! Postgres store
//!
//! Objects live in one `objects` table (see `db::run_migrations`). Writes are
//! compare-and-swap on `resource_version`. Watch events are published for
//! writes made through this process; periodic resync picks up the rest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_core::domain::{DynObject, Kind, NamespacedName, ObjectMeta};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{EventType, ListFilter, ObjectStore, Result, StoreError, WATCH_CAPACITY, WatchEvent};

pub struct PgStore {
    pool: PgPool,
    events: broadcast::Sender<WatchEvent>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self { pool, events }
    }

    fn publish(&self, kind: Kind, key: NamespacedName, event: EventType) {
        let _ = self.events.send(WatchEvent { kind, key, event });
    }

    async fn fetch(&self, kind: Kind, key: &NamespacedName) -> Result<Option<DynObject>> {
        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            SELECT kind, namespace, name, uid, resource_version, metadata, spec, status, created_at
            FROM objects
            WHERE kind = $1 AND namespace = $2 AND name = $3
            "#,
        )
        .bind(kind.as_str())
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ObjectRow::into_object).transpose()
    }

    fn missing(kind: Kind, key: &NamespacedName) -> StoreError {
        StoreError::NotFound {
            kind,
            key: key.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for PgStore {
    async fn get(&self, kind: Kind, key: &NamespacedName) -> Result<DynObject> {
        self.fetch(kind, key)
            .await?
            .ok_or_else(|| Self::missing(kind, key))
    }

    async fn list(&self, kind: Kind, filter: &ListFilter) -> Result<Vec<DynObject>> {
        let rows = sqlx::query_as::<_, ObjectRow>(
            r#"
            SELECT kind, namespace, name, uid, resource_version, metadata, spec, status, created_at
            FROM objects
            WHERE kind = $1 AND ($2::TEXT IS NULL OR namespace = $2)
            ORDER BY namespace, name
            "#,
        )
        .bind(kind.as_str())
        .bind(filter.namespace.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let obj = row.into_object()?;
            if filter.matches(&obj.metadata) {
                objects.push(obj);
            }
        }
        Ok(objects)
    }

    async fn create(&self, mut obj: DynObject) -> Result<DynObject> {
        let key = obj.key();
        if obj.metadata.uid.is_nil() {
            obj.metadata.uid = Uuid::new_v4();
        }
        obj.metadata.resource_version = 1;
        let created_at = *obj.metadata.created_at.get_or_insert_with(Utc::now);

        let result = sqlx::query(
            r#"
            INSERT INTO objects (kind, namespace, name, uid, resource_version, metadata, spec, status, created_at)
            VALUES ($1, $2, $3, $4, 1, $5, $6, $7, $8)
            ON CONFLICT (kind, namespace, name) DO NOTHING
            "#,
        )
        .bind(obj.kind.as_str())
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(obj.metadata.uid)
        .bind(serde_json::to_value(&obj.metadata)?)
        .bind(&obj.spec)
        .bind(&obj.status)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: obj.kind,
                key,
            });
        }

        self.publish(obj.kind, key, EventType::Added);
        Ok(obj)
    }

    async fn update(&self, obj: DynObject) -> Result<DynObject> {
        let key = obj.key();
        let stored = self
            .fetch(obj.kind, &key)
            .await?
            .ok_or_else(|| Self::missing(obj.kind, &key))?;

        let expected = match obj.metadata.resource_version {
            0 => stored.metadata.resource_version,
            v => v,
        };

        let mut metadata = stored.metadata.clone();
        metadata.labels = obj.metadata.labels;
        metadata.owner = obj.metadata.owner;

        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            UPDATE objects
            SET metadata = $4, spec = $5, resource_version = resource_version + 1
            WHERE kind = $1 AND namespace = $2 AND name = $3 AND resource_version = $6
            RETURNING kind, namespace, name, uid, resource_version, metadata, spec, status, created_at
            "#,
        )
        .bind(obj.kind.as_str())
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(serde_json::to_value(&metadata)?)
        .bind(&obj.spec)
        .bind(expected as i64)
        .fetch_optional(&self.pool)
        .await?;

        let updated = match row {
            Some(row) => row.into_object()?,
            None => {
                return Err(StoreError::Conflict {
                    kind: obj.kind,
                    key,
                });
            }
        };

        let spec_changed = stored.spec != updated.spec;
        self.publish(updated.kind, key, EventType::Modified { spec_changed });
        Ok(updated)
    }

    async fn update_status(&self, obj: DynObject) -> Result<DynObject> {
        let key = obj.key();

        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            UPDATE objects
            SET status = $4, resource_version = resource_version + 1
            WHERE kind = $1 AND namespace = $2 AND name = $3
              AND ($5 = 0 OR resource_version = $5)
            RETURNING kind, namespace, name, uid, resource_version, metadata, spec, status, created_at
            "#,
        )
        .bind(obj.kind.as_str())
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(&obj.status)
        .bind(obj.metadata.resource_version as i64)
        .fetch_optional(&self.pool)
        .await?;

        let updated = match row {
            Some(row) => row.into_object()?,
            None if self.fetch(obj.kind, &key).await?.is_some() => {
                return Err(StoreError::Conflict {
                    kind: obj.kind,
                    key,
                });
            }
            None => return Err(Self::missing(obj.kind, &key)),
        };

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
        let result =
            sqlx::query("DELETE FROM objects WHERE kind = $1 AND namespace = $2 AND name = $3")
                .bind(kind.as_str())
                .bind(&key.namespace)
                .bind(&key.name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Self::missing(kind, key));
        }

        self.publish(kind, key.clone(), EventType::Deleted);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[derive(sqlx::FromRow)]
struct ObjectRow {
    kind: String,
    namespace: String,
    name: String,
    uid: Uuid,
    resource_version: i64,
    metadata: Value,
    spec: Value,
    status: Value,
    created_at: DateTime<Utc>,
}

impl ObjectRow {
    fn into_object(self) -> Result<DynObject> {
        let kind: Kind = self.kind.parse().map_err(|e: String| {
            StoreError::Serialization(serde::de::Error::custom(e))
        })?;

        let mut metadata: ObjectMeta = serde_json::from_value(self.metadata)?;
        metadata.namespace = self.namespace;
        metadata.name = self.name;
        metadata.uid = self.uid;
        metadata.resource_version = self.resource_version as u64;
        metadata.created_at = Some(self.created_at);

        Ok(DynObject {
            kind,
            metadata,
            spec: self.spec,
            status: self.status,
        })
    }
}
