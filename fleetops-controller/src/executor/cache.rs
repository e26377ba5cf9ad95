//! Cached executor connections
//!
//! A cached connection is probed before every reuse. A connectivity error
//! drops it and a fresh one is built, retrying with linear backoff.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ExecError;

/// Builds and health-checks connections for a cache
#[async_trait]
pub trait Connector: Send + Sync {
    /// What a connection is built from; a changed value forces a rebuild
    type Target: Clone + PartialEq + Send + Sync;
    type Conn: Clone + Send + Sync;

    async fn connect(&self, target: &Self::Target) -> Result<Self::Conn, ExecError>;

    /// Cheap existence check run before a cached connection is reused
    async fn probe(&self, conn: &Self::Conn) -> Result<(), ExecError>;
}

pub struct ConnectionCache<C: Connector> {
    connector: C,
    entries: Mutex<HashMap<String, (C::Target, C::Conn)>>,
    attempts: u32,
    backoff: Duration,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(connector: C) -> Self {
        Self::with_retry(connector, 2, Duration::from_secs(1))
    }

    pub fn with_retry(connector: C, attempts: u32, backoff: Duration) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns a healthy connection for `key`, building one if needed
    pub async fn get(&self, key: &str, target: &C::Target) -> Result<C::Conn, ExecError> {
        let cached = self
            .entries
            .lock()
            .await
            .get(key)
            .filter(|(t, _)| t == target)
            .map(|(_, conn)| conn.clone());

        if let Some(conn) = cached {
            match self.connector.probe(&conn).await {
                Ok(()) => return Ok(conn),
                Err(e) if e.is_connectivity() => {
                    warn!("Cached connection {} failed its probe: {}", key, e);
                    self.invalidate(key).await;
                }
                Err(e) => return Err(e),
            }
        }

        let conn = self.connect_with_retry(key, target).await?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (target.clone(), conn.clone()));
        Ok(conn)
    }

    pub async fn invalidate(&self, key: &str) {
        if self.entries.lock().await.remove(key).is_some() {
            debug!("Dropped cached connection {}", key);
        }
    }

    async fn connect_with_retry(&self, key: &str, target: &C::Target) -> Result<C::Conn, ExecError> {
        let mut attempt = 1;
        loop {
            match self.connector.connect(target).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_connectivity() && attempt < self.attempts => {
                    let delay = self.backoff * attempt;
                    warn!(
                        "Connecting {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        key, attempt, self.attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
