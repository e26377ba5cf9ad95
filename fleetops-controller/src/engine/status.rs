use fleetops_core::domain::Stateful;
use tracing::warn;

use crate::store::{Objects, StoreError};

use super::EngineSettings;

/// Writes `obj`'s status onto the latest stored version
///
/// The object is re-fetched first so a concurrent spec or metadata change is
/// not clobbered. A failed re-fetch skips the write with a warning, except
/// NotFound which is returned so callers stop working on a deleted run.
/// Version conflicts are retried up to `commit_attempts` times.
pub async fn commit_status<R: Stateful>(
    objects: &Objects<R>,
    obj: &R,
    settings: &EngineSettings,
) -> Result<(), StoreError> {
    let key = obj.key();
    let mut attempt = 1;

    loop {
        let mut latest = match objects.get(&key).await {
            Ok(latest) => latest,
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => {
                warn!("Skipping status write for {} {}: {}", R::KIND, key, e);
                return Ok(());
            }
        };

        *latest.status_mut() = obj.status().clone();

        match objects.update_status(&latest).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_conflict() && attempt < settings.commit_attempts => {
                warn!(
                    "Status write for {} {} conflicted (attempt {}/{}), retrying",
                    R::KIND,
                    key,
                    attempt,
                    settings.commit_attempts
                );
                tokio::time::sleep(settings.commit_backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
