use std::sync::Arc;
use chrono::Utc;

use super::backend::StorageBackend;
use crate::errors::{SearchError, SearchResult};

/// Key written and removed while probing a backend
pub const PROBE_KEY: &str = "ainote-search-probe";

/// Write, read back, compare and delete a probe value
pub async fn probe_backend(backend: &dyn StorageBackend) -> SearchResult<()> {
    let value = format!("probe-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());

    backend.set(PROBE_KEY, &value).await?;
    let read_back = backend.get(PROBE_KEY).await?;
    backend.remove(PROBE_KEY).await?;

    match read_back {
        Some(stored) if stored == value => Ok(()),
        Some(_) => Err(SearchError::storage("probe value came back altered")),
        None => Err(SearchError::storage("probe value was not persisted")),
    }
}

/// Pick the first candidate that passes a probe
///
/// Candidates are tried in the given order, so callers list the preferred
/// backend first. Probe failures are logged and never escape; only when every
/// candidate fails does the selector return [`SearchError::StorageUnavailable`].
pub async fn select_backend(candidates: &[Arc<dyn StorageBackend>]) -> SearchResult<Arc<dyn StorageBackend>> {
    let mut attempted = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match probe_backend(candidate.as_ref()).await {
            Ok(()) => {
                log::info!("💾 Using '{}' storage backend ({:?})", candidate.name(), candidate.kind());
                return Ok(Arc::clone(candidate));
            }
            Err(e) => {
                log::warn!("⚠️ Storage backend '{}' failed its probe: {}", candidate.name(), e);
                attempted.push(format!("{} ({})", candidate.name(), e));
            }
        }
    }

    log::error!("❌ No usable storage backend among {} candidates", candidates.len());
    Err(SearchError::StorageUnavailable {
        attempted: if attempted.is_empty() {
            "no candidates".to_string()
        } else {
            attempted.join(", ")
        },
    })
}
