use std::collections::HashMap;
use std::path::{Path, PathBuf};

use itin_types::Itinerary;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("itinerary {0} not found")]
    NotFound(String),
    #[error("optimistic write conflict: expected version {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Document Store (DS) collaborator boundary (spec §4.5/§6). Treated as
/// reliable but may fail transiently; `update` enforces optimistic
/// concurrency so concurrent phase workers never silently clobber each
/// other (spec §4.4's per-unit protocol relies on `Conflict`).
///
/// Grounded on `tandem-core::storage::Storage`'s
/// `RwLock<HashMap<String, T>>` + JSON-file flush shape, specialized to
/// itineraries and an append-only revision log in place of session
/// repair/import machinery this domain has no use for.
pub struct Storage {
    base: PathBuf,
    itineraries: RwLock<HashMap<String, Itinerary>>,
    revisions: RwLock<HashMap<String, Vec<Itinerary>>>,
}

impl Storage {
    pub async fn new(base: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        let itineraries_file = base.join("itineraries.json");
        let itineraries = if itineraries_file.exists() {
            let raw = fs::read_to_string(&itineraries_file).await?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            base,
            itineraries: RwLock::new(itineraries),
            revisions: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get(&self, itinerary_id: &str) -> Option<Itinerary> {
        self.itineraries.read().await.get(itinerary_id).cloned()
    }

    /// Unconditional insert used only by the Initialization Service to
    /// persist the freshly created skeleton (version = 1, no prior
    /// version to check against).
    pub async fn create(&self, itinerary: Itinerary) -> Result<(), StorageError> {
        let id = itinerary.itinerary_id.clone();
        self.itineraries.write().await.insert(id, itinerary);
        self.flush().await
    }

    /// Optimistic-version update (spec §4.4 per-unit protocol): succeeds
    /// only if the stored version still equals `expected_version`,
    /// otherwise returns `Conflict` carrying the version actually found
    /// so the caller can re-read and re-apply.
    pub async fn update(&self, itinerary: Itinerary, expected_version: u64) -> Result<(), StorageError> {
        let mut guard = self.itineraries.write().await;
        let current = guard
            .get(&itinerary.itinerary_id)
            .ok_or_else(|| StorageError::NotFound(itinerary.itinerary_id.clone()))?;
        if current.version != expected_version {
            return Err(StorageError::Conflict {
                expected: expected_version,
                actual: current.version,
            });
        }
        guard.insert(itinerary.itinerary_id.clone(), itinerary);
        drop(guard);
        self.flush().await
    }

    /// Appends to the in-memory revision log, keyed by itinerary id, and
    /// flushes it to `<base>/revisions/<id>.json` so an out-of-band
    /// polling client always sees the latest coherent snapshot (spec
    /// §4.5). Called at phase boundaries, not per unit.
    pub async fn save_revision(&self, itinerary: &Itinerary) -> Result<(), StorageError> {
        {
            let mut guard = self.revisions.write().await;
            guard
                .entry(itinerary.itinerary_id.clone())
                .or_default()
                .push(itinerary.clone());
        }
        let dir = self.base.join("revisions");
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", itinerary.itinerary_id));
        let revisions = self.revisions.read().await;
        let log = revisions.get(&itinerary.itinerary_id).cloned().unwrap_or_default();
        let serialized = serde_json::to_string_pretty(&log)?;
        fs::write(path, serialized).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let snapshot = self.itineraries.read().await;
        let serialized = serde_json::to_string_pretty(&*snapshot)?;
        drop(snapshot);
        fs::write(self.base.join("itineraries.json"), serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn sample(id: &str, version: u64) -> Itinerary {
        Itinerary {
            itinerary_id: id.to_string(),
            version,
            user_id: "user-1".to_string(),
            summary: None,
            currency: "USD".to_string(),
            themes: vec![],
            origin: "NYC".to_string(),
            destination: "BCN".to_string(),
            start_date: chrono::NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            days: vec![],
            settings: Default::default(),
            agents: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn update_rejects_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = Storage::new(dir.path()).await.unwrap();
        store.create(sample("trip-1", 1)).await.unwrap();

        let err = store.update(sample("trip-1", 2), 1).await;
        // Note: sample("trip-1", 2) is the proposed *new* document, but
        // expected_version must match the *stored* version (1), so this
        // update should succeed, not conflict.
        assert!(err.is_ok());

        let stale = store.update(sample("trip-1", 3), 1).await;
        assert!(matches!(stale, Err(StorageError::Conflict { expected: 1, actual: 2 })));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Storage::new(dir.path()).await.unwrap();
        assert!(store.get("missing").await.is_none());
    }
}
