//! File-backed persistent store: one JSON document per service.

use crate::error::StoreError;
use crate::locks::KeyedLocks;
use crate::store::ServiceStore;
use crate::types::ServiceRecord;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

const RECORD_EXTENSION: &str = "json";

/// Persistent store writing each record to `<dir>/<hex(service_id)>.json`.
///
/// Writes go to a temp file and are renamed into place, so readers always see
/// either the old or the new record. A per-ID lock serializes writers of the
/// same service without blocking writers of other services.
pub struct FileStore {
    dir: PathBuf,
    locks: KeyedLocks,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!("Service store at {:?}", dir);

        Ok(Self {
            dir,
            locks: KeyedLocks::new(),
        })
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, service_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(service_id), RECORD_EXTENSION))
    }

    /// IDs with a write in flight.
    pub fn pending_writes(&self) -> usize {
        self.locks.len()
    }

    async fn read_record(path: &Path) -> Result<Option<ServiceRecord>, StoreError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ServiceStore for FileStore {
    async fn load(&self, service_id: &str) -> Result<Option<ServiceRecord>, StoreError> {
        Self::read_record(&self.record_path(service_id)).await
    }

    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                // Deleted between listing and reading
                Ok(None) => {}
                Err(StoreError::Serialization(e)) => {
                    warn!("Skipping unreadable service record {:?}: {}", path, e);
                }
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(records)
    }

    #[instrument(skip(self, record), fields(service_id = %record.service_id))]
    async fn save(&self, record: &ServiceRecord) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(&record.service_id);
        let temp_path = path.with_extension("tmp");

        let _guard = self.locks.lock(&record.service_id).await;

        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved service record ({} bytes) to {:?}", data.len(), path);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, service_id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(service_id).await;

        match fs::remove_file(self.record_path(service_id)).await {
            Ok(()) => {
                debug!("Deleted service record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
