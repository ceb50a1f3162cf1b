//! Repository interface for the in-memory stores.
//!
//! Stores load a whole document on `reload` and write a whole document on
//! flush. A store that mutated since the last flush hands out a
//! [`PendingFlush`] snapshot; if writing it fails the store must be marked
//! dirty again so the next flush retries.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::DataError;

pub trait Repository<T>: Send + Sync {
    /// Load the stored document. `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<T>, DataError>;

    /// Replace the stored document.
    fn store(&self, value: &T) -> Result<(), DataError>;
}

/// Pretty-printed JSON file, replaced atomically via a temporary file.
/// Every write uses its own temporary file, so concurrent writers never
/// rename each other's half-written data.
pub struct JsonFileRepository<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileRepository<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Repository<T> for JsonFileRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, DataError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn store(&self, value: &T) -> Result<(), DataError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

/// Keeps the serialized document in memory. Used when persistence is off
/// and in tests.
pub struct MemoryRepository<T> {
    stored: Mutex<Option<String>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            stored: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stored.lock().is_none()
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Repository<T> for MemoryRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, DataError> {
        match self.stored.lock().as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn store(&self, value: &T) -> Result<(), DataError> {
        *self.stored.lock() = Some(serde_json::to_string(value)?);
        Ok(())
    }
}

/// Snapshot of a store's document waiting to be written.
pub struct PendingFlush<T> {
    repo: Arc<dyn Repository<T>>,
    document: T,
}

impl<T> PendingFlush<T> {
    pub fn new(repo: Arc<dyn Repository<T>>, document: T) -> Self {
        Self { repo, document }
    }

    pub fn document(&self) -> &T {
        &self.document
    }

    /// Write the snapshot. Blocking; run it off the authority.
    pub fn write(self) -> Result<(), DataError> {
        self.repo.store(&self.document)
    }
}
