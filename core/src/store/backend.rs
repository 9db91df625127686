// Storage abstraction for durable key/value persistence
//
// Session state is the only thing trusted across cold starts, so everything
// above this layer is written against the trait and never against sled.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Storage read failed for key {key}: {reason}")]
    Read { key: String, reason: String },
    #[error("Storage write failed for key {key}: {reason}")]
    Write { key: String, reason: String },
}

/// Unified storage trait for durable data persistence
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;
    fn remove(&self, key: &str) -> Result<(), BackendError>;
    fn flush(&self) -> Result<(), BackendError>;
}

/// In-memory storage useful for testing and ephemeral sessions
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Durable storage backed by a sled tree
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let db = sled::open(path).map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| BackendError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.flush()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let value = self.db.get(key.as_bytes()).map_err(|e| BackendError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| BackendError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.flush()
    }

    fn flush(&self) -> Result<(), BackendError> {
        self.db.flush().map_err(|e| BackendError::Write {
            key: "<flush>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
