//! Block storage for the datasource.
//!
//! Every faction document and translation map lives in a single object store
//! as an independent "block" addressed by an opaque string key. Blocks are
//! always replaced whole; the store never merges or patches a value.
//!
//! On WASM targets, the store is backed by IndexedDB. On native targets an
//! in-memory implementation is provided for development and testing.

#[cfg(target_arch = "wasm32")]
mod indexeddb;

#[cfg(target_arch = "wasm32")]
pub use indexeddb::IndexedDbStore;

#[cfg(not(target_arch = "wasm32"))]
pub use native::MemoryStore;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The database could not be opened or initialized.
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),
    /// A transaction failed to complete.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    /// The persistence layer refused a write (quota exceeded, corrupted store).
    #[error("Write rejected for block {key}: {reason}")]
    WriteRejected { key: String, reason: String },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An unexpected error occurred.
    #[error("Storage error: {0}")]
    Other(String),
}

/// Every block currently persisted, keyed by block key.
pub type BlockMap = BTreeMap<String, Value>;

/// A generic key-value storage interface.
///
/// Implementations can use different backends (IndexedDB, in-memory, ...)
/// while providing a consistent API. Values are JSON documents with no
/// schema imposed by the store.
///
/// Note: This trait does not require `Send` bounds since WASM is single-threaded
/// and JS types cannot be sent between threads.
pub trait KeyValueStore {
    /// Stores a value under the given key.
    ///
    /// If a value already exists for the key, it will be overwritten.
    fn put<T: Serialize + 'static>(
        &self,
        key: &str,
        value: &T,
    ) -> impl Future<Output = Result<(), StorageError>>;

    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key has never been written.
    fn get<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>, StorageError>>;

    /// Retrieves every stored block.
    fn get_all(&self) -> impl Future<Output = Result<BlockMap, StorageError>>;

    /// Retrieves all keys in the store.
    fn get_all_keys(&self) -> impl Future<Output = Result<Vec<String>, StorageError>>;

    /// Removes all entries from the store.
    fn clear(&self) -> impl Future<Output = Result<(), StorageError>>;
}

/// Configuration for creating a storage instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the database (used as IndexedDB database name on web).
    pub database_name: String,
    /// Name of the object store within the database.
    pub store_name: String,
    /// Database version (incrementing triggers upgrade).
    pub version: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_name: "army-datasource".to_string(),
            store_name: "blocks".to_string(),
            version: 1,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with the given database and store names.
    pub fn new(database_name: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            store_name: store_name.into(),
            version: 1,
        }
    }

    /// Sets the database version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// How a readwrite transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
pub(crate) enum CommitOutcome {
    Committed,
    /// Aborted or failed, with the transaction's error text when it has one.
    Aborted(Option<String>),
}

#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
impl CommitOutcome {
    /// A write only counts once its transaction has committed.
    pub(crate) fn into_write_result(self, key: &str) -> Result<(), StorageError> {
        match self {
            Self::Committed => Ok(()),
            Self::Aborted(reason) => Err(StorageError::WriteRejected {
                key: key.to_string(),
                reason: reason.unwrap_or_else(|| "Transaction aborted".to_string()),
            }),
        }
    }
}

// Native implementation for development/testing
#[cfg(not(target_arch = "wasm32"))]
pub mod native {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// A simple in-memory store for native builds.
    ///
    /// Values are kept as serialized JSON so that reads go through the same
    /// serialize/deserialize path as the IndexedDB store. An optional byte
    /// quota lets callers exercise rejected writes.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        data: Arc<RwLock<HashMap<String, String>>>,
        quota_bytes: Option<usize>,
    }

    impl MemoryStore {
        pub fn new(_config: StorageConfig) -> Self {
            Self::default()
        }

        /// Rejects any write that would push the total stored size past `quota_bytes`.
        pub fn with_quota(mut self, quota_bytes: usize) -> Self {
            self.quota_bytes = Some(quota_bytes);
            self
        }

        fn used_bytes_excluding(data: &HashMap<String, String>, key: &str) -> usize {
            data.iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum()
        }
    }

    impl KeyValueStore for MemoryStore {
        async fn put<T: Serialize + 'static>(
            &self,
            key: &str,
            value: &T,
        ) -> Result<(), StorageError> {
            let json = serde_json::to_string(value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let mut data = self
                .data
                .write()
                .map_err(|e| StorageError::Other(e.to_string()))?;

            if let Some(quota) = self.quota_bytes {
                let needed = Self::used_bytes_excluding(&data, key) + key.len() + json.len();
                if needed > quota {
                    return Err(StorageError::WriteRejected {
                        key: key.to_string(),
                        reason: format!("quota exceeded ({} > {} bytes)", needed, quota),
                    });
                }
            }

            data.insert(key.to_string(), json);
            Ok(())
        }

        async fn get<T: DeserializeOwned + 'static>(
            &self,
            key: &str,
        ) -> Result<Option<T>, StorageError> {
            let data = self
                .data
                .read()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            match data.get(key) {
                Some(json) => {
                    let value = serde_json::from_str(json)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }

        async fn get_all(&self) -> Result<BlockMap, StorageError> {
            let data = self
                .data
                .read()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            data.iter()
                .map(|(key, json)| {
                    serde_json::from_str(json)
                        .map(|value| (key.clone(), value))
                        .map_err(|e| StorageError::Serialization(e.to_string()))
                })
                .collect()
        }

        async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
            let data = self
                .data
                .read()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            Ok(data.keys().cloned().collect())
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.data
                .write()
                .map_err(|e| StorageError::Other(e.to_string()))?
                .clear();
            Ok(())
        }
    }
}
