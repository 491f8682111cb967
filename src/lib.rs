//! Datasource synchronization and block storage for the army list builder.
//!
//! - [`storage`]: keyed JSON block store (IndexedDB in the browser)
//! - [`data`]: block key convention, typed views, consumer repository
//! - [`sync`]: remote fetch, reconciliation, persistence

pub mod data;
pub mod storage;
pub mod sync;

#[cfg(target_arch = "wasm32")]
mod bindings;

pub use data::{BlockKey, Datasource, DatasourceError, FactionCode, Lang};
pub use storage::{BlockMap, KeyValueStore, StorageConfig, StorageError};
pub use sync::{DatasourceSync, ExclusionConfig, SyncConfig, SyncError, SyncReport};
