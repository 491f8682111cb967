//! Read/write access to the datasource for application screens.
//!
//! Screens never build storage keys themselves; they go through this
//! repository, which applies the block key convention and parses blocks
//! into typed views on read.
//!
//! Saving follows read-modify-write on a whole block. There is no locking or
//! conflict detection: the last write to a key wins.

use super::keys::{BlockKey, FactionCode, Lang};
use super::model::{Faction, FactionHeader, TranslationMap};
use crate::storage::{BlockMap, KeyValueStore, StorageError};
use serde_json::Value;

/// Errors from typed datasource access.
#[derive(Debug, thiserror::Error)]
pub enum DatasourceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A block exists but does not have the expected shape.
    #[error("Block {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type DatasourceResult<T> = Result<T, DatasourceError>;

/// Repository over an injected block store.
#[derive(Clone)]
pub struct Datasource<S> {
    store: S,
}

impl<S: KeyValueStore> Datasource<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Raw block access.
    pub async fn block(&self, key: &BlockKey) -> DatasourceResult<Option<Value>> {
        Ok(self.store.get(&key.to_storage_key()).await?)
    }

    /// Replaces a whole block.
    pub async fn put_block(&self, key: &BlockKey, value: &Value) -> DatasourceResult<()> {
        self.store.put(&key.to_storage_key(), value).await?;
        Ok(())
    }

    /// Reads a faction's merged document.
    pub async fn faction(&self, code: &FactionCode) -> DatasourceResult<Option<Faction>> {
        let key = BlockKey::Translated(code.clone());
        self.block(&key)
            .await?
            .map(|value| parse(&key, value))
            .transpose()
    }

    /// Writes a faction's merged document back under its code.
    pub async fn save_faction(
        &self,
        code: &FactionCode,
        faction: &Faction,
    ) -> DatasourceResult<()> {
        let key = BlockKey::Translated(code.clone()).to_storage_key();
        self.store.put(&key, faction).await?;
        log::debug!("Saved faction {}", key);
        Ok(())
    }

    /// Reads a flat translation map. A missing block is an empty map.
    pub async fn translations(
        &self,
        code: &FactionCode,
        lang: Lang,
    ) -> DatasourceResult<TranslationMap> {
        let key = BlockKey::Flat(code.clone(), lang);
        Ok(self
            .block(&key)
            .await?
            .map(|value| parse(&key, value))
            .transpose()?
            .unwrap_or_default())
    }

    /// Resolves a display string, falling back to the key itself.
    pub async fn display(
        &self,
        code: &FactionCode,
        lang: Lang,
        key: &str,
    ) -> DatasourceResult<String> {
        let map = self.translations(code, lang).await?;
        Ok(map.translate(key).to_string())
    }

    /// Read-modify-write of one block.
    ///
    /// `edit` receives the current document (or `Value::Null` when the block
    /// does not exist yet) and the result is written back whole.
    pub async fn update_block<F>(&self, key: &BlockKey, edit: F) -> DatasourceResult<Value>
    where
        F: FnOnce(&mut Value),
    {
        let mut value = self.block(key).await?.unwrap_or(Value::Null);
        edit(&mut value);
        self.put_block(key, &value).await?;
        Ok(value)
    }

    /// Headers of every stored faction, keyed by faction code.
    pub async fn factions(&self) -> DatasourceResult<Vec<(FactionCode, FactionHeader)>> {
        let blocks = self.store.get_all().await?;
        Ok(blocks
            .iter()
            .filter_map(|(key, value)| match BlockKey::from_storage_key(key)? {
                BlockKey::Translated(code) => Some((code, FactionHeader::from_block(value)?)),
                BlockKey::Flat(..) => None,
            })
            .collect())
    }

    /// Codes of the subfactions whose `parent_id` is `parent_id`.
    pub async fn subfactions_of(&self, parent_id: &str) -> DatasourceResult<Vec<FactionCode>> {
        Ok(self
            .factions()
            .await?
            .into_iter()
            .filter(|(_, header)| {
                header.is_subfaction && header.parent_id.as_deref() == Some(parent_id)
            })
            .map(|(code, _)| code)
            .collect())
    }

    /// Every stored block.
    pub async fn snapshot(&self) -> DatasourceResult<BlockMap> {
        Ok(self.store.get_all().await?)
    }

    /// Removes every block.
    pub async fn reset(&self) -> DatasourceResult<()> {
        self.store.clear().await?;
        log::info!("Datasource cleared");
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(key: &BlockKey, value: Value) -> DatasourceResult<T> {
    serde_json::from_value(value).map_err(|source| DatasourceError::Malformed {
        key: key.to_storage_key(),
        source,
    })
}
