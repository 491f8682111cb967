//! JavaScript surface for the UI.
//!
//! Every method returns a `Promise`. Values cross the boundary as plain JS
//! objects; errors reject with a message string.

use crate::storage::{IndexedDbStore, KeyValueStore, StorageConfig};
use crate::sync::{
    is_constrained_mobile, user_agent, DatasourceSync, SyncConfig, WebTimer, WebTransport,
};
use js_sys::Promise;
use serde::Serialize;
use serde_json::Value;
use std::sync::Once;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

static LOGGER: Once = Once::new();

fn init_logging() {
    LOGGER.call_once(|| {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        wasm_logger::init(wasm_logger::Config::default());
        log::info!("Logging initialized");
    });
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn js_error(error: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&error.to_string())
}

/// Handle to the block store and its sync configuration.
#[wasm_bindgen]
pub struct DatasourceHandle {
    store: IndexedDbStore,
    config: SyncConfig,
}

#[wasm_bindgen]
impl DatasourceHandle {
    /// `config` is a `SyncConfig` object; only `base_url` is required.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<DatasourceHandle, JsValue> {
        init_logging();
        let config: SyncConfig = serde_wasm_bindgen::from_value(config).map_err(js_error)?;
        Ok(Self {
            store: IndexedDbStore::new(StorageConfig::default()),
            config,
        })
    }

    /// Resolves to the stored document, or `undefined` for an unknown key.
    pub fn get(&self, key: String) -> Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            match store.get::<Value>(&key).await.map_err(js_error)? {
                Some(value) => to_js(&value),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    /// Replaces the block under `key`.
    pub fn put(&self, key: String, value: JsValue) -> Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            let value: Value = serde_wasm_bindgen::from_value(value).map_err(js_error)?;
            store.put(&key, &value).await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Resolves to an object of every stored block.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self) -> Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            let blocks = store.get_all().await.map_err(js_error)?;
            to_js(&blocks)
        })
    }

    pub fn clear(&self) -> Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            store.clear().await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Fetches and reconciles the dataset.
    ///
    /// Resolves to `{ loadedCount, errorCount, lastError, ... }`; rejects
    /// when nothing could be loaded or a write was refused.
    pub fn sync(&self) -> Promise {
        let constrained_mobile = user_agent()
            .map(|ua| is_constrained_mobile(&ua))
            .unwrap_or(false);
        let sync = DatasourceSync::new(
            self.store.clone(),
            WebTransport::new(),
            WebTimer,
            self.config.clone(),
        )
        .with_constrained_mobile(constrained_mobile);

        future_to_promise(async move {
            let report = sync.run().await.map_err(js_error)?;
            to_js(&report)
        })
    }
}
