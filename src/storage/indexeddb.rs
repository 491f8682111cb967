//! IndexedDB-based block storage for WASM targets.
//!
//! Wraps the low-level web-sys bindings in the async `KeyValueStore`
//! interface. Each block is stored as a JSON string under its explicit key
//! in a single object store.

use super::{BlockMap, CommitOutcome, KeyValueStore, StorageConfig, StorageError};
use js_sys::Array;
use serde::{de::DeserializeOwned, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use web_sys::{IdbDatabase, IdbObjectStore, IdbRequest, IdbTransaction, IdbTransactionMode};

/// IndexedDB-based key-value store.
///
/// The database is opened lazily on first use and the handle is shared by
/// every clone of the store.
#[derive(Clone)]
pub struct IndexedDbStore {
    config: StorageConfig,
    db: Rc<RefCell<Option<IdbDatabase>>>,
}

impl IndexedDbStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: Rc::new(RefCell::new(None)),
        }
    }

    /// Gets the database reference, opening it if necessary.
    async fn get_db(&self) -> Result<IdbDatabase, StorageError> {
        if let Some(db) = self.db.borrow().clone() {
            return Ok(db);
        }

        let db = open_database(&self.config).await?;
        *self.db.borrow_mut() = Some(db.clone());
        Ok(db)
    }

    fn begin(
        &self,
        db: &IdbDatabase,
        mode: IdbTransactionMode,
    ) -> Result<(IdbTransaction, IdbObjectStore), StorageError> {
        let transaction = db
            .transaction_with_str_and_mode(&self.config.store_name, mode)
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        let store = transaction
            .object_store(&self.config.store_name)
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        Ok((transaction, store))
    }

    fn get_object_store(
        &self,
        db: &IdbDatabase,
        mode: IdbTransactionMode,
    ) -> Result<IdbObjectStore, StorageError> {
        self.begin(db, mode).map(|(_, store)| store)
    }
}

impl KeyValueStore for IndexedDbStore {
    async fn put<T: Serialize + 'static>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let db = self.get_db().await?;
        let (transaction, store) = self.begin(&db, IdbTransactionMode::Readwrite)?;
        let commit = TransactionWatch::new(&transaction);

        let rejected = |reason: String| StorageError::WriteRejected {
            key: key.to_string(),
            reason,
        };

        let request = store
            .put_with_key(&JsValue::from_str(&json), &JsValue::from_str(key))
            .map_err(|e| rejected(format!("{:?}", e)))?;

        wait_for_request(&request).await.map_err(|e| match e {
            StorageError::TransactionFailed(reason) => rejected(reason),
            other => other,
        })?;

        // Quota and disk errors can surface only when the transaction commits.
        commit.finished().await.into_write_result(key)?;

        log::debug!("Stored block {} ({} bytes)", key, json.len());
        Ok(())
    }

    async fn get<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let db = self.get_db().await?;
        let store = self.get_object_store(&db, IdbTransactionMode::Readonly)?;

        let request = store
            .get(&JsValue::from_str(key))
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        let result = wait_for_request(&request).await?;

        if result.is_undefined() || result.is_null() {
            return Ok(None);
        }

        parse_stored(&result).map(Some)
    }

    async fn get_all(&self) -> Result<BlockMap, StorageError> {
        let db = self.get_db().await?;
        let store = self.get_object_store(&db, IdbTransactionMode::Readonly)?;

        // Both requests run in one transaction, so keys and values line up
        // index for index (IndexedDB returns both in key order).
        let keys_request = store
            .get_all_keys()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
        let values_request = store
            .get_all()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        let keys = Array::from(&wait_for_request(&keys_request).await?);
        let values = Array::from(&wait_for_request(&values_request).await?);

        if keys.length() != values.length() {
            return Err(StorageError::Other(format!(
                "Key/value count mismatch: {} keys, {} values",
                keys.length(),
                values.length()
            )));
        }

        let mut blocks = BlockMap::new();
        for i in 0..keys.length() {
            if let Some(key) = keys.get(i).as_string() {
                blocks.insert(key, parse_stored(&values.get(i))?);
            }
        }

        Ok(blocks)
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        let db = self.get_db().await?;
        let store = self.get_object_store(&db, IdbTransactionMode::Readonly)?;

        let request = store
            .get_all_keys()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        let array = Array::from(&wait_for_request(&request).await?);
        Ok(array.iter().filter_map(|key| key.as_string()).collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let db = self.get_db().await?;
        let (transaction, store) = self.begin(&db, IdbTransactionMode::Readwrite)?;
        let commit = TransactionWatch::new(&transaction);

        let request = store
            .clear()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        wait_for_request(&request).await?;
        if let CommitOutcome::Aborted(reason) = commit.finished().await {
            return Err(StorageError::TransactionFailed(
                reason.unwrap_or_else(|| "Transaction aborted".to_string()),
            ));
        }
        log::info!("Cleared object store {}", self.config.store_name);
        Ok(())
    }
}

/// Decodes a stored JSON string.
fn parse_stored<T: DeserializeOwned>(value: &JsValue) -> Result<T, StorageError> {
    let json = value
        .as_string()
        .ok_or_else(|| StorageError::Serialization("Expected string value".to_string()))?;

    serde_json::from_str(&json).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Opens an IndexedDB database with the given configuration.
async fn open_database(config: &StorageConfig) -> Result<IdbDatabase, StorageError> {
    let idb_factory = idb_factory()?;

    let open_request = idb_factory
        .open_with_u32(&config.database_name, config.version)
        .map_err(|e| StorageError::DatabaseOpenFailed(format!("{:?}", e)))?;

    // Create the object store on first open or version bump
    let store_name = config.store_name.clone();
    let onupgradeneeded = Closure::wrap(Box::new(move |event: web_sys::IdbVersionChangeEvent| {
        let Some(db) = event
            .target()
            .and_then(|target| target.dyn_into::<IdbRequest>().ok())
            .and_then(|request| request.result().ok())
            .and_then(|result| result.dyn_into::<IdbDatabase>().ok())
        else {
            log::error!("Upgrade event did not carry a database");
            return;
        };

        if !db.object_store_names().contains(&store_name) {
            let params = web_sys::IdbObjectStoreParameters::new();
            match db.create_object_store_with_optional_parameters(&store_name, &params) {
                Ok(_) => log::info!("Created IndexedDB object store: {}", store_name),
                Err(e) => log::error!("Failed to create object store {}: {:?}", store_name, e),
            }
        }
    }) as Box<dyn FnMut(_)>);

    open_request.set_onupgradeneeded(Some(onupgradeneeded.as_ref().unchecked_ref()));
    onupgradeneeded.forget();

    let db_result = wait_for_request(&open_request).await?;

    let db: IdbDatabase = db_result.dyn_into().map_err(|_| {
        StorageError::DatabaseOpenFailed("Failed to cast to IdbDatabase".to_string())
    })?;

    log::info!(
        "Opened IndexedDB database: {} v{}",
        config.database_name,
        config.version
    );

    Ok(db)
}

/// Finds the IndexedDB factory on either a window or a worker global.
fn idb_factory() -> Result<web_sys::IdbFactory, StorageError> {
    let global = js_sys::global();

    let factory = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
        window.indexed_db()
    } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
        worker.indexed_db()
    } else {
        return Err(StorageError::DatabaseOpenFailed(
            "No window or worker global".to_string(),
        ));
    };

    factory
        .map_err(|e| StorageError::DatabaseOpenFailed(format!("{:?}", e)))?
        .ok_or_else(|| StorageError::DatabaseOpenFailed("IndexedDB not available".to_string()))
}

/// Watches a transaction until it commits or aborts.
///
/// Handlers are attached on creation, before any request is awaited, so the
/// completion event cannot be missed. They are detached on drop.
struct TransactionWatch {
    transaction: IdbTransaction,
    outcome: futures_channel::oneshot::Receiver<CommitOutcome>,
    _oncomplete: Closure<dyn FnMut(web_sys::Event)>,
    _onabort: Closure<dyn FnMut(web_sys::Event)>,
}

impl TransactionWatch {
    fn new(transaction: &IdbTransaction) -> Self {
        let (tx, rx) = futures_channel::oneshot::channel::<CommitOutcome>();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let tx_complete = tx.clone();
        let oncomplete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            if let Some(tx) = tx_complete.borrow_mut().take() {
                let _ = tx.send(CommitOutcome::Committed);
            }
        }) as Box<dyn FnMut(_)>);

        let tx_abort = tx;
        let abort_transaction = transaction.clone();
        let onabort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let reason = abort_transaction
                .error()
                .map(|e| format!("{}: {}", e.name(), e.message()));

            if let Some(tx) = tx_abort.borrow_mut().take() {
                let _ = tx.send(CommitOutcome::Aborted(reason));
            }
        }) as Box<dyn FnMut(_)>);

        transaction.set_oncomplete(Some(oncomplete.as_ref().unchecked_ref()));
        transaction.set_onabort(Some(onabort.as_ref().unchecked_ref()));
        // A failed request aborts the transaction, which fires `abort` as well.
        transaction.set_onerror(Some(onabort.as_ref().unchecked_ref()));

        Self {
            transaction: transaction.clone(),
            outcome: rx,
            _oncomplete: oncomplete,
            _onabort: onabort,
        }
    }

    async fn finished(mut self) -> CommitOutcome {
        (&mut self.outcome)
            .await
            .unwrap_or_else(|_| CommitOutcome::Aborted(Some("Channel closed".to_string())))
    }
}

impl Drop for TransactionWatch {
    fn drop(&mut self) {
        self.transaction.set_oncomplete(None);
        self.transaction.set_onabort(None);
        self.transaction.set_onerror(None);
    }
}

/// Waits for an IDB request to complete and returns the result.
async fn wait_for_request(request: &IdbRequest) -> Result<JsValue, StorageError> {
    let (tx, rx) = futures_channel::oneshot::channel::<Result<JsValue, StorageError>>();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let tx_success = tx.clone();
    let success_request = request.clone();
    let onsuccess = Closure::wrap(Box::new(move |_event: web_sys::Event| {
        let result = success_request.result().unwrap_or(JsValue::UNDEFINED);

        if let Some(tx) = tx_success.borrow_mut().take() {
            let _ = tx.send(Ok(result));
        }
    }) as Box<dyn FnMut(_)>);

    let tx_error = tx;
    let error_request = request.clone();
    let onerror = Closure::wrap(Box::new(move |_event: web_sys::Event| {
        let error_msg = error_request
            .error()
            .ok()
            .flatten()
            .map(|e| format!("{}: {}", e.name(), e.message()))
            .unwrap_or_else(|| "Unknown error".to_string());

        if let Some(tx) = tx_error.borrow_mut().take() {
            let _ = tx.send(Err(StorageError::TransactionFailed(error_msg)));
        }
    }) as Box<dyn FnMut(_)>);

    request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
    request.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    let result = rx
        .await
        .map_err(|_| StorageError::Other("Channel closed".to_string()))?;

    request.set_onsuccess(None);
    request.set_onerror(None);

    drop(onsuccess);
    drop(onerror);

    result
}
