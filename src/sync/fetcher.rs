//! Remote dataset fetcher.
//!
//! For each faction code, three documents are requested in turn
//! (`<code>.translated.json`, `en/<code>.flat.json`, `fr/<code>.flat.json`).
//! Every document stands alone: a failure is logged and tallied, and the loop
//! moves on. Each parsed document is written to the store as soon as it
//! arrives, so a timeout later in the batch keeps everything already stored.

use super::config::SyncConfig;
use super::transport::{Timer, Transport};
use crate::data::keys::BlockKey;
use crate::storage::{KeyValueStore, StorageError};
use futures_util::future::{select, Either};
use futures_util::pin_mut;
use serde_json::Value;
use std::time::Duration;

/// Why a single document could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The host answered with a non-2xx status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    /// The request never produced a response.
    #[error("{url}: network error: {message}")]
    Network { url: String, message: String },
    /// The body was not valid JSON.
    #[error("{url}: invalid JSON: {message}")]
    Parse { url: String, message: String },
}

/// Running totals for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchTally {
    /// Documents fetched, parsed and stored.
    pub loaded: usize,
    /// Documents that failed to fetch or parse.
    pub errors: usize,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// The batch timeout fired before every request settled.
    pub timed_out: bool,
    /// Keys written to the store, in arrival order.
    pub stored: Vec<BlockKey>,
}

impl FetchTally {
    fn record_loaded(&mut self, key: BlockKey) {
        self.loaded += 1;
        self.stored.push(key);
    }

    fn record_error(&mut self, error: &FetchError) {
        self.errors += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Fetches and parses one JSON document.
pub async fn fetch_document<T: Transport>(transport: &T, url: &str) -> Result<Value, FetchError> {
    let response = transport
        .get(url)
        .await
        .map_err(|message| FetchError::Network {
            url: url.to_string(),
            message,
        })?;

    if !response.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }

    serde_json::from_str(&response.body).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Walks every configured code without a deadline.
async fn fetch_all<S, T>(
    store: &S,
    transport: &T,
    config: &SyncConfig,
    tally: &mut FetchTally,
) -> Result<(), StorageError>
where
    S: KeyValueStore,
    T: Transport,
{
    for code in &config.codes {
        for key in BlockKey::all_for(code) {
            let url = config.url_for(&key.remote_path());
            match fetch_document(transport, &url).await {
                Ok(document) => {
                    store.put(&key.to_storage_key(), &document).await?;
                    log::debug!("Stored {}", key);
                    tally.record_loaded(key);
                }
                Err(e) => {
                    log::warn!("Skipping {}: {}", key, e);
                    tally.record_error(&e);
                }
            }
        }
    }
    Ok(())
}

/// Fetches the whole batch under a single deadline.
///
/// Only a rejected store write ends the batch early with an error; fetch and
/// parse failures are folded into the returned tally. When the deadline
/// fires, in-flight requests are aborted and the tally is returned as it
/// stood.
pub async fn fetch_batch<S, T, C>(
    store: &S,
    transport: &T,
    timer: &C,
    config: &SyncConfig,
    timeout: Duration,
) -> Result<FetchTally, StorageError>
where
    S: KeyValueStore,
    T: Transport,
    C: Timer,
{
    let mut tally = FetchTally::default();

    let timed_out = {
        let batch = fetch_all(store, transport, config, &mut tally);
        let deadline = timer.sleep(timeout);
        pin_mut!(batch);
        pin_mut!(deadline);

        match select(batch, deadline).await {
            Either::Left((result, _)) => result.map(|()| false),
            Either::Right(((), _)) => Ok(true),
        }
    }?;

    if timed_out {
        transport.abort();
        log::warn!(
            "Dataset fetch timed out after {} ms ({} loaded, {} failed)",
            timeout.as_millis(),
            tally.loaded,
            tally.errors
        );
        tally.timed_out = true;
        tally.last_error = Some(format!("Timed out after {} ms", timeout.as_millis()));
    }

    Ok(tally)
}
