//! Datasource synchronization.
//!
//! A sync downloads the configured faction documents into the block store,
//! then reconciles the full block set and re-persists whatever the
//! reconciliation changed.
//!
//! ## Outcomes
//!
//! - every document loaded: `Ok(report)`, `report.is_partial() == false`
//! - some documents loaded: `Ok(report)`, `report.is_partial() == true`
//! - nothing loaded: `Err(SyncError::DatasetUnavailable)`
//! - a store write rejected: `Err(SyncError::Storage)`

pub mod config;
pub mod fetcher;
pub mod reconcile;
pub mod transport;

pub use config::{is_constrained_mobile, ExclusionConfig, SyncConfig, DEFAULT_FACTION_CODES};
pub use fetcher::{fetch_batch, fetch_document, FetchError, FetchTally};
pub use reconcile::{reconcile, ReconcileOutcome};
pub use transport::{HttpResponse, Timer, Transport};

#[cfg(target_arch = "wasm32")]
pub use transport::{user_agent, WebTimer, WebTransport};

use crate::storage::{KeyValueStore, StorageError};
use serde::Serialize;

/// Batch-level failures. Per-document failures never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Not a single document could be loaded.
    #[error("Dataset unavailable: {last_error}")]
    DatasetUnavailable { last_error: String },
    /// The store rejected a write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a completed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub loaded_count: usize,
    pub error_count: usize,
    pub expected_count: usize,
    pub last_error: Option<String>,
    pub timed_out: bool,
    /// Blocks re-persisted after reconciliation.
    pub reconciled_blocks: Vec<String>,
    pub elapsed_ms: u64,
}

impl SyncReport {
    /// Some documents are missing; the dataset is usable but incomplete.
    pub fn is_partial(&self) -> bool {
        self.loaded_count > 0 && (self.error_count > 0 || self.timed_out)
    }

    /// One-line message for display.
    pub fn summary(&self) -> String {
        if self.is_partial() {
            let mut message = format!(
                "Loaded {} of {} files ({} failed)",
                self.loaded_count, self.expected_count, self.error_count
            );
            if self.timed_out {
                message.push_str(", timed out");
            }
            message
        } else {
            format!("Loaded {} files", self.loaded_count)
        }
    }
}

/// Fetch + reconcile + persist over an injected store, transport and timer.
pub struct DatasourceSync<S, T, C> {
    store: S,
    transport: T,
    timer: C,
    config: SyncConfig,
    constrained_mobile: bool,
}

impl<S, T, C> DatasourceSync<S, T, C>
where
    S: KeyValueStore,
    T: Transport,
    C: Timer,
{
    pub fn new(store: S, transport: T, timer: C, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            timer,
            config,
            constrained_mobile: false,
        }
    }

    /// Selects the longer batch timeout used for constrained mobile browsers.
    pub fn with_constrained_mobile(mut self, constrained_mobile: bool) -> Self {
        self.constrained_mobile = constrained_mobile;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let started = web_time::Instant::now();
        let timeout = self.config.timeout(self.constrained_mobile);
        log::info!(
            "Syncing {} faction code(s) from {} (timeout {} ms)",
            self.config.codes.len(),
            self.config.base_url,
            timeout.as_millis()
        );

        let tally = fetch_batch(
            &self.store,
            &self.transport,
            &self.timer,
            &self.config,
            timeout,
        )
        .await?;

        if tally.loaded == 0 {
            let last_error = tally
                .last_error
                .unwrap_or_else(|| "No faction codes configured".to_string());
            log::error!("Dataset unavailable: {}", last_error);
            return Err(SyncError::DatasetUnavailable { last_error });
        }

        let mut blocks = self.store.get_all().await?;
        let outcome = reconcile(&mut blocks, &self.config.exclusions);
        for key in &outcome.changed {
            if let Some(block) = blocks.get(key) {
                self.store.put(key, block).await?;
            }
        }

        let report = SyncReport {
            loaded_count: tally.loaded,
            error_count: tally.errors,
            expected_count: self.config.codes.len() * 3,
            last_error: tally.last_error,
            timed_out: tally.timed_out,
            reconciled_blocks: outcome.changed.into_iter().collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.is_partial() {
            log::warn!(
                "{} (last error: {})",
                report.summary(),
                report.last_error.as_deref().unwrap_or("none")
            );
        } else {
            log::info!("{} in {} ms", report.summary(), report.elapsed_ms);
        }

        Ok(report)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::sync::transport::testing::{FakeTransport, InstantTimer, NeverTimer};
    use pollster::block_on;
    use serde_json::{json, Value};
    use std::time::Duration;

    const BASE: &str = "https://data.test";

    fn serve(transport: FakeTransport, code: &str, translated: Value) -> FakeTransport {
        transport
            .respond(
                format!("{BASE}/{code}.translated.json"),
                HttpResponse::ok(translated.to_string()),
            )
            .respond(
                format!("{BASE}/en/{code}.flat.json"),
                HttpResponse::ok(json!({ "unit.captain": "Captain" }).to_string()),
            )
            .respond(
                format!("{BASE}/fr/{code}.flat.json"),
                HttpResponse::ok(json!({ "unit.captain": "Capitaine" }).to_string()),
            )
    }

    fn plain(code: &str) -> Value {
        json!({ "id": code, "is_subfaction": false, "datasheets": [] })
    }

    fn full_transport(codes: &[&str]) -> FakeTransport {
        codes
            .iter()
            .fold(FakeTransport::new(), |t, code| serve(t, code, plain(code)))
    }

    fn sync_for(
        codes: &[&str],
        transport: FakeTransport,
    ) -> DatasourceSync<MemoryStore, FakeTransport, NeverTimer> {
        DatasourceSync::new(
            MemoryStore::default(),
            transport,
            NeverTimer,
            SyncConfig::new(BASE).with_codes(codes.iter().copied()),
        )
    }

    #[test]
    fn test_full_success() {
        let codes = ["SM", "CSM"];
        let sync = sync_for(&codes, full_transport(&codes));

        let report = block_on(sync.run()).unwrap();

        assert_eq!(report.loaded_count, 6);
        assert_eq!(report.error_count, 0);
        assert!(!report.is_partial());
        assert_eq!(report.summary(), "Loaded 6 files");
    }

    #[test]
    fn test_single_failure_is_partial_success() {
        let codes = ["SM", "CSM", "AE"];
        let transport = full_transport(&codes)
            .respond(format!("{BASE}/en/CSM.flat.json"), HttpResponse::status(503));
        let sync = sync_for(&codes, transport);

        let report = block_on(sync.run()).unwrap();

        assert_eq!(report.loaded_count, 3 * 3 - 1);
        assert_eq!(report.error_count, 1);
        assert!(report.is_partial());
        assert_eq!(report.summary(), "Loaded 8 of 9 files (1 failed)");

        let missing: Option<Value> = block_on(sync.store().get("CSM_flat_en")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_whole_code_failing_is_partial_success() {
        let codes = ["SM", "CSM", "AE", "TAU"];
        let transport = full_transport(&["SM", "AE", "TAU"])
            .fail(format!("{BASE}/CSM.translated.json"), "connection refused")
            .respond(format!("{BASE}/en/CSM.flat.json"), HttpResponse::status(500))
            .respond(format!("{BASE}/fr/CSM.flat.json"), HttpResponse::ok("<html>"));
        let sync = sync_for(&codes, transport);

        let report = block_on(sync.run()).unwrap();

        assert_eq!(report.error_count, 3);
        assert_eq!(report.loaded_count, 3 * (codes.len() - 1));
        assert!(report.last_error.unwrap().contains("invalid JSON"));
    }

    #[test]
    fn test_total_failure_is_dataset_unavailable() {
        let codes = ["SM", "CSM"];
        let transport = FakeTransport::new()
            .respond(format!("{BASE}/fr/CSM.flat.json"), HttpResponse::status(500));
        let sync = sync_for(&codes, transport);

        let err = block_on(sync.run()).unwrap_err();

        assert_eq!(
            err,
            SyncError::DatasetUnavailable {
                last_error: "https://data.test/fr/CSM.flat.json returned HTTP 500".to_string()
            }
        );
        assert!(block_on(sync.store().get_all_keys()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_code_list_is_dataset_unavailable() {
        let sync = sync_for(&[], FakeTransport::new());
        assert!(matches!(
            block_on(sync.run()),
            Err(SyncError::DatasetUnavailable { .. })
        ));
    }

    #[test]
    fn test_reconciled_parent_is_persisted() {
        let transport = serve(
            serve(
                FakeTransport::new(),
                "SM",
                json!({
                    "id": "SM",
                    "is_subfaction": false,
                    "datasheets": [{ "name": "Intercessor Squad" }, { "name": "Captain" }],
                }),
            ),
            "CHBT",
            json!({
                "id": "CHBT",
                "is_subfaction": true,
                "parent_id": "SM",
                "datasheets": [{ "name": "Captain" }],
            }),
        );
        let sync = sync_for(&["SM", "CHBT"], transport);

        let report = block_on(sync.run()).unwrap();
        assert_eq!(report.reconciled_blocks, ["SM_translated"]);

        let parent: Value = block_on(sync.store().get("SM_translated")).unwrap().unwrap();
        assert_eq!(parent["datasheets"], json!([{ "name": "Intercessor Squad" }]));
        let sub: Value = block_on(sync.store().get("CHBT_translated")).unwrap().unwrap();
        assert_eq!(sub["datasheets"], json!([{ "name": "Captain" }]));
    }

    #[test]
    fn test_exclusions_applied_and_persisted() {
        let transport = serve(
            FakeTransport::new(),
            "SM",
            json!({
                "id": "SM",
                "datasheets": [{ "name": "Intercessor Squad" }, { "name": "Captain" }],
            }),
        );
        let config = SyncConfig::new(BASE)
            .with_codes(["SM"])
            .with_exclusions(ExclusionConfig::new().exclude("SM", "core", ["Captain"]));
        let sync = DatasourceSync::new(MemoryStore::default(), transport, NeverTimer, config);

        block_on(sync.run()).unwrap();

        let stored: Value = block_on(sync.store().get("SM_translated")).unwrap().unwrap();
        assert_eq!(stored["datasheets"], json!([{ "name": "Intercessor Squad" }]));
    }

    #[test]
    fn test_reconciliation_covers_previously_stored_parent() {
        let sync = sync_for(
            &["CHBT"],
            serve(
                FakeTransport::new(),
                "CHBT",
                json!({
                    "id": "CHBT",
                    "is_subfaction": true,
                    "parent_id": "SM",
                    "datasheets": [{ "name": "Captain" }],
                }),
            ),
        );
        block_on(sync.store().put(
            "SM_translated",
            &json!({ "id": "SM", "datasheets": [{ "name": "Captain" }, { "name": "Scouts" }] }),
        ))
        .unwrap();

        block_on(sync.run()).unwrap();

        let parent: Value = block_on(sync.store().get("SM_translated")).unwrap().unwrap();
        assert_eq!(parent["datasheets"], json!([{ "name": "Scouts" }]));
    }

    #[test]
    fn test_timeout_with_loaded_documents_is_partial() {
        let codes = ["SM", "CSM"];
        let transport = full_transport(&codes).hang(format!("{BASE}/CSM.translated.json"));
        let sync = DatasourceSync::new(
            MemoryStore::default(),
            transport,
            InstantTimer,
            SyncConfig::new(BASE).with_codes(codes),
        )
        .with_constrained_mobile(true);

        let report = block_on(sync.run()).unwrap();

        assert!(report.timed_out);
        assert!(report.is_partial());
        assert_eq!(report.loaded_count, 3);
        assert_eq!(report.summary(), "Loaded 3 of 6 files (0 failed), timed out");
    }

    #[test]
    fn test_timeout_before_anything_loaded_is_unavailable() {
        let transport = full_transport(&["SM"]).hang(format!("{BASE}/SM.translated.json"));
        let sync = DatasourceSync::new(
            MemoryStore::default(),
            transport,
            InstantTimer,
            SyncConfig::new(BASE)
                .with_codes(["SM"])
                .with_timeouts(Duration::from_millis(250), Duration::from_secs(1)),
        );

        let err = block_on(sync.run()).unwrap_err();
        assert_eq!(
            err,
            SyncError::DatasetUnavailable {
                last_error: "Timed out after 250 ms".to_string()
            }
        );
    }

    #[test]
    fn test_rejected_write_surfaces_as_storage_error() {
        let transport = full_transport(&["SM"]);
        let sync = DatasourceSync::new(
            MemoryStore::default().with_quota(4),
            transport,
            NeverTimer,
            SyncConfig::new(BASE).with_codes(["SM"]),
        );

        assert!(matches!(
            block_on(sync.run()),
            Err(SyncError::Storage(StorageError::WriteRejected { .. }))
        ));
    }
}
