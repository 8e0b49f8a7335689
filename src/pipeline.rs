//! Pipeline orchestration
//!
//! This module provides the public API for place-evidence.
//! It orchestrates the full pipeline from raw ping rows to per-device evidence.

use crate::adapter::RawPingRow;
use crate::config::EngineConfig;
use crate::encoder::DeviceEvidenceEncoder;
use crate::error::ComputeError;
use crate::evidence::EvidenceStore;
use crate::types::{BatchResult, BatchSummary, DeviceEvidence, DeviceFailure, PingRecord};
use crate::ENGINE_VERSION;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Score all rows of one device.
///
/// Rows that fail validation are counted in `rejected_rows` and skipped.
///
/// # Arguments
/// * `device_id` - Mobile identifier the rows belong to
/// * `rows` - Raw rows for this device
/// * `config` - Engine configuration
///
/// # Example
/// ```ignore
/// let evidence = process_device("maid-123", &rows, &EngineConfig::default())?;
/// println!("{} cells", evidence.cells.len());
/// ```
pub fn process_device(
    device_id: &str,
    rows: &[RawPingRow],
    config: &EngineConfig,
) -> Result<DeviceEvidence, ComputeError> {
    config.validate()?;
    let store = ingest(device_id, rows.iter(), config);
    DeviceEvidenceEncoder::with_config(config.clone()).encode(&store)
}

/// Score already validated pings of one device.
pub fn process_pings(
    device_id: &str,
    pings: &[PingRecord],
    config: &EngineConfig,
) -> Result<DeviceEvidence, ComputeError> {
    config.validate()?;
    let mut store = EvidenceStore::new(device_id);
    for ping in pings {
        if ping.device_id != device_id {
            store.record_rejection();
            continue;
        }
        if let Err(reason) = store.fold(ping, config) {
            store.record_rejection();
            debug!(maid = %device_id, %reason, "ping rejected");
        }
    }
    DeviceEvidenceEncoder::with_config(config.clone()).encode(&store)
}

/// Fold a device's rows into a fresh evidence store.
///
/// Stage 1 of the pipeline; rejections are counted on the store.
fn ingest<'a>(
    device_id: &str,
    rows: impl Iterator<Item = &'a RawPingRow>,
    config: &EngineConfig,
) -> EvidenceStore {
    let mut store = EvidenceStore::new(device_id);
    for row in rows {
        // Rejections are recorded by the store itself
        let _ = store.ingest_row(row, config);
    }
    store
}

/// Batch processor over many devices.
///
/// Rows are grouped by device id and devices are processed in parallel.
/// A failing device is reported in the summary and left out of the output.
pub struct EvidenceProcessor {
    encoder: DeviceEvidenceEncoder,
}

impl Default for EvidenceProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceProcessor {
    /// Create a new processor with default settings
    pub fn new() -> Self {
        Self {
            encoder: DeviceEvidenceEncoder::new(),
        }
    }

    /// Create a processor with a validated configuration
    pub fn with_config(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            encoder: DeviceEvidenceEncoder::with_config(config),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.encoder.config()
    }

    /// Encode a previously built or restored evidence store
    pub fn process_store(&self, store: &EvidenceStore) -> Result<DeviceEvidence, ComputeError> {
        self.encoder.encode(store)
    }

    /// Load an evidence store snapshot from JSON
    pub fn load_store(&self, json: &str) -> Result<EvidenceStore, ComputeError> {
        EvidenceStore::from_json(json).map_err(|e| ComputeError::ParseError(e.to_string()))
    }

    /// Save an evidence store snapshot to JSON
    pub fn save_store(&self, store: &EvidenceStore) -> Result<String, ComputeError> {
        store
            .to_json()
            .map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    /// Process a batch of rows spanning any number of devices
    pub fn process_rows(&self, rows: &[RawPingRow]) -> BatchResult {
        let config = self.config();
        self.run(rows, |device_id, device_rows| {
            let store = ingest(device_id, device_rows.iter().copied(), config);
            self.encoder.encode(&store)
        })
    }

    /// Group rows by device, run `score_device` on each group in parallel and
    /// collect results in device order.
    fn run<F>(&self, rows: &[RawPingRow], score_device: F) -> BatchResult
    where
        F: Fn(&str, &[&RawPingRow]) -> Result<DeviceEvidence, ComputeError> + Sync,
    {
        let mut groups: BTreeMap<&str, Vec<&RawPingRow>> = BTreeMap::new();
        let mut rows_without_device = 0u64;
        for row in rows {
            match row.device_id() {
                Some(id) => groups.entry(id).or_default().push(row),
                None => rows_without_device += 1,
            }
        }
        let groups: Vec<(&str, Vec<&RawPingRow>)> = groups.into_iter().collect();

        let outcomes: Vec<(&str, Result<DeviceEvidence, ComputeError>)> = groups
            .par_iter()
            .map(|(device_id, device_rows)| {
                let device_id: &str = device_id;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    score_device(device_id, device_rows.as_slice())
                }))
                .unwrap_or_else(|payload| {
                    Err(ComputeError::DeviceFailed {
                        maid: device_id.to_string(),
                        reason: panic_message(payload.as_ref()),
                    })
                });
                (device_id, outcome)
            })
            .collect();

        let mut devices = Vec::new();
        let mut failures = Vec::new();
        let mut rows_rejected = rows_without_device;
        for (device_id, outcome) in outcomes {
            match outcome {
                Ok(evidence) => {
                    rows_rejected += evidence.rejected_rows;
                    devices.push(evidence);
                }
                Err(e) => {
                    warn!(maid = %device_id, error = %e, "device failed");
                    failures.push(DeviceFailure {
                        maid: device_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let summary = BatchSummary {
            batch_id: Uuid::new_v4().to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            rows_total: rows.len() as u64,
            rows_rejected,
            rows_without_device,
            devices_processed: devices.len() as u64,
            failures,
        };

        info!(
            batch_id = %summary.batch_id,
            rows = summary.rows_total,
            rejected = summary.rows_rejected,
            devices = summary.devices_processed,
            failed = summary.failures.len(),
            "batch processed"
        );

        BatchResult { devices, summary }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during device processing".to_string()
    }
}
