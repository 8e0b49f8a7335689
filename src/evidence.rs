//! Per-device evidence store
//!
//! Holds every cell accumulator for one device for the lifetime of one batch.
//! Rows are folded in during ingestion; once ingestion ends the store is frozen
//! and handed to feature derivation.

use crate::accumulator::CellAccumulator;
use crate::adapter::{RawPingRow, RowAdapter};
use crate::config::EngineConfig;
use crate::error::{ComputeError, RejectReason};
use crate::geocode::Geocoder;
use crate::types::{CellKey, PingRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// All accumulators for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStore {
    device_id: String,
    cells: BTreeMap<CellKey, CellAccumulator>,
    total_pings: u64,
    rejected_rows: u64,
}

impl EvidenceStore {
    /// Create an empty store for a device
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            cells: BTreeMap::new(),
            total_pings: 0,
            rejected_rows: 0,
        }
    }

    /// Validate and fold a raw row. Rejected rows are counted and skipped.
    pub fn ingest_row(&mut self, row: &RawPingRow, config: &EngineConfig) -> Result<(), RejectReason> {
        let result = RowAdapter::to_ping(row).and_then(|ping| {
            if ping.device_id != self.device_id {
                return Err(RejectReason::ForeignDevice(ping.device_id.clone()));
            }
            self.fold(&ping, config)
        });

        if let Err(reason) = &result {
            self.rejected_rows += 1;
            debug!(maid = %self.device_id, %reason, "row rejected");
        }
        result
    }

    /// Fold a validated ping into its cell, creating the accumulator on first use
    pub fn fold(&mut self, ping: &PingRecord, config: &EngineConfig) -> Result<(), RejectReason> {
        let cell = match &ping.cell {
            Some(code) => code.clone(),
            None => Geocoder::encode(ping.latitude, ping.longitude, config.cell_precision)
                .map_err(|e| RejectReason::InvalidCellCode(e.to_string()))?,
        };
        let position = Geocoder::encode(ping.latitude, ping.longitude, config.position_precision)
            .map_err(|e| RejectReason::InvalidCellCode(e.to_string()))?;

        self.cells.entry(cell).or_default().fold(ping, position);
        self.total_pings += 1;
        Ok(())
    }

    /// Count a row rejected before it reached this store
    pub fn record_rejection(&mut self) {
        self.rejected_rows += 1;
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Cells in ascending code order
    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &CellAccumulator)> {
        self.cells.iter()
    }

    pub fn cell(&self, code: &str) -> Option<&CellAccumulator> {
        self.cells.get(code)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn total_pings(&self) -> u64 {
        self.total_pings
    }

    pub fn rejected_rows(&self) -> u64 {
        self.rejected_rows
    }

    /// Load a store snapshot from JSON.
    ///
    /// Every cell must satisfy its count invariants and the cell ping counts
    /// must add up to `total_pings`.
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let store: Self = serde_json::from_str(json)?;
        store.check_consistency()?;
        Ok(store)
    }

    fn check_consistency(&self) -> Result<(), ComputeError> {
        if let Some((code, _)) = self.cells.iter().find(|(_, acc)| !acc.is_consistent()) {
            return Err(ComputeError::ParseError(format!(
                "snapshot for {}: cell {code} has histograms that disagree with its ping count",
                self.device_id
            )));
        }

        let cell_pings: u64 = self.cells.values().map(|acc| acc.pings()).sum();
        if cell_pings != self.total_pings {
            return Err(ComputeError::ParseError(format!(
                "snapshot for {}: total_pings is {} but cells hold {cell_pings}",
                self.device_id, self.total_pings
            )));
        }
        Ok(())
    }

    /// Serialize a store snapshot to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
