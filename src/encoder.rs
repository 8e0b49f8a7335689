//! Device evidence encoding
//!
//! This module turns a frozen evidence store into the columnar per-device
//! output. Cells are derived, scored and appended in ascending code order, so
//! row `i` of every column describes `geohash[i]`.

use crate::config::EngineConfig;
use crate::error::ComputeError;
use crate::evidence::EvidenceStore;
use crate::features::FeatureDeriver;
use crate::scoring::RoleScorer;
use crate::types::{CellTable, DeviceEvidence, ScoreSet};
use tracing::debug;

/// Encoder producing [`DeviceEvidence`] from an evidence store
pub struct DeviceEvidenceEncoder {
    config: EngineConfig,
}

impl Default for DeviceEvidenceEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEvidenceEncoder {
    /// Create an encoder with the default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Create an encoder with a specific configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Derive, score and tabulate every cell of a device
    pub fn encode(&self, store: &EvidenceStore) -> Result<DeviceEvidence, ComputeError> {
        let total_pings = store.total_pings();
        let mut cells = CellTable::default();

        for (code, acc) in store.cells() {
            let features = FeatureDeriver::derive(acc, &self.config)?;
            let scores = RoleScorer::score(&features, total_pings);
            check_scores(code, &scores)?;
            cells.push_row(code, &features, &scores);
        }

        debug!(
            maid = %store.device_id(),
            cells = cells.len(),
            pings = total_pings,
            rejected = store.rejected_rows(),
            "device encoded"
        );

        Ok(DeviceEvidence {
            maid: store.device_id().to_string(),
            total_pings,
            rejected_rows: store.rejected_rows(),
            cells,
        })
    }

    /// Encode to a pretty JSON string
    pub fn encode_to_json(&self, store: &EvidenceStore) -> Result<String, ComputeError> {
        let evidence = self.encode(store)?;
        serde_json::to_string_pretty(&evidence).map_err(ComputeError::JsonError)
    }
}

fn check_scores(cell: &str, scores: &ScoreSet) -> Result<(), ComputeError> {
    let values = [
        ("home", scores.home),
        ("work", scores.work),
        ("leisure", scores.leisure),
        ("pingsink", scores.pingsink),
    ];
    for (name, v) in values {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(ComputeError::EncodingError(format!(
                "cell {cell}: {name} score {v} outside [0, 1]"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RawPingRow;
    use pretty_assertions::assert_eq;

    fn row(lat: f64, lon: f64, ts: &str) -> RawPingRow {
        RawPingRow {
            maid: Some("dev-1".to_string()),
            latitude: Some(lat.to_string()),
            longitude: Some(lon.to_string()),
            timestamp: Some(ts.to_string()),
            flux: Some("C".to_string()),
            geohash: None,
        }
    }

    fn make_store() -> EvidenceStore {
        let config = EngineConfig::default();
        let mut store = EvidenceStore::new("dev-1");
        for day in 10..20 {
            let ts = format!("2024-01-{day}T02:15:00Z");
            store.ingest_row(&row(48.8584, 2.2945, &ts), &config).unwrap();
        }
        for day in 15..18 {
            let ts = format!("2024-01-{day}T13:00:00Z");
            store.ingest_row(&row(40.7128, -74.0060, &ts), &config).unwrap();
        }
        store
    }

    #[test]
    fn test_encode_device() {
        let store = make_store();
        let evidence = DeviceEvidenceEncoder::new().encode(&store).unwrap();

        assert_eq!(evidence.maid, "dev-1");
        assert_eq!(evidence.total_pings, 13);
        assert_eq!(evidence.cells.len(), 2);
        assert!(evidence.cells.geohash[0] < evidence.cells.geohash[1]);

        let lengths = evidence.cells.column_lengths();
        assert!(lengths.iter().all(|&l| l == 2));

        let pings: u64 = evidence.cells.pings.iter().sum();
        assert_eq!(pings, evidence.total_pings);
        assert_eq!(evidence.cells.flux_c.iter().sum::<u64>(), 13);
    }

    #[test]
    fn test_rows_align_with_cells() {
        let store = make_store();
        let evidence = DeviceEvidenceEncoder::new().encode(&store).unwrap();

        for (i, code) in evidence.cells.geohash.iter().enumerate() {
            assert_eq!(evidence.cells.position(code), Some(i));
            let acc = store.cell(code).unwrap();
            assert_eq!(evidence.cells.pings[i], acc.pings());
            let features = FeatureDeriver::derive(acc, &EngineConfig::default()).unwrap();
            let scores = RoleScorer::score(&features, store.total_pings());
            assert_eq!(evidence.cells.scores(i), Some(scores));
        }
    }

    #[test]
    fn test_empty_store() {
        let evidence = DeviceEvidenceEncoder::new()
            .encode(&EvidenceStore::new("nobody"))
            .unwrap();
        assert_eq!(evidence.total_pings, 0);
        assert!(evidence.cells.is_empty());
        assert_eq!(evidence.cells.position("u09tunq"), None);
    }

    #[test]
    fn test_encode_to_json_roundtrip() {
        let store = make_store();
        let encoder = DeviceEvidenceEncoder::new();
        let json = encoder.encode_to_json(&store).unwrap();

        assert!(json.contains("\"home_score\""));
        assert!(json.contains("\"flux_C\""));

        let parsed: DeviceEvidence = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, encoder.encode(&store).unwrap());
    }

    #[test]
    fn test_check_scores_rejects_non_finite() {
        let bad = ScoreSet {
            home: f64::NAN,
            ..ScoreSet::default()
        };
        assert!(check_scores("u09tunq", &bad).is_err());
        assert!(check_scores("u09tunq", &ScoreSet::default()).is_ok());
    }
}
