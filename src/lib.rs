//! Place Evidence - per-location behavioral scoring from geolocated pings
//!
//! The engine turns a stream of pings for a mobile identifier into per-cell
//! role scores through a deterministic pipeline: row adaptation → geohash cell
//! assignment → evidence accumulation → feature derivation → role scoring →
//! columnar encoding.
//!
//! ## Modules
//!
//! - **Ingestion**: [`adapter`], [`geocode`], [`accumulator`], [`evidence`]
//! - **Scoring**: [`features`], [`scoring`]
//! - **Output**: [`encoder`], [`pipeline`]

pub mod accumulator;
pub mod adapter;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evidence;
pub mod features;
pub mod geocode;
pub mod pipeline;
pub mod scoring;
pub mod types;

pub use adapter::{RawPingRow, RowAdapter};
pub use config::{EngineConfig, HourCategories};
pub use error::{ComputeError, RejectReason};
pub use evidence::EvidenceStore;
pub use geocode::Geocoder;
pub use pipeline::{process_device, process_pings, EvidenceProcessor};
pub use scoring::RoleScorer;
pub use types::{BatchResult, BatchSummary, CellTable, DeviceEvidence, PingRecord, ScoreSet};

/// Engine version recorded in every batch summary
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "place-evidence";
