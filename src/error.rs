//! Error types for place-evidence

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature derivation error: {0}")]
    FeatureError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Device {maid} failed: {reason}")]
    DeviceFailed { maid: String, reason: String },
}

/// Why a single input row was skipped.
///
/// Rejections never abort a device; they are counted on the evidence store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid latitude: {0}")]
    InvalidLatitude(String),

    #[error("invalid longitude: {0}")]
    InvalidLongitude(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid cell code: {0}")]
    InvalidCellCode(String),

    #[error("row belongs to another device: {0}")]
    ForeignDevice(String),
}
