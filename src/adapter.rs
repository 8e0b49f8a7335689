//! Raw row adapter
//!
//! Parses CSV, NDJSON and JSON-array input into loosely typed rows, then
//! validates each row into a [`PingRecord`]. Validation failures are reported as
//! a [`RejectReason`] so the caller can count and skip the row.

use crate::error::{ComputeError, RejectReason};
use crate::geocode::{is_valid_latitude, is_valid_longitude, Geocoder};
use crate::types::{FluxCode, PingRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Offset-aware timestamp layouts, tried in order
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
];

/// Naive timestamp layouts, interpreted as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One input row as read from disk. Every field is optional text until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPingRow {
    #[serde(default)]
    pub maid: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub flux: Option<String>,
    /// Pre-computed cell code
    #[serde(default)]
    pub geohash: Option<String>,
}

impl RawPingRow {
    /// Device id, if present and non-blank
    pub fn device_id(&self) -> Option<&str> {
        non_blank(&self.maid)
    }

    /// Build a row from a JSON object, accepting numbers or strings for any field
    pub fn from_json_value(value: &Value) -> Result<Self, ComputeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ComputeError::ParseError(format!("expected JSON object, got {value}")))?;

        let field = |name: &str| -> Option<String> {
            match obj.get(name) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            }
        };

        Ok(Self {
            maid: field("maid"),
            latitude: field("latitude"),
            longitude: field("longitude"),
            timestamp: field("timestamp"),
            flux: field("flux"),
            geohash: field("geohash"),
        })
    }
}

/// Parsers for the supported input encodings
pub struct RowAdapter;

impl RowAdapter {
    /// Parse CSV with a header row
    pub fn parse_csv(input: &str) -> Result<Vec<RawPingRow>, ComputeError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input.as_bytes());

        let mut rows = Vec::new();
        for record in reader.deserialize::<RawPingRow>() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Parse newline-delimited JSON objects; blank lines are skipped.
    ///
    /// A line that is not a JSON object becomes an empty row, so it is counted
    /// as a row without a device instead of aborting the batch.
    pub fn parse_ndjson(input: &str) -> Result<Vec<RawPingRow>, ComputeError> {
        let mut rows = Vec::new();
        for (line_no, line) in input.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Value>(trimmed)
                .map_err(ComputeError::from)
                .and_then(|value| RawPingRow::from_json_value(&value));
            match parsed {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "malformed NDJSON line");
                    rows.push(RawPingRow::default());
                }
            }
        }
        Ok(rows)
    }

    /// Parse a JSON array of row objects
    pub fn parse_array(input: &str) -> Result<Vec<RawPingRow>, ComputeError> {
        let values: Vec<Value> = serde_json::from_str(input)?;
        values.iter().map(RawPingRow::from_json_value).collect()
    }

    /// Validate a raw row into a ping record.
    ///
    /// Unknown flux codes are dropped silently. A supplied cell code must be a
    /// valid geohash.
    pub fn to_ping(row: &RawPingRow) -> Result<PingRecord, RejectReason> {
        let device_id = row
            .device_id()
            .ok_or(RejectReason::MissingField("maid"))?
            .to_string();

        let lat_raw = non_blank(&row.latitude).ok_or(RejectReason::MissingField("latitude"))?;
        let latitude = lat_raw
            .parse::<f64>()
            .ok()
            .filter(|lat| is_valid_latitude(*lat))
            .ok_or_else(|| RejectReason::InvalidLatitude(lat_raw.to_string()))?;

        let lon_raw = non_blank(&row.longitude).ok_or(RejectReason::MissingField("longitude"))?;
        let longitude = lon_raw
            .parse::<f64>()
            .ok()
            .filter(|lon| is_valid_longitude(*lon))
            .ok_or_else(|| RejectReason::InvalidLongitude(lon_raw.to_string()))?;

        let ts_raw = non_blank(&row.timestamp).ok_or(RejectReason::MissingField("timestamp"))?;
        let timestamp = parse_timestamp(ts_raw)
            .ok_or_else(|| RejectReason::InvalidTimestamp(ts_raw.to_string()))?;

        let cell = match non_blank(&row.geohash) {
            Some(code) if Geocoder::is_valid(code) => Some(code.to_ascii_lowercase()),
            Some(code) => return Err(RejectReason::InvalidCellCode(code.to_string())),
            None => None,
        };

        Ok(PingRecord {
            device_id,
            latitude,
            longitude,
            timestamp,
            flux: row.flux.as_deref().and_then(FluxCode::parse),
            cell,
        })
    }
}

/// Parse an ISO-8601 timestamp into UTC.
///
/// Accepts a `T` or space separator, optional fractional seconds, and an
/// optional `Z` or numeric offset. Timestamps without an offset are UTC, and a
/// bare `YYYY-MM-DD` date is midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let normalized = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc());
        }
    }

    // Date only: midnight UTC
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
