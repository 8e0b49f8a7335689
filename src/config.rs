//! Engine configuration
//!
//! The hour categories and geohash precisions used by ingestion and feature
//! derivation. A config is built once, validated, and passed by reference into
//! every stage that needs it.

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};

/// Default aggregation precision (geohash-7, cells of roughly 150 m)
pub const DEFAULT_CELL_PRECISION: usize = 7;

/// Default positional precision used for spread measurement (geohash-12, sub-meter)
pub const DEFAULT_POSITION_PRECISION: usize = 12;

/// Longest geohash the geocoder accepts
pub const MAX_PRECISION: usize = 12;

/// Hour-of-day sets (UTC hours, 0-23) feeding the hour-level ratios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourCategories {
    /// Night hours, counted over all days
    pub night: Vec<u32>,
    /// Evening hours, counted over all days
    pub evening: Vec<u32>,
    /// Midday hours, counted over weekdays only
    pub midday_weekday: Vec<u32>,
    /// Working-day hours, counted over weekdays only
    pub weekday_day: Vec<u32>,
}

impl Default for HourCategories {
    fn default() -> Self {
        Self {
            night: vec![22, 23, 0, 1, 2, 3, 4, 5],
            evening: vec![18, 19, 20, 21],
            midday_weekday: vec![11, 12, 13, 14],
            weekday_day: (9..18).collect(),
        }
    }
}

impl HourCategories {
    fn all(&self) -> impl Iterator<Item = (&'static str, &Vec<u32>)> {
        [
            ("night", &self.night),
            ("evening", &self.evening),
            ("midday_weekday", &self.midday_weekday),
            ("weekday_day", &self.weekday_day),
        ]
        .into_iter()
    }
}

/// Immutable engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Geohash length of the aggregation cell
    pub cell_precision: usize,
    /// Geohash length used for per-ping positions
    pub position_precision: usize,
    /// Hour categories for ratio features
    pub hours: HourCategories,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cell_precision: DEFAULT_CELL_PRECISION,
            position_precision: DEFAULT_POSITION_PRECISION,
            hours: HourCategories::default(),
        }
    }
}

impl EngineConfig {
    /// Check precisions and hour sets
    pub fn validate(&self) -> Result<(), ComputeError> {
        for (name, precision) in [
            ("cell_precision", self.cell_precision),
            ("position_precision", self.position_precision),
        ] {
            if precision == 0 || precision > MAX_PRECISION {
                return Err(ComputeError::InvalidConfig(format!(
                    "{name} must be in 1..={MAX_PRECISION}, got {precision}"
                )));
            }
        }

        if self.position_precision < self.cell_precision {
            return Err(ComputeError::InvalidConfig(format!(
                "position_precision ({}) must not be coarser than cell_precision ({})",
                self.position_precision, self.cell_precision
            )));
        }

        for (name, hours) in self.hours.all() {
            if let Some(bad) = hours.iter().find(|&&h| h > 23) {
                return Err(ComputeError::InvalidConfig(format!(
                    "hour {bad} in {name} is outside 0-23"
                )));
            }
        }

        Ok(())
    }

    /// Load and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
