//! Core types for the evidence pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: validated pings, derived per-cell features, role scores, and the
//! columnar per-device output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation key: a geohash at the cell precision
pub type CellKey = String;

/// Signal source tag attached to a subset of pings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FluxCode {
    B,
    C,
    D,
    E,
    F,
}

impl FluxCode {
    /// Parse a raw flux value. Anything other than the five known codes is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "B" => Some(FluxCode::B),
            "C" => Some(FluxCode::C),
            "D" => Some(FluxCode::D),
            "E" => Some(FluxCode::E),
            "F" => Some(FluxCode::F),
            _ => None,
        }
    }
}

/// Per-code flux counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxTally {
    pub b: u64,
    pub c: u64,
    pub d: u64,
    pub e: u64,
    pub f: u64,
}

impl FluxTally {
    pub fn record(&mut self, code: FluxCode) {
        match code {
            FluxCode::B => self.b += 1,
            FluxCode::C => self.c += 1,
            FluxCode::D => self.d += 1,
            FluxCode::E => self.e += 1,
            FluxCode::F => self.f += 1,
        }
    }

    pub fn merge(&mut self, other: &FluxTally) {
        self.b += other.b;
        self.c += other.c;
        self.d += other.d;
        self.e += other.e;
        self.f += other.f;
    }

    pub fn total(&self) -> u64 {
        self.b + self.c + self.d + self.e + self.f
    }
}

/// A validated ping observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    /// Mobile identifier (MAID)
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Observation instant, normalized to UTC
    pub timestamp: DateTime<Utc>,
    /// Recognized flux code, if any
    pub flux: Option<FluxCode>,
    /// Pre-computed cell code supplied with the row
    pub cell: Option<CellKey>,
}

/// Day-delta histogram over consecutive distinct days
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapBins {
    pub d0: u32,
    pub d1_3: u32,
    pub d4_7: u32,
    pub d8_30: u32,
    pub gt_30: u32,
}

impl GapBins {
    /// Bucket one day delta
    pub fn record(&mut self, delta_days: i64) {
        match delta_days {
            i64::MIN..=0 => self.d0 += 1,
            1..=3 => self.d1_3 += 1,
            4..=7 => self.d4_7 += 1,
            8..=30 => self.d8_30 += 1,
            _ => self.gt_30 += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.d0 + self.d1_3 + self.d4_7 + self.d8_30 + self.gt_30
    }

    /// Share of gaps that are 3 days or shorter (0 gaps counts as denominator 1)
    pub fn continuity(&self) -> f64 {
        (self.d0 + self.d1_3) as f64 / self.total().max(1) as f64
    }
}

/// Features derived once from a frozen cell accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    /// Ping count in the cell
    pub pings: u64,
    /// First observation (unix seconds)
    pub first_seen: i64,
    /// Last observation (unix seconds)
    pub last_seen: i64,
    /// Distinct calendar days observed
    pub unique_days: u32,
    /// Last day - first day + 1
    pub span_days: u32,
    pub gap_bins: GapBins,

    // Day-level presence ratios (days with flag / unique days)
    pub night_days_ratio: f64,
    pub weekday_work_days_ratio: f64,
    pub late_evening_days_ratio: f64,
    pub early_morning_days_ratio: f64,

    // Hour-level ratios (pings in category / pings)
    pub night_ratio: f64,
    pub weekday_day_ratio: f64,
    pub weekend_ratio: f64,
    pub midday_weekday_ratio: f64,
    pub evening_ratio: f64,

    /// Normalized Shannon entropy of the 24-hour histogram (0-1)
    pub entropy_hour_norm: f64,
    /// 1 / (1 + coefficient of variation of monthly counts)
    pub monthly_stability: f64,
    pub mean_lat: f64,
    pub mean_lon: f64,
    /// Fine-precision geohash of the centroid
    pub mean_geohash: Option<String>,
    /// RMS distance (m) of pings from the centroid
    pub std_geohash_m: f64,
    /// Mean of strictly positive consecutive ping gaps (s)
    pub mean_time_diff_seconds: f64,
    /// Sum over hours of (max minute - min minute)
    pub est_duration: u32,
    pub active_day_ratio: f64,
    pub active_days_last_30d: u32,
    pub flux: FluxTally,
}

/// Bounded role scores for one cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub home: f64,
    pub work: f64,
    pub leisure: f64,
    pub pingsink: f64,
}

/// Fixed-schema columnar table: one row per cell, every column shares the row index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellTable {
    pub geohash: Vec<CellKey>,
    pub pings: Vec<u64>,
    pub first_seen: Vec<i64>,
    pub last_seen: Vec<i64>,
    pub unique_days: Vec<u32>,
    pub span_days: Vec<u32>,
    pub gap_bins_0d: Vec<u32>,
    pub gap_bins_1_3d: Vec<u32>,
    pub gap_bins_4_7d: Vec<u32>,
    pub gap_bins_8_30d: Vec<u32>,
    pub gap_bins_gt_30d: Vec<u32>,
    pub active_day_ratio: Vec<f64>,
    pub night_ratio: Vec<f64>,
    pub weekday_day_ratio: Vec<f64>,
    pub weekend_ratio: Vec<f64>,
    pub midday_weekday_ratio: Vec<f64>,
    pub evening_ratio: Vec<f64>,
    pub night_days_ratio: Vec<f64>,
    pub weekday_work_days_ratio: Vec<f64>,
    pub late_evening_days_ratio: Vec<f64>,
    pub early_morning_days_ratio: Vec<f64>,
    pub entropy_hour_norm: Vec<f64>,
    pub monthly_stability: Vec<f64>,
    pub active_days_last_30d: Vec<u32>,
    pub mean_time_diff_seconds: Vec<f64>,
    pub mean_lat: Vec<f64>,
    pub mean_lon: Vec<f64>,
    pub mean_geohash: Vec<Option<String>>,
    pub std_geohash_m: Vec<f64>,
    pub est_duration: Vec<u32>,
    #[serde(rename = "flux_B")]
    pub flux_b: Vec<u64>,
    #[serde(rename = "flux_C")]
    pub flux_c: Vec<u64>,
    #[serde(rename = "flux_D")]
    pub flux_d: Vec<u64>,
    #[serde(rename = "flux_E")]
    pub flux_e: Vec<u64>,
    #[serde(rename = "flux_F")]
    pub flux_f: Vec<u64>,
    pub home_score: Vec<f64>,
    pub work_score: Vec<f64>,
    pub leisure_score: Vec<f64>,
    pub pingsink_score: Vec<f64>,
}

impl CellTable {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.geohash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geohash.is_empty()
    }

    /// Append one cell. Every column grows by exactly one entry.
    pub fn push_row(&mut self, cell: &str, features: &DerivedFeatures, scores: &ScoreSet) {
        self.geohash.push(cell.to_string());
        self.pings.push(features.pings);
        self.first_seen.push(features.first_seen);
        self.last_seen.push(features.last_seen);
        self.unique_days.push(features.unique_days);
        self.span_days.push(features.span_days);
        self.gap_bins_0d.push(features.gap_bins.d0);
        self.gap_bins_1_3d.push(features.gap_bins.d1_3);
        self.gap_bins_4_7d.push(features.gap_bins.d4_7);
        self.gap_bins_8_30d.push(features.gap_bins.d8_30);
        self.gap_bins_gt_30d.push(features.gap_bins.gt_30);
        self.active_day_ratio.push(features.active_day_ratio);
        self.night_ratio.push(features.night_ratio);
        self.weekday_day_ratio.push(features.weekday_day_ratio);
        self.weekend_ratio.push(features.weekend_ratio);
        self.midday_weekday_ratio.push(features.midday_weekday_ratio);
        self.evening_ratio.push(features.evening_ratio);
        self.night_days_ratio.push(features.night_days_ratio);
        self.weekday_work_days_ratio
            .push(features.weekday_work_days_ratio);
        self.late_evening_days_ratio
            .push(features.late_evening_days_ratio);
        self.early_morning_days_ratio
            .push(features.early_morning_days_ratio);
        self.entropy_hour_norm.push(features.entropy_hour_norm);
        self.monthly_stability.push(features.monthly_stability);
        self.active_days_last_30d.push(features.active_days_last_30d);
        self.mean_time_diff_seconds
            .push(features.mean_time_diff_seconds);
        self.mean_lat.push(features.mean_lat);
        self.mean_lon.push(features.mean_lon);
        self.mean_geohash.push(features.mean_geohash.clone());
        self.std_geohash_m.push(features.std_geohash_m);
        self.est_duration.push(features.est_duration);
        self.flux_b.push(features.flux.b);
        self.flux_c.push(features.flux.c);
        self.flux_d.push(features.flux.d);
        self.flux_e.push(features.flux.e);
        self.flux_f.push(features.flux.f);
        self.home_score.push(scores.home);
        self.work_score.push(scores.work);
        self.leisure_score.push(scores.leisure);
        self.pingsink_score.push(scores.pingsink);
    }

    /// Row index of a cell code
    pub fn position(&self, cell: &str) -> Option<usize> {
        self.geohash.iter().position(|g| g == cell)
    }

    /// Score set stored at row `i`
    pub fn scores(&self, i: usize) -> Option<ScoreSet> {
        Some(ScoreSet {
            home: *self.home_score.get(i)?,
            work: *self.work_score.get(i)?,
            leisure: *self.leisure_score.get(i)?,
            pingsink: *self.pingsink_score.get(i)?,
        })
    }

    /// Lengths of every column, for consistency checks
    pub fn column_lengths(&self) -> Vec<usize> {
        vec![
            self.geohash.len(),
            self.pings.len(),
            self.first_seen.len(),
            self.last_seen.len(),
            self.unique_days.len(),
            self.span_days.len(),
            self.gap_bins_0d.len(),
            self.gap_bins_1_3d.len(),
            self.gap_bins_4_7d.len(),
            self.gap_bins_8_30d.len(),
            self.gap_bins_gt_30d.len(),
            self.active_day_ratio.len(),
            self.night_ratio.len(),
            self.weekday_day_ratio.len(),
            self.weekend_ratio.len(),
            self.midday_weekday_ratio.len(),
            self.evening_ratio.len(),
            self.night_days_ratio.len(),
            self.weekday_work_days_ratio.len(),
            self.late_evening_days_ratio.len(),
            self.early_morning_days_ratio.len(),
            self.entropy_hour_norm.len(),
            self.monthly_stability.len(),
            self.active_days_last_30d.len(),
            self.mean_time_diff_seconds.len(),
            self.mean_lat.len(),
            self.mean_lon.len(),
            self.mean_geohash.len(),
            self.std_geohash_m.len(),
            self.est_duration.len(),
            self.flux_b.len(),
            self.flux_c.len(),
            self.flux_d.len(),
            self.flux_e.len(),
            self.flux_f.len(),
            self.home_score.len(),
            self.work_score.len(),
            self.leisure_score.len(),
            self.pingsink_score.len(),
        ]
    }
}

/// Per-device output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvidence {
    pub maid: String,
    /// Accepted pings across all cells
    pub total_pings: u64,
    /// Rows skipped during ingestion
    #[serde(default)]
    pub rejected_rows: u64,
    #[serde(flatten)]
    pub cells: CellTable,
}

/// A device that produced no output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub maid: String,
    pub error: String,
}

/// Batch-level counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub engine_version: String,
    pub rows_total: u64,
    pub rows_rejected: u64,
    /// Rows dropped before grouping because they carry no device id
    pub rows_without_device: u64,
    pub devices_processed: u64,
    pub failures: Vec<DeviceFailure>,
}

/// Result of processing a batch of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// One entry per successfully processed device, ordered by device id
    pub devices: Vec<DeviceEvidence>,
    pub summary: BatchSummary,
}
