//! Per-cell evidence accumulation
//!
//! A [`CellAccumulator`] collects every ping observed for one (device, cell)
//! pair. Folding is order-insensitive: each quantity is either a count,
//! a histogram, a bitwise OR, a min/max, or a list that is sorted before use.

use crate::types::{FluxTally, PingRecord};
use chrono::{Datelike, DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ping at an hour in [4, 6]
pub const MASK_EARLY_MORNING: u8 = 0x1;
/// Ping at an hour in [20, 23]
pub const MASK_LATE_EVENING: u8 = 0x2;
/// Ping on a weekday at an hour in [9, 17]
pub const MASK_WEEKDAY_WORK: u8 = 0x4;
/// Ping at an hour >= 22 or <= 5
pub const MASK_NIGHT: u8 = 0x8;

/// Day-level flags for a ping at `hour` on a day that is (or is not) a weekday
pub fn day_mask(hour: u32, is_weekday: bool) -> u8 {
    let mut mask = 0;
    if (4..=6).contains(&hour) {
        mask |= MASK_EARLY_MORNING;
    }
    if (20..=23).contains(&hour) {
        mask |= MASK_LATE_EVENING;
    }
    if is_weekday && (9..=17).contains(&hour) {
        mask |= MASK_WEEKDAY_WORK;
    }
    if hour >= 22 || hour <= 5 {
        mask |= MASK_NIGHT;
    }
    mask
}

/// Calendar-day ordinal, 0001-01-01 = 1
pub fn day_ordinal(ts: &DateTime<Utc>) -> i64 {
    ts.date_naive().num_days_from_ce() as i64
}

/// One observed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    /// Geohash at the positional precision
    pub code: String,
}

/// Running aggregate for one (device, cell)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellAccumulator {
    pings: u64,
    positions: Vec<Position>,
    timestamps: Vec<DateTime<Utc>>,
    hourly: [u64; 24],
    hour_weekday: [u64; 24],
    hour_weekend: [u64; 24],
    /// Monday = 0
    weekday_hist: [u64; 7],
    /// Day ordinal -> OR of day masks
    day_masks: BTreeMap<i64, u8>,
    /// "YYYY-MM" -> pings
    monthly: BTreeMap<String, u64>,
    /// Hour -> (min minute, max minute)
    hour_minutes: BTreeMap<u32, (u32, u32)>,
    flux: FluxTally,
}

impl Default for CellAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CellAccumulator {
    pub fn new() -> Self {
        Self {
            pings: 0,
            positions: Vec::new(),
            timestamps: Vec::new(),
            hourly: [0; 24],
            hour_weekday: [0; 24],
            hour_weekend: [0; 24],
            weekday_hist: [0; 7],
            day_masks: BTreeMap::new(),
            monthly: BTreeMap::new(),
            hour_minutes: BTreeMap::new(),
            flux: FluxTally::default(),
        }
    }

    /// Fold one ping. `position_code` is the ping's fine-precision geohash.
    pub fn fold(&mut self, ping: &PingRecord, position_code: String) {
        let ts = ping.timestamp;
        let hour = ts.hour();
        let minute = ts.minute();
        let weekday = ts.weekday().num_days_from_monday() as usize;
        let is_weekday = weekday < 5;

        self.pings += 1;
        self.positions.push(Position {
            lat: ping.latitude,
            lon: ping.longitude,
            code: position_code,
        });
        self.timestamps.push(ts);

        self.hourly[hour as usize] += 1;
        self.weekday_hist[weekday] += 1;
        if is_weekday {
            self.hour_weekday[hour as usize] += 1;
        } else {
            self.hour_weekend[hour as usize] += 1;
        }

        self.hour_minutes
            .entry(hour)
            .and_modify(|(lo, hi)| {
                *lo = (*lo).min(minute);
                *hi = (*hi).max(minute);
            })
            .or_insert((minute, minute));

        if let Some(code) = ping.flux {
            self.flux.record(code);
        }

        *self.day_masks.entry(day_ordinal(&ts)).or_insert(0) |= day_mask(hour, is_weekday);

        let month_key = format!("{:04}-{:02}", ts.year(), ts.month());
        *self.monthly.entry(month_key).or_insert(0) += 1;
    }

    /// Combine another partial accumulator for the same cell into this one
    pub fn merge(&mut self, other: CellAccumulator) {
        self.pings += other.pings;
        self.positions.extend(other.positions);
        self.timestamps.extend(other.timestamps);

        for h in 0..24 {
            self.hourly[h] += other.hourly[h];
            self.hour_weekday[h] += other.hour_weekday[h];
            self.hour_weekend[h] += other.hour_weekend[h];
        }
        for d in 0..7 {
            self.weekday_hist[d] += other.weekday_hist[d];
        }

        for (day, mask) in other.day_masks {
            *self.day_masks.entry(day).or_insert(0) |= mask;
        }
        for (month, count) in other.monthly {
            *self.monthly.entry(month).or_insert(0) += count;
        }
        for (hour, (lo, hi)) in other.hour_minutes {
            self.hour_minutes
                .entry(hour)
                .and_modify(|(cur_lo, cur_hi)| {
                    *cur_lo = (*cur_lo).min(lo);
                    *cur_hi = (*cur_hi).max(hi);
                })
                .or_insert((lo, hi));
        }
        self.flux.merge(&other.flux);
    }

    pub fn pings(&self) -> u64 {
        self.pings
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Observed instants in fold order
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn hourly(&self) -> &[u64; 24] {
        &self.hourly
    }

    pub fn hour_weekday(&self) -> &[u64; 24] {
        &self.hour_weekday
    }

    pub fn hour_weekend(&self) -> &[u64; 24] {
        &self.hour_weekend
    }

    pub fn weekday_hist(&self) -> &[u64; 7] {
        &self.weekday_hist
    }

    pub fn day_masks(&self) -> &BTreeMap<i64, u8> {
        &self.day_masks
    }

    pub fn monthly(&self) -> &BTreeMap<String, u64> {
        &self.monthly
    }

    pub fn hour_minutes(&self) -> &BTreeMap<u32, (u32, u32)> {
        &self.hour_minutes
    }

    pub fn flux(&self) -> &FluxTally {
        &self.flux
    }

    /// Histogram totals agree with the ping count
    pub fn is_consistent(&self) -> bool {
        let hourly: u64 = self.hourly.iter().sum();
        let weekly: u64 = self.weekday_hist.iter().sum();
        let split = (0..24).all(|h| self.hour_weekday[h] + self.hour_weekend[h] == self.hourly[h]);
        hourly == self.pings
            && weekly == self.pings
            && split
            && self.positions.len() as u64 == self.pings
            && self.timestamps.len() as u64 == self.pings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FluxCode;
    use chrono::TimeZone;

    fn ping(y: i32, mo: u32, d: u32, h: u32, mi: u32, flux: Option<FluxCode>) -> PingRecord {
        PingRecord {
            device_id: "maid".to_string(),
            latitude: 10.0,
            longitude: 20.0,
            timestamp: Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap(),
            flux,
            cell: None,
        }
    }

    #[test]
    fn test_day_mask_bits() {
        assert_eq!(day_mask(2, true), MASK_NIGHT);
        assert_eq!(day_mask(5, false), MASK_EARLY_MORNING | MASK_NIGHT);
        assert_eq!(day_mask(6, true), MASK_EARLY_MORNING);
        assert_eq!(day_mask(12, true), MASK_WEEKDAY_WORK);
        assert_eq!(day_mask(12, false), 0);
        assert_eq!(day_mask(21, true), MASK_LATE_EVENING);
        assert_eq!(day_mask(22, true), MASK_LATE_EVENING | MASK_NIGHT);
        assert_eq!(day_mask(18, true), 0);
    }

    #[test]
    fn test_day_ordinal_matches_proleptic_count() {
        let ts = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(day_ordinal(&ts), 1);
        let a = Utc.with_ymd_and_hms(2024, 2, 28, 23, 59, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(day_ordinal(&b) - day_ordinal(&a), 2);
    }

    #[test]
    fn test_fold_updates_histograms() {
        let mut acc = CellAccumulator::new();
        // 2024-01-15 is a Monday, 2024-01-20 a Saturday
        acc.fold(&ping(2024, 1, 15, 10, 5, Some(FluxCode::B)), "s0".to_string());
        acc.fold(&ping(2024, 1, 15, 10, 45, None), "s0".to_string());
        acc.fold(&ping(2024, 1, 20, 23, 0, Some(FluxCode::F)), "s0".to_string());

        assert_eq!(acc.pings(), 3);
        assert_eq!(acc.hourly()[10], 2);
        assert_eq!(acc.hour_weekday()[10], 2);
        assert_eq!(acc.hour_weekend()[23], 1);
        assert_eq!(acc.weekday_hist()[0], 2);
        assert_eq!(acc.weekday_hist()[5], 1);
        assert_eq!(acc.hour_minutes()[&10], (5, 45));
        assert_eq!(acc.flux().b, 1);
        assert_eq!(acc.flux().f, 1);
        assert_eq!(acc.monthly()["2024-01"], 3);
        assert_eq!(acc.day_masks().len(), 2);
        assert!(acc.is_consistent());
    }

    #[test]
    fn test_day_masks_accumulate_with_or() {
        let mut acc = CellAccumulator::new();
        acc.fold(&ping(2024, 1, 15, 5, 0, None), "s0".to_string());
        acc.fold(&ping(2024, 1, 15, 12, 0, None), "s0".to_string());
        acc.fold(&ping(2024, 1, 15, 21, 0, None), "s0".to_string());

        let mask = *acc.day_masks().values().next().unwrap();
        assert_eq!(
            mask,
            MASK_EARLY_MORNING | MASK_NIGHT | MASK_WEEKDAY_WORK | MASK_LATE_EVENING
        );
    }

    #[test]
    fn test_merge_equals_single_fold() {
        let pings = vec![
            ping(2024, 1, 15, 2, 10, Some(FluxCode::C)),
            ping(2024, 1, 16, 2, 50, None),
            ping(2024, 2, 3, 14, 0, Some(FluxCode::D)),
            ping(2024, 2, 3, 14, 30, None),
        ];

        let mut whole = CellAccumulator::new();
        for p in &pings {
            whole.fold(p, "s0".to_string());
        }

        let mut left = CellAccumulator::new();
        let mut right = CellAccumulator::new();
        for p in &pings[..2] {
            left.fold(p, "s0".to_string());
        }
        for p in &pings[2..] {
            right.fold(p, "s0".to_string());
        }
        left.merge(right);

        assert_eq!(left, whole);
        assert!(left.is_consistent());
    }
}
