//! Feature derivation
//!
//! This module turns one frozen cell accumulator into a [`DerivedFeatures`]
//! vector:
//! - Day coverage (unique days, span, day-gap histogram, recency)
//! - Day-level and hour-level presence ratios
//! - Hour entropy and monthly stability
//! - Centroid, spatial spread, inter-ping gap and dwell estimate

use crate::accumulator::{
    CellAccumulator, MASK_EARLY_MORNING, MASK_LATE_EVENING, MASK_NIGHT, MASK_WEEKDAY_WORK,
};
use crate::config::EngineConfig;
use crate::error::ComputeError;
use crate::geocode::Geocoder;
use crate::types::{DerivedFeatures, GapBins};
use chrono::{DateTime, Utc};

/// Guard added inside the entropy logarithm
const ENTROPY_EPSILON: f64 = 1e-12;

/// Minimum span (days) used as the denominator of the active-day ratio
const ACTIVE_SPAN_FLOOR_DAYS: u32 = 30;

/// Look-back window (days) for recent activity
const RECENT_WINDOW_DAYS: i64 = 30;

/// Feature deriver for cell accumulators
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive features from a frozen accumulator
    pub fn derive(
        acc: &CellAccumulator,
        config: &EngineConfig,
    ) -> Result<DerivedFeatures, ComputeError> {
        let pings = acc.pings();

        let mut timestamps = acc.timestamps().to_vec();
        timestamps.sort();
        let first_seen = timestamps.first().map(|t| t.timestamp()).unwrap_or(0);
        let last_seen = timestamps.last().map(|t| t.timestamp()).unwrap_or(0);

        let days: Vec<i64> = acc.day_masks().keys().copied().collect();
        let unique_days = days.len() as u32;
        let span_days = match (days.first(), days.last()) {
            (Some(first), Some(last)) => (last - first + 1) as u32,
            _ => 0,
        };
        let gap_bins = compute_gap_bins(&days);

        let day_ratio = |bit: u8| -> f64 {
            if unique_days == 0 {
                return 0.0;
            }
            let flagged = acc.day_masks().values().filter(|m| *m & bit != 0).count();
            flagged as f64 / unique_days as f64
        };

        let active_days_last_30d = match days.last() {
            Some(last) => days
                .iter()
                .filter(|&&d| d >= last - RECENT_WINDOW_DAYS)
                .count() as u32,
            None => 0,
        };

        let hours = &config.hours;
        let weekday_hist = acc.weekday_hist();
        let ratio = |count: u64| -> f64 {
            if pings == 0 {
                0.0
            } else {
                count as f64 / pings as f64
            }
        };

        let (mean_lat, mean_lon, mean_geohash, std_geohash_m) = compute_spatial(acc, config)?;

        let features = DerivedFeatures {
            pings,
            first_seen,
            last_seen,
            unique_days,
            span_days,
            gap_bins,
            night_days_ratio: day_ratio(MASK_NIGHT),
            weekday_work_days_ratio: day_ratio(MASK_WEEKDAY_WORK),
            late_evening_days_ratio: day_ratio(MASK_LATE_EVENING),
            early_morning_days_ratio: day_ratio(MASK_EARLY_MORNING),
            night_ratio: ratio(hour_sum(acc.hourly(), &hours.night)),
            weekday_day_ratio: ratio(hour_sum(acc.hour_weekday(), &hours.weekday_day)),
            weekend_ratio: ratio(weekday_hist[5] + weekday_hist[6]),
            midday_weekday_ratio: ratio(hour_sum(acc.hour_weekday(), &hours.midday_weekday)),
            evening_ratio: ratio(hour_sum(acc.hourly(), &hours.evening)),
            entropy_hour_norm: compute_hour_entropy(acc.hourly()),
            monthly_stability: compute_monthly_stability(acc.monthly().values().copied()),
            mean_lat,
            mean_lon,
            mean_geohash,
            std_geohash_m,
            mean_time_diff_seconds: compute_mean_time_diff(&timestamps),
            est_duration: acc
                .hour_minutes()
                .values()
                .map(|(lo, hi)| hi.saturating_sub(*lo))
                .sum(),
            active_day_ratio: compute_active_day_ratio(unique_days, span_days, &gap_bins),
            active_days_last_30d,
            flux: *acc.flux(),
        };

        check_finite(&features)?;
        Ok(features)
    }
}

/// Bucket the deltas between consecutive distinct days
fn compute_gap_bins(sorted_days: &[i64]) -> GapBins {
    let mut bins = GapBins::default();
    for pair in sorted_days.windows(2) {
        bins.record(pair[1] - pair[0]);
    }
    bins
}

/// Sum histogram buckets for a set of hours; repeated hours count once
fn hour_sum(hist: &[u64; 24], hours: &[u32]) -> u64 {
    let mut selected = [false; 24];
    for &h in hours {
        if let Some(slot) = selected.get_mut(h as usize) {
            *slot = true;
        }
    }
    selected
        .iter()
        .zip(hist.iter())
        .filter(|(on, _)| **on)
        .map(|(_, count)| count)
        .sum()
}

/// Normalized Shannon entropy of an hour histogram
///
/// Formula: `-Σ p·ln(p + ε) / ln(24)` over non-empty buckets.
/// Result: 0.0 = all pings in one hour, 1.0 = perfectly uniform
fn compute_hour_entropy(hist: &[u64; 24]) -> f64 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let first = hist[0];
    if hist.iter().all(|&c| c == first) {
        return 1.0;
    }

    let total = total as f64;
    let entropy: f64 = hist
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * (p + ENTROPY_EPSILON).ln()
        })
        .sum();

    (entropy / (hist.len() as f64).ln()).clamp(0.0, 1.0)
}

/// Monthly stability: `1 / (1 + cv)` of per-month ping counts
///
/// cv is the population standard deviation over the mean; it is 0 with fewer
/// than two months or a zero mean.
fn compute_monthly_stability(counts: impl Iterator<Item = u64>) -> f64 {
    let counts: Vec<f64> = counts.map(|c| c as f64).collect();
    if counts.len() < 2 {
        return 1.0;
    }

    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    1.0 / (1.0 + cv)
}

/// Mean of the strictly positive gaps between sorted timestamps, in seconds
fn compute_mean_time_diff(sorted: &[DateTime<Utc>]) -> f64 {
    let (total, count) = sorted
        .windows(2)
        .map(|pair| seconds_between(&pair[0], &pair[1]))
        .filter(|delta| *delta > 0.0)
        .fold((0.0, 0u64), |(sum, n), delta| (sum + delta, n + 1));

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

fn seconds_between(a: &DateTime<Utc>, b: &DateTime<Utc>) -> f64 {
    let delta = *b - *a;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}

/// Centroid, its fine geohash, and RMS distance of pings from it
fn compute_spatial(
    acc: &CellAccumulator,
    config: &EngineConfig,
) -> Result<(f64, f64, Option<String>, f64), ComputeError> {
    let mut positions: Vec<_> = acc.positions().iter().collect();
    if positions.is_empty() {
        return Ok((0.0, 0.0, None, 0.0));
    }
    // Summation order is fixed so the centroid does not depend on fold order
    positions.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));

    let n = positions.len() as f64;
    let mean_lat = positions.iter().map(|p| p.lat).sum::<f64>() / n;
    let mean_lon = positions.iter().map(|p| p.lon).sum::<f64>() / n;
    let mean_code = Geocoder::encode(mean_lat, mean_lon, config.position_precision)
        .map_err(|e| ComputeError::FeatureError(format!("centroid: {e}")))?;

    if positions.len() <= 1 {
        return Ok((mean_lat, mean_lon, Some(mean_code), 0.0));
    }

    let mut sum_sq = 0.0;
    for p in &positions {
        let d = Geocoder::distance(&p.code, &mean_code)?;
        sum_sq += d * d;
    }

    Ok((mean_lat, mean_lon, Some(mean_code), (sum_sq / n).sqrt()))
}

/// Active-day ratio with a 30-day span floor and a continuity boost
///
/// Formula: `min(1, unique_days / max(30, span_days)) * (0.5 + 0.5 * continuity)`
fn compute_active_day_ratio(unique_days: u32, span_days: u32, gap_bins: &GapBins) -> f64 {
    let capped_span = span_days.max(ACTIVE_SPAN_FLOOR_DAYS);
    let base = (unique_days as f64 / capped_span as f64).min(1.0);
    base * (0.5 + 0.5 * gap_bins.continuity())
}

fn check_finite(features: &DerivedFeatures) -> Result<(), ComputeError> {
    let values = [
        ("night_days_ratio", features.night_days_ratio),
        ("weekday_work_days_ratio", features.weekday_work_days_ratio),
        ("late_evening_days_ratio", features.late_evening_days_ratio),
        ("early_morning_days_ratio", features.early_morning_days_ratio),
        ("night_ratio", features.night_ratio),
        ("weekday_day_ratio", features.weekday_day_ratio),
        ("weekend_ratio", features.weekend_ratio),
        ("midday_weekday_ratio", features.midday_weekday_ratio),
        ("evening_ratio", features.evening_ratio),
        ("entropy_hour_norm", features.entropy_hour_norm),
        ("monthly_stability", features.monthly_stability),
        ("mean_lat", features.mean_lat),
        ("mean_lon", features.mean_lon),
        ("std_geohash_m", features.std_geohash_m),
        ("mean_time_diff_seconds", features.mean_time_diff_seconds),
        ("active_day_ratio", features.active_day_ratio),
    ];
    match values.iter().find(|(_, v)| !v.is_finite()) {
        Some((name, v)) => Err(ComputeError::FeatureError(format!("{name} is {v}"))),
        None => Ok(()),
    }
}
