//! Role scoring
//!
//! Converts derived cell features into four bounded scores:
//! - home: night and early/late presence, regular over days
//! - work: weekday daytime presence
//! - leisure: weekend and evening presence not explained by home or work
//! - pingsink: stationary clusters that look like location artifacts
//!
//! Low-evidence ratios are pulled toward a prior with [`shrink`], and every
//! place score is scaled by saturating confidence weights on visits and days.

use crate::types::{DerivedFeatures, ScoreSet};

/// Prior pseudo-count used by [`shrink`]
pub const SHRINK_STRENGTH: f64 = 2.0;

/// Share of hours that are night hours
pub const NIGHT_PRIOR: f64 = 8.0 / 24.0;
/// Share of weekly hours that are weekday working hours
pub const WEEKDAY_DAY_PRIOR: f64 = 45.0 / 168.0;
/// Share of days that are weekend days
pub const WEEKEND_PRIOR: f64 = 2.0 / 7.0;
/// Share of hours that are evening hours
pub const EVENING_PRIOR: f64 = 4.0 / 24.0;

/// Visit count at which confidence reaches 1 - 1/e
pub const VISITS_SCALE: f64 = 5.0;
/// Day count at which confidence reaches 1 - 1/e
pub const DAYS_SCALE: f64 = 3.0;

/// Pings at or below this count never form a pingsink
pub const PINGSINK_MIN_PINGS: u64 = 5;

/// Bayesian ratio shrinkage toward `prior` with `a` pseudo-observations
///
/// Formula: `(ratio * n + a * prior) / (n + a)`, or `prior` when `n + a <= 0`.
pub fn shrink(ratio: f64, n: f64, prior: f64, a: f64) -> f64 {
    if n + a > 0.0 {
        (ratio * n + a * prior) / (n + a)
    } else {
        prior
    }
}

/// Saturating confidence weight: `1 - e^(-x/k)`
pub fn confidence_weight(x: f64, k: f64) -> f64 {
    1.0 - (-x / k).exp()
}

/// Recency multiplier: `min(1, 0.5 + 0.5 * active_days_last_30d / divisor)`
fn recency(active_days_last_30d: u32, divisor: f64) -> f64 {
    (0.5 + 0.5 * (active_days_last_30d as f64 / divisor)).min(1.0)
}

fn confidence(f: &DerivedFeatures) -> f64 {
    confidence_weight(f.pings as f64, VISITS_SCALE)
        * confidence_weight(f.unique_days as f64, DAYS_SCALE)
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Home score
pub fn score_home(f: &DerivedFeatures) -> f64 {
    let night_ratio = shrink(f.night_ratio, f.pings as f64, NIGHT_PRIOR, SHRINK_STRENGTH);
    let base = 0.375 * f.night_days_ratio
        + 0.10 * night_ratio
        + 0.15 * f.late_evening_days_ratio
        + 0.10 * f.early_morning_days_ratio
        + 0.075 * (1.0 - f.entropy_hour_norm)
        + 0.25 * f.active_day_ratio
        + 0.05 * f.monthly_stability;

    clamp01(base * confidence(f) * recency(f.active_days_last_30d, 10.0))
}

/// Work score
pub fn score_work(f: &DerivedFeatures) -> f64 {
    let weekday_day_ratio = shrink(
        f.weekday_day_ratio,
        f.pings as f64,
        WEEKDAY_DAY_PRIOR,
        SHRINK_STRENGTH,
    );
    let base = 0.425 * f.weekday_work_days_ratio
        + 0.15 * weekday_day_ratio
        + 0.10 * f.midday_weekday_ratio
        + 0.075 * (1.0 - f.entropy_hour_norm)
        + 0.20 * f.active_day_ratio
        + 0.05 * f.monthly_stability;

    clamp01(base * confidence(f) * recency(f.active_days_last_30d, 10.0))
}

/// Leisure score. Depends on the home and work scores of the same cell.
pub fn score_leisure(f: &DerivedFeatures, home: f64, work: f64) -> f64 {
    let n = f.pings as f64;
    let weekend_ratio = shrink(f.weekend_ratio, n, WEEKEND_PRIOR, SHRINK_STRENGTH);
    let evening_ratio = shrink(f.evening_ratio, n, EVENING_PRIOR, SHRINK_STRENGTH);
    let inverse_pattern = 1.0 - (home + work) / 2.0;
    let base = 0.25 * weekend_ratio
        + 0.20 * evening_ratio
        + 0.15 * (1.0 - f.entropy_hour_norm)
        + 0.10 * (1.0 - f.monthly_stability)
        + 0.30 * inverse_pattern;

    clamp01(base * confidence(f) * recency(f.active_days_last_30d, 15.0))
}

/// Importance of a cell within its device: `0.8 + 0.2 * sqrt(pings / total)`
pub fn pingsink_importance(cell_pings: u64, total_device_pings: u64) -> f64 {
    if total_device_pings == 0 {
        return 1.0;
    }
    0.8 + 0.2 * (cell_pings as f64 / total_device_pings as f64).sqrt()
}

/// Pingsink score
///
/// Zero for sparse cells, exactly 1 for a cell whose pings share one position,
/// otherwise a blend of spatial tightness, temporal density and volume.
pub fn score_pingsink(f: &DerivedFeatures, total_device_pings: u64) -> f64 {
    if f.pings <= PINGSINK_MIN_PINGS {
        return 0.0;
    }
    if f.std_geohash_m == 0.0 {
        return 1.0;
    }

    let geo_stability = 0.7 * (-f.std_geohash_m / 20.0).exp();
    let gap_minutes = f.mean_time_diff_seconds / 60.0;
    let temporal_density = 0.1 * (-gap_minutes / 60.0).exp();
    let ping_factor = 1.0 - (-(f.pings as f64) / 50.0).exp();
    let base = geo_stability + temporal_density + 0.2 * ping_factor;

    clamp01(base * pingsink_importance(f.pings, total_device_pings))
}

/// Scorer producing the full [`ScoreSet`] for a cell
pub struct RoleScorer;

impl RoleScorer {
    /// Score one cell. Leisure is computed last since it uses home and work.
    pub fn score(features: &DerivedFeatures, total_device_pings: u64) -> ScoreSet {
        let home = score_home(features);
        let work = score_work(features);
        let leisure = score_leisure(features, home, work);
        let pingsink = score_pingsink(features, total_device_pings);

        ScoreSet {
            home,
            work,
            leisure,
            pingsink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::CellAccumulator;
    use crate::config::EngineConfig;
    use crate::features::FeatureDeriver;
    use crate::geocode::Geocoder;
    use crate::types::{FluxTally, GapBins, PingRecord};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn features_from(pings: &[(f64, f64, i64)]) -> DerivedFeatures {
        let config = EngineConfig::default();
        let mut acc = CellAccumulator::new();
        for &(lat, lon, secs) in pings {
            let ping = PingRecord {
                device_id: "maid".to_string(),
                latitude: lat,
                longitude: lon,
                timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
                flux: None,
                cell: None,
            };
            let code = Geocoder::encode(lat, lon, config.position_precision).unwrap();
            acc.fold(&ping, code);
        }
        FeatureDeriver::derive(&acc, &config).unwrap()
    }

    fn blank() -> DerivedFeatures {
        DerivedFeatures {
            pings: 0,
            first_seen: 0,
            last_seen: 0,
            unique_days: 0,
            span_days: 0,
            gap_bins: GapBins::default(),
            night_days_ratio: 0.0,
            weekday_work_days_ratio: 0.0,
            late_evening_days_ratio: 0.0,
            early_morning_days_ratio: 0.0,
            night_ratio: 0.0,
            weekday_day_ratio: 0.0,
            weekend_ratio: 0.0,
            midday_weekday_ratio: 0.0,
            evening_ratio: 0.0,
            entropy_hour_norm: 0.0,
            monthly_stability: 1.0,
            mean_lat: 0.0,
            mean_lon: 0.0,
            mean_geohash: None,
            std_geohash_m: 0.0,
            mean_time_diff_seconds: 0.0,
            est_duration: 0,
            active_day_ratio: 0.0,
            active_days_last_30d: 0,
            flux: FluxTally::default(),
        }
    }

    // 2024-01-10 00:00:00 UTC
    const BASE: i64 = 1_704_844_800;
    const DAY: i64 = 86_400;

    #[test]
    fn test_shrink() {
        assert_eq!(shrink(0.9, 0.0, 0.3, 2.0), 0.3);
        assert_eq!(shrink(0.5, -2.0, 0.3, 2.0), 0.3);
        assert!((shrink(1.0, 2.0, 0.0, 2.0) - 0.5).abs() < 1e-12);
        // Converges to the raw ratio as n grows
        assert!((shrink(0.9, 1e9, 0.1, 2.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_weight() {
        assert_eq!(confidence_weight(0.0, 5.0), 0.0);
        assert!((confidence_weight(5.0, 5.0) - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
        assert!(confidence_weight(1000.0, 5.0) > 0.999);
    }

    #[test]
    fn test_nightly_cell_scores_home_over_work() {
        let pings: Vec<_> = (0..6).map(|i| (48.85, 2.35, BASE + i * DAY + 2 * 3600)).collect();
        let f = features_from(&pings);
        let scores = RoleScorer::score(&f, 6);

        assert!(scores.home > scores.work + 0.1);
        assert!(scores.home > 0.25);
    }

    fn mixed_use_cell() -> DerivedFeatures {
        let mut f = blank();
        f.pings = 20;
        f.unique_days = 8;
        f.active_days_last_30d = 6;
        f.night_days_ratio = 0.5;
        f.weekday_work_days_ratio = 0.25;
        f.late_evening_days_ratio = 0.375;
        f.early_morning_days_ratio = 0.125;
        f.night_ratio = 0.4;
        f.weekday_day_ratio = 0.3;
        f.weekend_ratio = 0.35;
        f.midday_weekday_ratio = 0.15;
        f.evening_ratio = 0.2;
        f.entropy_hour_norm = 0.6;
        f.monthly_stability = 0.8;
        f.active_day_ratio = 0.3;
        f
    }

    #[test]
    fn test_role_scores_exact_values() {
        let f = mixed_use_cell();
        let scores = RoleScorer::score(&f, 40);

        // Recency 0.8 for home and work (6 / 10), 0.7 for leisure (6 / 15)
        assert!((scores.home - 0.3220132646588937).abs() < 1e-12, "home {}", scores.home);
        assert!((scores.work - 0.21617292094955343).abs() < 1e-12, "work {}", scores.work);
        assert!(
            (scores.leisure - 0.27156972943517227).abs() < 1e-12,
            "leisure {}",
            scores.leisure
        );
    }

    #[test]
    fn test_recency_saturates_at_ten_days() {
        let mut f = mixed_use_cell();
        f.active_days_last_30d = 30;
        assert!((score_home(&f) - 0.4025165808236171).abs() < 1e-12);

        f.active_days_last_30d = 10;
        assert!((score_home(&f) - 0.4025165808236171).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_cell_is_not_a_pingsink() {
        let pings: Vec<_> = (0..3).map(|i| (10.0 + i as f64 * 0.0005, 10.0, BASE + i * 600)).collect();
        let f = features_from(&pings);
        assert_eq!(score_pingsink(&f, 3), 0.0);

        let mut stationary = blank();
        stationary.pings = 5;
        assert_eq!(score_pingsink(&stationary, 5), 0.0);
    }

    #[test]
    fn test_stationary_cell_is_a_perfect_pingsink() {
        let pings: Vec<_> = (0..10).map(|i| (40.712776, -74.005974, BASE + i * 60)).collect();
        let f = features_from(&pings);
        assert_eq!(f.std_geohash_m, 0.0);

        // Independent of the device total
        assert_eq!(score_pingsink(&f, 10), 1.0);
        assert_eq!(score_pingsink(&f, 10_000), 1.0);
    }

    #[test]
    fn test_pingsink_importance_by_share() {
        let big = pingsink_importance(90, 100);
        let small = pingsink_importance(10, 100);
        assert!((big - (0.8 + 0.2 * 0.9f64.sqrt())).abs() < 1e-12);
        assert!((small - (0.8 + 0.2 * 0.1f64.sqrt())).abs() < 1e-12);
        assert!(big > small);
        assert_eq!(pingsink_importance(10, 0), 1.0);
    }

    #[test]
    fn test_pingsink_blend() {
        let mut f = blank();
        f.pings = 50;
        f.std_geohash_m = 20.0;
        f.mean_time_diff_seconds = 3600.0;

        let base = 0.7 * (-1.0f64).exp() + 0.1 * (-1.0f64).exp() + 0.2 * (1.0 - (-1.0f64).exp());
        let expected = base * pingsink_importance(50, 100);
        assert!((score_pingsink(&f, 100) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_features_score_zero() {
        let scores = RoleScorer::score(&blank(), 0);
        assert_eq!(scores, ScoreSet::default());
    }

    #[test]
    fn test_leisure_uses_inverse_pattern() {
        let mut f = blank();
        f.pings = 100;
        f.unique_days = 30;
        f.active_days_last_30d = 30;
        let low = score_leisure(&f, 1.0, 1.0);
        let high = score_leisure(&f, 0.0, 0.0);
        assert!((high - low - 0.30 * confidence(&f)).abs() < 1e-9);
    }

    fn arb_features() -> impl Strategy<Value = DerivedFeatures> {
        (
            (0u64..5000, 0u32..400, 0u32..60),
            (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
            (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
            (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
            (0.0f64..5000.0, 0.0f64..1e7),
        )
            .prop_map(|(counts, days, hours, misc, spread)| {
                let mut f = blank();
                f.pings = counts.0;
                f.unique_days = counts.1;
                f.active_days_last_30d = counts.2;
                f.night_days_ratio = days.0;
                f.weekday_work_days_ratio = days.1;
                f.late_evening_days_ratio = days.2;
                f.early_morning_days_ratio = days.3;
                f.night_ratio = hours.0;
                f.weekday_day_ratio = hours.1;
                f.weekend_ratio = hours.2;
                f.midday_weekday_ratio = hours.3;
                f.evening_ratio = hours.4;
                f.entropy_hour_norm = misc.0;
                f.monthly_stability = misc.1;
                f.active_day_ratio = misc.2;
                f.std_geohash_m = spread.0;
                f.mean_time_diff_seconds = spread.1;
                f
            })
    }

    proptest! {
        #[test]
        fn prop_scores_are_bounded(f in arb_features(), extra in 0u64..10_000) {
            let s = RoleScorer::score(&f, f.pings + extra);
            for v in [s.home, s.work, s.leisure, s.pingsink] {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }

        #[test]
        fn prop_sparse_cells_never_sink(mut f in arb_features(), n in 0u64..=5) {
            f.pings = n;
            prop_assert_eq!(score_pingsink(&f, 100), 0.0);
        }
    }
}
