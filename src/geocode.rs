//! Geohash encoding and great-circle distance
//!
//! Cells are keyed by a coarse geohash; spread is measured between fine
//! geohashes. Both go through the same encoder so that a fixed coordinate always
//! maps to the same code.

use crate::config::MAX_PRECISION;
use crate::error::ComputeError;
use serde::{Deserialize, Serialize};

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Bounding box of a decoded geohash
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    /// Center of the box as (lat, lon)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Center rounded to the decimals the box resolves, as (lat, lon).
    ///
    /// Each axis keeps `max(1, round(-log10(half_width))) - 1` decimals, which is
    /// 6 decimals at precision 12.
    pub fn rounded_center(&self) -> (f64, f64) {
        let (lat, lon) = self.center();
        (
            round_to_resolution(lat, (self.max_lat - self.min_lat) / 2.0),
            round_to_resolution(lon, (self.max_lon - self.min_lon) / 2.0),
        )
    }
}

fn round_to_resolution(value: f64, half_width: f64) -> f64 {
    let decimals = ((-half_width.log10()).round_ties_even() as i64).max(1) - 1;
    format!("{:.*}", decimals as usize, value)
        .parse()
        .unwrap_or(value)
}

/// Stateless geohash encoder/decoder
pub struct Geocoder;

impl Geocoder {
    /// Encode a coordinate at the given precision (1-12 characters)
    pub fn encode(lat: f64, lon: f64, precision: usize) -> Result<String, ComputeError> {
        if precision == 0 || precision > MAX_PRECISION {
            return Err(ComputeError::InvalidConfig(format!(
                "geohash precision must be in 1..={MAX_PRECISION}, got {precision}"
            )));
        }
        if !is_valid_latitude(lat) || !is_valid_longitude(lon) {
            return Err(ComputeError::InvalidCoordinate(format!("({lat}, {lon})")));
        }

        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lon_range = (-180.0_f64, 180.0_f64);
        let mut code = String::with_capacity(precision);
        let mut bits = 0u8;
        let mut bit_count = 0;
        let mut even = true;

        while code.len() < precision {
            let (range, value) = if even {
                (&mut lon_range, lon)
            } else {
                (&mut lat_range, lat)
            };
            let mid = (range.0 + range.1) / 2.0;
            bits <<= 1;
            // Points on a split line fall in the lower half
            if value > mid {
                bits |= 1;
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
            bit_count += 1;

            if bit_count == 5 {
                code.push(BASE32[bits as usize] as char);
                bits = 0;
                bit_count = 0;
            }
        }

        Ok(code)
    }

    /// Decode a geohash into its bounding box
    pub fn decode(code: &str) -> Result<GeoBounds, ComputeError> {
        if code.is_empty() {
            return Err(ComputeError::InvalidGeohash("empty code".to_string()));
        }

        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lon_range = (-180.0_f64, 180.0_f64);
        let mut even = true;

        for ch in code.chars() {
            let idx = base32_index(ch)
                .ok_or_else(|| ComputeError::InvalidGeohash(format!("'{code}' contains '{ch}'")))?;
            for shift in (0..5).rev() {
                let bit = (idx >> shift) & 1;
                let range = if even {
                    &mut lon_range
                } else {
                    &mut lat_range
                };
                let mid = (range.0 + range.1) / 2.0;
                if bit == 1 {
                    range.0 = mid;
                } else {
                    range.1 = mid;
                }
                even = !even;
            }
        }

        Ok(GeoBounds {
            min_lat: lat_range.0,
            max_lat: lat_range.1,
            min_lon: lon_range.0,
            max_lon: lon_range.1,
        })
    }

    /// Great-circle distance in meters between the rounded centers of two geohashes.
    ///
    /// Identical codes are exactly 0 apart.
    pub fn distance(a: &str, b: &str) -> Result<f64, ComputeError> {
        if a == b {
            Self::decode(a)?;
            return Ok(0.0);
        }
        let (lat1, lon1) = Self::decode(a)?.rounded_center();
        let (lat2, lon2) = Self::decode(b)?.rounded_center();
        Ok(haversine_m(lat1, lon1, lat2, lon2))
    }

    /// True if every character of `code` is in the geohash alphabet
    pub fn is_valid(code: &str) -> bool {
        !code.is_empty() && code.len() <= MAX_PRECISION && code.chars().all(|c| base32_index(c).is_some())
    }
}

/// Haversine distance in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn is_valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn is_valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}

fn base32_index(ch: char) -> Option<u8> {
    let lower = ch.to_ascii_lowercase() as u32;
    BASE32
        .iter()
        .position(|&c| c as u32 == lower)
        .map(|i| i as u8)
}
