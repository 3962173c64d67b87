//! Fixed-point geo helpers.
//!
//! MAVLink carries latitude/longitude as degrees * 1e7 and most altitudes as
//! millimetres, both as integers. Conversion to the wire truncates toward zero.

/// Degrees -> degE7.
pub const SCALE_DEG: f64 = 1e7;

/// Metres -> millimetres.
pub const SCALE_ALT: f64 = 1000.0;

pub fn deg_to_e7(deg: f64) -> i32 {
    (deg * SCALE_DEG) as i32
}

pub fn e7_to_deg(v: i32) -> f64 {
    v as f64 / SCALE_DEG
}

pub fn alt_to_mm(alt_m: f64) -> i32 {
    (alt_m * SCALE_ALT) as i32
}

pub fn mm_to_alt(mm: i32) -> f64 {
    mm as f64 / SCALE_ALT
}

/// Latitude/longitude range check, used by config validation.
pub fn coords_valid(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0
}
