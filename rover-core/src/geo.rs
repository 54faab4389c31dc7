//! Geometry contracts used by the navigator (§4.5.6): great-circle bearing,
//! haversine distance, signed angle normalization, and circular mean.

use rover_types::GeodeticPosition;

/// Mean Earth radius in meters, per spec.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

fn to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

/// Great-circle distance between two `(lat, lon)` points, in meters.
pub fn haversine_ll(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lat2) = (to_rad(a.0), to_rad(b.0));
    let dlat = lat2 - lat1;
    let dlon = to_rad(b.1) - to_rad(a.1);

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Great-circle distance between two positions, in meters.
pub fn haversine(a: &GeodeticPosition, b: &GeodeticPosition) -> f64 {
    haversine_ll((a.lat, a.lon), (b.lat, b.lon))
}

/// Initial great-circle bearing from `a` to `b`, degrees in `[0, 360)`.
pub fn bearing_ll(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lat2) = (to_rad(a.0), to_rad(b.0));
    let dlon = to_rad(b.1) - to_rad(a.1);

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Initial great-circle bearing from `a` to `b`, degrees in `[0, 360)`.
pub fn initial_bearing(a: &GeodeticPosition, b: &GeodeticPosition) -> f64 {
    bearing_ll((a.lat, a.lon), (b.lat, b.lon))
}

/// Normalize any angle in degrees into `(-180, 180]`.
pub fn normalize_signed(theta: f64) -> f64 {
    let mut t = theta % 360.0;
    if t <= -180.0 {
        t += 360.0;
    } else if t > 180.0 {
        t -= 360.0;
    }
    // `%` can leave exactly -180.0 on the wrong side for some inputs; fold it.
    if t == -180.0 {
        t = 180.0;
    }
    t
}

/// Circular mean of a set of heading samples in degrees, via sum of unit
/// vectors. Returns `None` for an empty slice.
pub fn circular_mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let (mut sum_sin, mut sum_cos) = (0.0, 0.0);
    for &s in samples {
        let r = to_rad(s);
        sum_sin += r.sin();
        sum_cos += r.cos();
    }
    let mean = sum_sin.atan2(sum_cos).to_degrees();
    Some((mean + 360.0) % 360.0)
}

/// Circular range (max - min mod 360) of a set of heading samples, degrees.
/// Used by CALIBRATING's acceptance test (< 15°). Returns 0 for <2 samples.
pub fn circular_range(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    // For a tight cluster (which is what we're testing for), the circular
    // range equals the max pairwise angular separation. With the small
    // sample counts involved (calibration collects a handful of samples)
    // an O(n^2) scan is simplest and clearest.
    let mut max_sep: f64 = 0.0;
    for i in 0..samples.len() {
        for j in (i + 1)..samples.len() {
            let sep = normalize_signed(samples[i] - samples[j]).abs();
            max_sep = max_sep.max(sep);
        }
    }
    max_sep
}
