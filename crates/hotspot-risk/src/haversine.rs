//! Haversine distance engine
//!
//! Great-circle distance on a sphere. Every function here takes points as
//! `[lat, lon]` in **radians** and returns an angular distance in radians;
//! multiply by [`EARTH_RADIUS_KM`] (or call [`to_km`]) for kilometres.
//!
//! Inputs are not validated: degrees passed where radians are expected give
//! silently wrong distances. Convert with [`to_radians`] first.

use crate::EARTH_RADIUS_KM;
use rayon::prelude::*;

/// `[lat, lon]` in radians
pub type RadPoint = [f64; 2];

/// Degrees to a radian point
pub fn to_radians(lat_deg: f64, lon_deg: f64) -> RadPoint {
    [lat_deg.to_radians(), lon_deg.to_radians()]
}

/// Angular distance to km
pub fn to_km(angular: f64) -> f64 {
    angular * EARTH_RADIUS_KM
}

/// km to angular distance (the unit of `eps`)
pub fn km_to_angular(km: f64) -> f64 {
    km / EARTH_RADIUS_KM
}

/// Angular great-circle distance between two radian points.
///
/// `2·asin(√(sin²(Δφ/2) + cos φ₁·cos φ₂·sin²(Δλ/2)))`. Symmetric bit-for-bit
/// in its arguments.
#[inline]
pub fn haversine(a: RadPoint, b: RadPoint) -> f64 {
    haversine_with_cos(a, a[0].cos(), b)
}

/// Same as [`haversine`] with `cos(a.lat)` supplied by the caller, so that a
/// one-to-many sweep pays for it once.
#[inline]
fn haversine_with_cos(a: RadPoint, cos_a_lat: f64, b: RadPoint) -> f64 {
    let half_dlat = ((b[0] - a[0]) / 2.0).sin();
    let half_dlon = ((b[1] - a[1]) / 2.0).sin();
    let h = half_dlat * half_dlat + cos_a_lat * b[0].cos() * half_dlon * half_dlon;
    2.0 * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Haversine distance between two degree coordinates, in km
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    to_km(haversine(to_radians(lat1, lon1), to_radians(lat2, lon2)))
}

/// Distances from one query to every target, in target order
pub fn distances_to_many(query: RadPoint, targets: &[RadPoint]) -> Vec<f64> {
    let cos_q = query[0].cos();
    targets
        .iter()
        .map(|&t| haversine_with_cos(query, cos_q, t))
        .collect()
}

/// Row-major `[queries.len() × targets.len()]` distance matrix.
///
/// Rows are computed in parallel.
pub fn distance_matrix(queries: &[RadPoint], targets: &[RadPoint]) -> Vec<f64> {
    let n = targets.len();
    let mut out = vec![0.0; queries.len() * n];
    if n == 0 {
        return out;
    }
    out.par_chunks_mut(n)
        .zip(queries.par_iter())
        .for_each(|(row, &q)| {
            let cos_q = q[0].cos();
            for (slot, &t) in row.iter_mut().zip(targets) {
                *slot = haversine_with_cos(q, cos_q, t);
            }
        });
    out
}

/// Index and distance of the closest target, first index on ties.
///
/// Brute-force reference for the ball tree's nearest query.
pub fn nearest_brute_force(query: RadPoint, targets: &[RadPoint]) -> Option<(usize, f64)> {
    distances_to_many(query, targets)
        .into_iter()
        .enumerate()
        .fold(None, |best, (i, d)| match best {
            Some((_, best_d)) if d >= best_d => best,
            _ => Some((i, d)),
        })
}
