//! Geodesic helpers on the WGS84 mean sphere.
//!
//! Distances are great-circle (haversine) distances in meters. Inputs are
//! validated: NaN or out-of-range coordinates fail with
//! [`LocationError::InvalidCoordinate`].

use crate::location::types::LocationError;

/// Mean earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Reject NaN and out-of-range coordinates.
pub fn validate(lat: f64, lon: f64) -> Result<(), LocationError> {
    let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
    let lon_ok = lon.is_finite() && (-180.0..=180.0).contains(&lon);
    if lat_ok && lon_ok {
        Ok(())
    } else {
        Err(LocationError::InvalidCoordinate { lat, lon })
    }
}

/// Great-circle distance between two coordinates, in meters.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<f64, LocationError> {
    validate(lat1, lon1)?;
    validate(lat2, lon2)?;

    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Ok(EARTH_RADIUS * c)
}

/// Arithmetic mean of a set of coordinates.
///
/// Returns `None` for an empty set. This is the plain average used for
/// clustering small neighbourhoods, not a spherical centroid.
pub fn centroid<I>(points: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (mut lat_sum, mut lon_sum, mut n) = (0.0, 0.0, 0usize);
    for (lat, lon) in points {
        lat_sum += lat;
        lon_sum += lon;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some((lat_sum / n as f64, lon_sum / n as f64))
    }
}
