use crate::models::provider::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let half_lat = ((b.lat - a.lat).to_radians() / 2.0).sin();
    let half_lng = ((b.lng - a.lng).to_radians() / 2.0).sin();

    let h = half_lat * half_lat
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * half_lng * half_lng;

    EARTH_RADIUS_KM * 2.0 * h.sqrt().asin()
}

/// Distance when either side may lack a position. Infinite distance never
/// ranks; callers pre-filter, so this is only a defensive fallback.
pub fn distance_km(a: Option<&GeoPoint>, b: Option<&GeoPoint>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => haversine_km(a, b),
        _ => f64::INFINITY,
    }
}
