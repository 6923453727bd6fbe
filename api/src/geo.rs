use crate::{errors::ApiError, models::Location};

/// Mean Earth radius in kilometres, the same constant Elasticsearch uses for
/// `arc` distance.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two points using the haversine formula.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// A validated distance-bounded query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    pub center: Location,
    pub radius_km: f64,
}

impl GeoQuery {
    pub fn new(center: Location, radius_km: f64) -> Result<Self, ApiError> {
        if !center.is_valid() {
            return Err(ApiError::ValidationError(
                "lat must be within [-90, 90] and lon within [-180, 180]".into(),
            ));
        }
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(ApiError::ValidationError(
                "range must be a non-negative number of kilometres".into(),
            ));
        }

        Ok(Self { center, radius_km })
    }

    /// Boundary inclusive.
    pub fn contains(&self, point: Location) -> bool {
        haversine_km(self.center, point) <= self.radius_km
    }
}
