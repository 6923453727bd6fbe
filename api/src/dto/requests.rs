use crate::errors::ApiError;
use serde::Deserialize;
use validator::Validate;

/// Body of both `/signup` and `/login`. Missing fields decode as empty strings
/// so they are reported by validation rather than by the JSON extractor.
#[derive(Debug, Validate, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 128, message = "Password must be 1-128 characters"))]
    pub password: String,
}

/// GET /search query string. `range` is in kilometres; absent or empty
/// means the configured default.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub range: Option<String>,
}

impl SearchParams {
    pub fn radius_km(&self, default_km: f64) -> Result<f64, ApiError> {
        match self.range.as_deref().map(str::trim) {
            None | Some("") => Ok(default_km),
            Some(raw) => raw
                .trim_end_matches("km")
                .parse()
                .map_err(|_| ApiError::ValidationError(format!("Invalid range: {raw}"))),
        }
    }
}
