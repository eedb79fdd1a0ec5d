use crate::error::AppError;
use async_trait::async_trait;

/// Resolves coordinates to a human place name.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, AppError>;
}

/// Place name used when the geocoder cannot answer.
pub fn coordinate_label(latitude: f64, longitude: f64) -> String {
    format!("{:.2}, {:.2}", latitude, longitude)
}

/// Geocoder that never calls out; every lookup yields the coordinate label.
pub struct OfflineGeocoder;

#[async_trait]
impl ReverseGeocoder for OfflineGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, AppError> {
        Ok(coordinate_label(latitude, longitude))
    }
}
