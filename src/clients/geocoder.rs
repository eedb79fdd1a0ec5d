use super::{endpoint, ensure_success, http_client};
use crate::config::GeocoderConfig;
use crate::error::AppError;
use crate::geocode::ReverseGeocoder;
use async_trait::async_trait;
use serde_json::Value;

/// Reverse geocoding against an AMap-style `regeo` endpoint.
pub struct HttpGeocoder {
    client: reqwest::Client,
    url: url::Url,
    api_key: String,
    radius: u32,
}

impl HttpGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: endpoint(&config.url)?,
            api_key: config.api_key.clone(),
            radius: config.radius,
        })
    }
}

/// Non-empty string value of a JSON field. Direct-administered regions report `city`
/// as an empty array or string.
fn text(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Place name from a geocoder response body: "city district", or "province district"
/// when there is no city.
pub fn parse_place(body: &Value) -> Result<String, AppError> {
    if body.get("status").and_then(Value::as_str) != Some("1") {
        let info = body.get("info").and_then(Value::as_str).unwrap_or("unknown");
        return Err(AppError::External(format!("geocoder status not ok: {}", info)));
    }
    let address = body
        .pointer("/regeocode/addressComponent")
        .ok_or_else(|| AppError::External("geocoder response has no addressComponent".into()))?;

    let region = text(address, "city")
        .or_else(|| text(address, "province"))
        .ok_or_else(|| AppError::External("geocoder response has no city or province".into()))?;

    Ok(match text(address, "district") {
        Some(district) => format!("{} {}", region, district),
        None => region,
    })
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, AppError> {
        let location = format!("{:.6},{:.6}", longitude, latitude);
        let radius = self.radius.to_string();
        log::trace!("Reverse geocoding {}", location);

        let response = self
            .client
            .get(self.url.clone())
            .query(&[
                ("key", self.api_key.as_str()),
                ("location", location.as_str()),
                ("output", "json"),
                ("radius", radius.as_str()),
                ("extensions", "base"),
            ])
            .send()
            .await?;
        let body: Value = ensure_success("geocoder", response).await?.json().await?;

        let place = parse_place(&body)?;
        log::debug!("Resolved {} to {}", location, place);
        Ok(place)
    }
}
