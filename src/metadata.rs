//! Dimension, camera, capture-time and location extraction for uploaded images.

use crate::error::AppError;
use crate::geocode::{coordinate_label, ReverseGeocoder};
use crate::models::ExtractedMetadata;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use exif::{In, Reader, Tag, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How far past "now" a capture time may sit before it is treated as bogus.
const CLOCK_SKEW_SECS: i64 = 60;

/// EXIF fields of interest, all optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifFields {
    pub camera_model: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
    pub gps: Option<(f64, f64)>,
}

pub struct MetadataExtractor {
    geocoder: Arc<dyn ReverseGeocoder>,
    geocode_timeout: Duration,
}

impl MetadataExtractor {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, geocode_timeout: Duration) -> Self {
        Self {
            geocoder,
            geocode_timeout,
        }
    }

    /// Extract everything recoverable from the file at `path`.
    ///
    /// Only an unreadable file is an error. Undecodable pixels, a missing EXIF block or
    /// a failed geocode leave the corresponding fields unset (or, for the place name,
    /// set to the coordinate label).
    pub async fn extract(&self, path: &Path) -> Result<ExtractedMetadata, AppError> {
        let path = path.to_path_buf();
        let (dimensions, exif) = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path)?;
            log::trace!("Reading dimensions and EXIF for {:?}", path);
            Ok::<_, AppError>((read_dimensions(&bytes), read_exif(&bytes)))
        })
        .await??;

        let mut metadata = ExtractedMetadata {
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            camera_model: exif.camera_model,
            captured_at: exif.captured_at,
            location_name: None,
        };

        if let Some((latitude, longitude)) = exif.gps {
            metadata.location_name = Some(self.resolve_place(latitude, longitude).await);
        }

        log::debug!("Extracted metadata: {:?}", metadata);
        Ok(metadata)
    }

    async fn resolve_place(&self, latitude: f64, longitude: f64) -> String {
        let lookup = self.geocoder.reverse(latitude, longitude);
        match tokio::time::timeout(self.geocode_timeout, lookup).await {
            Ok(Ok(place)) if !place.trim().is_empty() => place,
            Ok(Ok(_)) => {
                log::warn!("Geocoder returned an empty place for ({}, {})", latitude, longitude);
                coordinate_label(latitude, longitude)
            }
            Ok(Err(e)) => {
                log::warn!("Reverse geocoding failed for ({}, {}): {}", latitude, longitude, e);
                coordinate_label(latitude, longitude)
            }
            Err(_) => {
                log::warn!(
                    "Reverse geocoding timed out after {:?} for ({}, {})",
                    self.geocode_timeout,
                    latitude,
                    longitude
                );
                coordinate_label(latitude, longitude)
            }
        }
    }
}

/// Width and height from the image header, if the format is recognised.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

pub fn read_exif(bytes: &[u8]) -> ExifFields {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(e) => {
            log::debug!("No EXIF data found: {}", e);
            return ExifFields::default();
        }
    };

    let make = ascii_field(&exif, Tag::Make);
    let model = ascii_field(&exif, Tag::Model);
    let camera_model = match (make, model) {
        (Some(make), Some(model)) if model.starts_with(&make) => Some(model),
        (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
        (Some(make), None) => Some(make),
        (None, model) => model,
    };

    let captured_at = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .iter()
        .find_map(|tag| ascii_field(&exif, *tag).and_then(|s| parse_exif_datetime(&s)));

    let latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S', 90.0);
    let longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W', 180.0);
    let gps = latitude.zip(longitude);

    let fields = ExifFields {
        camera_model,
        captured_at,
        gps,
    };
    log::trace!("EXIF fields: {:?}", fields);
    fields
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .iter()
            .map(|raw| {
                String::from_utf8_lossy(raw)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string()
            })
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

/// Parse `YYYY:MM:DD HH:MM:SS` (EXIF) or its dash-separated variant.
pub fn parse_exif_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn gps_coordinate(
    exif: &exif::Exif,
    value_tag: Tag,
    ref_tag: Tag,
    negative_ref: char,
    limit: f64,
) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(parts) if !parts.is_empty() => parts
            .iter()
            .take(3)
            .zip([1.0, 60.0, 3600.0])
            .map(|(part, divisor)| part.to_f64() / divisor)
            .sum::<f64>(),
        _ => return None,
    };
    if !degrees.is_finite() || degrees.abs() > limit {
        return None;
    }

    let negative = ascii_field(exif, ref_tag)
        .and_then(|r| r.chars().next())
        .map(|c| c.eq_ignore_ascii_case(&negative_ref))
        .unwrap_or(false);
    Some(if negative { -degrees } else { degrees })
}

/// Pick the capture time to store.
///
/// An EXIF time later than `now` (plus a minute of skew) is discarded; the client hint
/// then fills in, clamped to `now` if it too lies in the future.
pub fn reconcile_capture_time(
    exif: Option<NaiveDateTime>,
    hint: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let latest = now + ChronoDuration::seconds(CLOCK_SKEW_SECS);
    match exif {
        Some(taken) if taken <= latest => Some(taken),
        Some(taken) => {
            log::warn!("Discarding EXIF capture time {} which lies in the future", taken);
            hint.map(|h| h.min(now))
        }
        None => hint.map(|h| h.min(now)),
    }
}
