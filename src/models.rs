use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ImageId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: ImageId,
    pub user_id: UserId,
    pub original_name: String,
    /// Blob-store key of the original.
    pub file_path: String,
    /// Blob-store key of the derived thumbnail.
    pub thumbnail_path: String,
    pub content_hash: String,
    pub upload_time: DateTime<Utc>,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetadataRecord {
    pub image_id: ImageId,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub camera_model: Option<String>,
    pub location_name: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
    pub is_vectorized: bool,
    #[serde(skip_serializing, default)]
    pub embedding: Option<Vec<f32>>,
}

impl MetadataRecord {
    pub fn capture_year(&self) -> Option<i32> {
        self.captured_at.map(|t| t.year())
    }
}

/// Fields recovered from an uploaded file before it has an identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub camera_model: Option<String>,
    pub location_name: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
}

impl ExtractedMetadata {
    pub fn into_record(self, image_id: ImageId) -> MetadataRecord {
        MetadataRecord {
            image_id,
            width: self.width,
            height: self.height,
            camera_model: self.camera_model,
            location_name: self.location_name,
            captured_at: self.captured_at,
            is_vectorized: false,
            embedding: None,
        }
    }

    /// Tags derived from EXIF: first token of the camera model, then capture year.
    pub fn exif_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        if let Some(model) = &self.camera_model {
            if let Some(first) = model.split_whitespace().next() {
                tags.push(first.to_string());
            }
        }
        if let Some(taken) = self.captured_at {
            tags.push(taken.year().to_string());
        }
        tags
    }
}

/// Where a tag came from. Fixed when the dictionary entry is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TagProvenance {
    Manual,
    Ai,
    Exif,
}

impl TagProvenance {
    pub const ALL: [TagProvenance; 3] = [TagProvenance::Manual, TagProvenance::Ai, TagProvenance::Exif];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagProvenance::Manual => "manual",
            TagProvenance::Ai => "ai",
            TagProvenance::Exif => "exif",
        }
    }
}

impl fmt::Display for TagProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagProvenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(TagProvenance::Manual),
            "ai" => Ok(TagProvenance::Ai),
            "exif" => Ok(TagProvenance::Exif),
            other => Err(format!("unknown tag provenance '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub provenance: TagProvenance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct TagStat {
    pub name: String,
    pub provenance: TagProvenance,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SemanticHit {
    pub image_id: ImageId,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageDetail {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub tags: Vec<Tag>,
    pub metadata: Option<MetadataRecord>,
}
