//! Upload ingestion: store the original, derive and enrich, persist atomically, then
//! queue vectorization.
//!
//! Storing the original and persisting the record are the only fatal steps. Thumbnail,
//! metadata and tagging failures degrade to their fallbacks. External calls happen before
//! the database transaction is opened so no lock is held across a network round trip;
//! metadata and each tag source are written in their own savepoint.

use crate::error::AppError;
use crate::metadata::{reconcile_capture_time, MetadataExtractor};
use crate::models::{ExtractedMetadata, ImageId, ImageRecord, TagProvenance, UserId};
use crate::records::{insert_image, insert_metadata, NewImage};
use crate::storage::BlobStore;
use crate::tagger::AutoTagger;
use crate::tags::insert_tags;
use crate::thumbnail::ThumbnailDeriver;
use crate::vectorizer::VectorizeQueue;
use base64::Engine as _;
use chrono::{NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// One file to ingest.
#[derive(Debug, Clone)]
pub struct Upload {
    pub user_id: UserId,
    /// Client-side file name; its extension selects the stored format.
    pub original_name: String,
    pub bytes: Vec<u8>,
    pub capture_time_hint: Option<NaiveDateTime>,
}

/// Lower-cased extension with its dot, or empty when the name has no usable one.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode an edited image sent as base64, with or without a `data:...;base64,` prefix.
pub fn decode_edited_payload(payload: &str) -> Result<Vec<u8>, AppError> {
    let payload = payload.trim();
    let data = match payload.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
    if bytes.is_empty() {
        return Err(AppError::InvalidInput("edited image is empty".into()));
    }
    Ok(bytes)
}

pub struct Ingestor {
    pool: SqlitePool,
    blobs: Arc<dyn BlobStore>,
    thumbnails: ThumbnailDeriver,
    extractor: MetadataExtractor,
    tagger: Arc<AutoTagger>,
    ai_skip_extensions: HashSet<String>,
    queue: VectorizeQueue,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        thumbnails: ThumbnailDeriver,
        extractor: MetadataExtractor,
        tagger: Arc<AutoTagger>,
        ai_skip_extensions: HashSet<String>,
        queue: VectorizeQueue,
    ) -> Self {
        Self {
            pool,
            blobs,
            thumbnails,
            extractor,
            tagger,
            ai_skip_extensions,
            queue,
        }
    }

    /// Whether the classifier accepts files with this extension (with or without the dot).
    pub fn ai_supported(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        !self.ai_skip_extensions.contains(&ext)
    }

    pub async fn ingest(&self, upload: Upload) -> Result<ImageRecord, AppError> {
        if upload.bytes.is_empty() {
            return Err(AppError::InvalidInput("uploaded file is empty".into()));
        }
        let ext = extension_of(&upload.original_name);
        let base = uuid::Uuid::new_v4().to_string();
        let original_key = format!("{}{}", base, ext);
        let hash = content_hash(&upload.bytes);

        log::info!(
            "Ingesting {:?} ({} bytes) for user {} as {}",
            upload.original_name,
            upload.bytes.len(),
            upload.user_id,
            original_key
        );
        let original_path = self.blobs.put(&original_key, &upload.bytes).await.map_err(|e| {
            log::error!("Storing original {} failed: {}", original_key, e);
            e
        })?;

        let thumbnail_key = self.derive_thumbnail(&original_key, &base, &ext).await;

        let now = Utc::now().naive_utc();
        let metadata = match self.extractor.extract(&original_path).await {
            Ok(mut meta) => {
                meta.captured_at = reconcile_capture_time(meta.captured_at, upload.capture_time_hint, now);
                Some(meta)
            }
            Err(e) => {
                log::warn!("Metadata extraction failed for {}: {}", original_key, e);
                reconcile_capture_time(None, upload.capture_time_hint, now).map(|taken| ExtractedMetadata {
                    captured_at: Some(taken),
                    ..Default::default()
                })
            }
        };

        let ai_tags = if self.ai_supported(&ext) {
            self.tagger.tag(&self.blobs.resolve(&thumbnail_key)).await
        } else {
            log::debug!("Skipping AI tagging for unsupported format {:?}", ext);
            Vec::new()
        };

        let new_image = NewImage {
            user_id: upload.user_id,
            original_name: upload.original_name,
            file_path: original_key,
            thumbnail_path: thumbnail_key,
            content_hash: hash,
            upload_time: Utc::now(),
        };

        let record = match self.persist(&new_image, metadata, &ai_tags).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Persisting image {} failed: {}", new_image.file_path, e);
                self.discard_files(&new_image).await;
                return Err(e);
            }
        };

        self.queue.enqueue(record.id);
        log::info!("Image {} ingested for user {}", record.id, record.user_id);
        Ok(record)
    }

    /// Key of the display copy. Falls back to the original's key if even copying fails.
    async fn derive_thumbnail(&self, original_key: &str, base: &str, ext: &str) -> String {
        let thumbnail_key = format!("{}_thumb{}", base, ext);
        let deriver = self.thumbnails.clone();
        let original = self.blobs.resolve(original_key);
        let target = self.blobs.resolve(&thumbnail_key);
        let extension = ext.to_string();

        let outcome = tokio::task::spawn_blocking(move || deriver.derive(&original, &target, &extension)).await;
        match outcome {
            Ok(Ok(outcome)) => {
                log::debug!("Thumbnail {} derived: {:?}", thumbnail_key, outcome);
                thumbnail_key
            }
            Ok(Err(e)) => {
                log::warn!("No thumbnail for {}, using the original: {}", original_key, e);
                original_key.to_string()
            }
            Err(e) => {
                log::warn!("Thumbnail task for {} failed, using the original: {}", original_key, e);
                original_key.to_string()
            }
        }
    }

    async fn persist(
        &self,
        new_image: &NewImage,
        metadata: Option<ExtractedMetadata>,
        ai_tags: &[String],
    ) -> Result<ImageRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_image(&mut tx, new_image).await?;

        if let Some(meta) = metadata {
            if let Err(e) = write_metadata(&mut tx, record.id, meta).await {
                log::warn!("Metadata for image {} not saved: {}", record.id, e);
            }
        }
        if !ai_tags.is_empty() {
            if let Err(e) = write_tags(&mut tx, record.id, ai_tags, TagProvenance::Ai).await {
                log::warn!("AI tags for image {} not saved: {}", record.id, e);
            }
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn discard_files(&self, image: &NewImage) {
        let mut keys = vec![image.file_path.as_str()];
        if image.thumbnail_path != image.file_path {
            keys.push(image.thumbnail_path.as_str());
        }
        for key in keys {
            if let Err(e) = self.blobs.delete(key).await {
                log::warn!("Could not remove {} after failed ingest: {}", key, e);
            }
        }
    }
}

/// Metadata row plus EXIF tags, in a savepoint.
async fn write_metadata(
    conn: &mut SqliteConnection,
    image_id: ImageId,
    meta: ExtractedMetadata,
) -> Result<(), AppError> {
    let mut savepoint = sqlx::Connection::begin(conn).await?;
    let exif_tags = meta.exif_tags();
    insert_metadata(&mut savepoint, &meta.into_record(image_id)).await?;
    if !exif_tags.is_empty() {
        insert_tags(&mut savepoint, &[image_id], &exif_tags, TagProvenance::Exif).await?;
        log::debug!("EXIF tags for image {}: {:?}", image_id, exif_tags);
    }
    savepoint.commit().await?;
    Ok(())
}

async fn write_tags(
    conn: &mut SqliteConnection,
    image_id: ImageId,
    names: &[String],
    provenance: TagProvenance,
) -> Result<(), AppError> {
    let mut savepoint = sqlx::Connection::begin(conn).await?;
    insert_tags(&mut savepoint, &[image_id], names, provenance).await?;
    savepoint.commit().await?;
    Ok(())
}
