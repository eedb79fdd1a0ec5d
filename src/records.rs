//! Persistence for image records and their 1:1 metadata rows.

use crate::error::AppError;
use crate::models::{ImageId, ImageRecord, MetadataRecord, UserId};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;

const IMAGE_COLUMNS: &str =
    "id, user_id, original_name, file_path, thumbnail_path, content_hash, upload_time, is_favorite";

#[derive(Debug, Clone)]
pub struct NewImage {
    pub user_id: UserId,
    pub original_name: String,
    pub file_path: String,
    pub thumbnail_path: String,
    pub content_hash: String,
    pub upload_time: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    image_id: i64,
    width: Option<i64>,
    height: Option<i64>,
    camera_model: Option<String>,
    location_name: Option<String>,
    captured_at: Option<NaiveDateTime>,
    is_vectorized: bool,
    embedding: Option<String>,
}

impl MetadataRow {
    fn into_record(self) -> MetadataRecord {
        let embedding = self.embedding.as_deref().and_then(|raw| match decode_embedding(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Ignoring unreadable embedding for image {}: {}", self.image_id, e);
                None
            }
        });
        MetadataRecord {
            image_id: self.image_id,
            width: self.width.and_then(|w| u32::try_from(w).ok()),
            height: self.height.and_then(|h| u32::try_from(h).ok()),
            camera_model: self.camera_model,
            location_name: self.location_name,
            captured_at: self.captured_at,
            is_vectorized: self.is_vectorized,
            embedding,
        }
    }
}

pub fn encode_embedding(vector: &[f32]) -> Result<String, AppError> {
    Ok(serde_json::to_string(vector)?)
}

pub fn decode_embedding(raw: &str) -> Result<Vec<f32>, AppError> {
    Ok(serde_json::from_str(raw)?)
}

pub async fn insert_image(conn: &mut SqliteConnection, image: &NewImage) -> Result<ImageRecord, AppError> {
    let id = sqlx::query(
        "INSERT INTO images (user_id, original_name, file_path, thumbnail_path, content_hash, upload_time, is_favorite)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(image.user_id)
    .bind(&image.original_name)
    .bind(&image.file_path)
    .bind(&image.thumbnail_path)
    .bind(&image.content_hash)
    .bind(image.upload_time)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(ImageRecord {
        id,
        user_id: image.user_id,
        original_name: image.original_name.clone(),
        file_path: image.file_path.clone(),
        thumbnail_path: image.thumbnail_path.clone(),
        content_hash: image.content_hash.clone(),
        upload_time: image.upload_time,
        is_favorite: false,
    })
}

pub async fn insert_metadata(conn: &mut SqliteConnection, meta: &MetadataRecord) -> Result<(), AppError> {
    let embedding = meta.embedding.as_deref().map(encode_embedding).transpose()?;
    sqlx::query(
        "INSERT INTO image_metadata
            (image_id, width, height, camera_model, location_name, captured_at, is_vectorized, embedding)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(meta.image_id)
    .bind(meta.width.map(i64::from))
    .bind(meta.height.map(i64::from))
    .bind(&meta.camera_model)
    .bind(&meta.location_name)
    .bind(meta.captured_at)
    .bind(meta.is_vectorized && embedding.is_some())
    .bind(embedding)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct ImageRepository {
    pool: SqlitePool,
}

impl ImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, AppError> {
        let record = sqlx::query_as::<_, ImageRecord>(&format!(
            "SELECT {} FROM images WHERE id = ?",
            IMAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Fetch a record the acting user owns. Missing and foreign records are distinct errors.
    pub async fn get_owned(&self, id: ImageId, user_id: UserId) -> Result<ImageRecord, AppError> {
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("image {}", id)))?;
        if record.user_id != user_id {
            return Err(AppError::Forbidden(format!(
                "image {} does not belong to user {}",
                id, user_id
            )));
        }
        Ok(record)
    }

    pub async fn list_by_ids(&self, ids: &[ImageId]) -> Result<Vec<ImageRecord>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!(
            "SELECT {} FROM images WHERE id IN (",
            IMAGE_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        Ok(qb.build_query_as::<ImageRecord>().fetch_all(&self.pool).await?)
    }

    pub async fn metadata(&self, id: ImageId) -> Result<Option<MetadataRecord>, AppError> {
        let row = sqlx::query_as::<_, MetadataRow>(
            "SELECT image_id, width, height, camera_model, location_name, captured_at, is_vectorized, embedding
             FROM image_metadata WHERE image_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MetadataRow::into_record))
    }

    /// Flip the favorite flag and return its new value.
    pub async fn toggle_favorite(&self, id: ImageId) -> Result<bool, AppError> {
        let flag: Option<bool> = sqlx::query_scalar(
            "UPDATE images SET is_favorite = 1 - is_favorite WHERE id = ? RETURNING is_favorite",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        flag.ok_or_else(|| AppError::NotFound(format!("image {}", id)))
    }

    /// Remove the record, its metadata and its tag edges in one transaction.
    /// Tag dictionary entries are left alone.
    pub async fn delete(&self, id: ImageId) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM image_tags WHERE image_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM image_metadata WHERE image_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(AppError::NotFound(format!("image {}", id)));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn hashes_for_user(&self, user_id: UserId) -> Result<HashSet<String>, AppError> {
        let hashes: Vec<String> = sqlx::query_scalar(
            "SELECT content_hash FROM images WHERE user_id = ? AND content_hash <> ''",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes.into_iter().collect())
    }

    /// Records with no embedding yet, oldest first.
    pub async fn pending_vectorization(&self) -> Result<Vec<ImageId>, AppError> {
        let ids = sqlx::query_scalar(
            "SELECT i.id FROM images i
             LEFT JOIN image_metadata m ON m.image_id = i.id
             WHERE m.image_id IS NULL OR m.is_vectorized = 0
             ORDER BY i.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Persist an embedding, creating a minimal metadata row when none exists.
    pub async fn store_embedding(&self, id: ImageId, vector: &[f32]) -> Result<(), AppError> {
        let encoded = encode_embedding(vector)?;
        sqlx::query(
            "INSERT INTO image_metadata (image_id, width, height, is_vectorized, embedding)
             VALUES (?, 0, 0, 1, ?)
             ON CONFLICT(image_id) DO UPDATE SET embedding = excluded.embedding, is_vectorized = 1",
        )
        .bind(id)
        .bind(encoded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Raw stored embeddings of every vectorized record, optionally for one owner.
    pub async fn vectorized_embeddings(
        &self,
        owner: Option<UserId>,
    ) -> Result<Vec<(ImageId, String)>, AppError> {
        let rows: Vec<(ImageId, String)> = match owner {
            Some(user_id) => {
                sqlx::query_as(
                    "SELECT m.image_id, m.embedding FROM image_metadata m
                     JOIN images i ON i.id = m.image_id
                     WHERE m.is_vectorized = 1 AND m.embedding IS NOT NULL AND i.user_id = ?",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT image_id, embedding FROM image_metadata
                     WHERE is_vectorized = 1 AND embedding IS NOT NULL",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}
