//! Tag dictionary and image/tag relation.
//!
//! Tag names are dictionary singletons guarded by a UNIQUE constraint; the first insert
//! fixes the provenance. Relation edges are keyed on (image_id, tag_id) so re-tagging is a
//! no-op.

use crate::error::AppError;
use crate::models::{ImageId, Tag, TagProvenance, TagStat, UserId};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

/// Trimmed, non-empty names in first-seen order without duplicates.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Look up or create the dictionary entry for `name`, returning its id.
async fn upsert_tag(
    conn: &mut SqliteConnection,
    name: &str,
    provenance: TagProvenance,
) -> Result<i64, AppError> {
    sqlx::query("INSERT INTO tags (name, provenance) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(provenance)
        .execute(&mut *conn)
        .await?;
    let id = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Attach every name to every image on an open connection or transaction.
/// Returns the number of new relation edges.
pub async fn insert_tags<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    image_ids: &[ImageId],
    names: &[S],
    provenance: TagProvenance,
) -> Result<u64, AppError> {
    let names = normalize_names(names);
    if image_ids.is_empty() || names.is_empty() {
        return Ok(0);
    }

    let mut created = 0;
    for name in &names {
        let tag_id = upsert_tag(conn, name, provenance).await?;
        for image_id in image_ids {
            created += sqlx::query(
                "INSERT INTO image_tags (image_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(image_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        }
    }
    log::debug!(
        "Tagged {} image(s) with {:?} ({}), {} new edge(s)",
        image_ids.len(),
        names,
        provenance,
        created
    );
    Ok(created)
}

#[derive(Clone)]
pub struct TagStore {
    pool: SqlitePool,
}

impl TagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_tags<S: AsRef<str>>(
        &self,
        image_ids: &[ImageId],
        names: &[S],
        provenance: TagProvenance,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let created = insert_tags(&mut tx, image_ids, names, provenance).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub async fn tags_for(&self, image_id: ImageId) -> Result<Vec<Tag>, AppError> {
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT t.id, t.name, t.provenance FROM tags t
             JOIN image_tags r ON r.tag_id = t.id
             WHERE r.image_id = ?
             ORDER BY t.name",
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    pub async fn find(&self, name: &str) -> Result<Option<Tag>, AppError> {
        let tag = sqlx::query_as::<_, Tag>("SELECT id, name, provenance FROM tags WHERE name = ?")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(tag)
    }

    /// Per-tag count of distinct images owned by `user_id`. An empty provenance list
    /// means every provenance.
    pub async fn stats_for(
        &self,
        user_id: UserId,
        provenances: &[TagProvenance],
    ) -> Result<Vec<TagStat>, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT t.name AS name, t.provenance AS provenance, COUNT(DISTINCT r.image_id) AS count
             FROM image_tags r
             JOIN tags t ON t.id = r.tag_id
             JOIN images i ON i.id = r.image_id
             WHERE i.user_id = ",
        );
        qb.push_bind(user_id);
        if !provenances.is_empty() {
            qb.push(" AND t.provenance IN (");
            let mut separated = qb.separated(", ");
            for provenance in provenances {
                separated.push_bind(*provenance);
            }
            separated.push_unseparated(")");
        }
        qb.push(" GROUP BY t.id, t.name, t.provenance ORDER BY count DESC, t.name ASC");

        Ok(qb.build_query_as::<TagStat>().fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::records::{insert_image, ImageRepository, NewImage};
    use chrono::Utc;
    use std::sync::Arc;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("photos.db").display());
        (dir, init_database(&url, 4).await.unwrap())
    }

    async fn image(pool: &SqlitePool, user_id: UserId) -> ImageId {
        let mut conn = pool.acquire().await.unwrap();
        insert_image(
            &mut conn,
            &NewImage {
                user_id,
                original_name: "x.jpg".into(),
                file_path: "x.jpg".into(),
                thumbnail_path: "x_thumb.jpg".into(),
                content_hash: String::new(),
                upload_time: Utc::now(),
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[test]
    fn names_are_trimmed_and_deduplicated() {
        assert_eq!(
            normalize_names(&[" Hangzhou ", "", "  ", "Hangzhou", "hangzhou"]),
            vec!["Hangzhou".to_string(), "hangzhou".to_string()]
        );
    }

    #[tokio::test]
    async fn re_tagging_is_idempotent() {
        let (_dir, pool) = setup().await;
        let store = TagStore::new(pool.clone());
        let img = image(&pool, 1).await;

        assert_eq!(store.add_tags(&[img], &["travel"], TagProvenance::Manual).await.unwrap(), 1);
        assert_eq!(store.add_tags(&[img], &["travel"], TagProvenance::Manual).await.unwrap(), 0);

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM image_tags").await, 1);
    }

    #[tokio::test]
    async fn one_dictionary_entry_shared_across_images() {
        let (_dir, pool) = setup().await;
        let store = TagStore::new(pool.clone());
        let a = image(&pool, 1).await;
        let b = image(&pool, 1).await;

        store.add_tags(&[a], &["beach"], TagProvenance::Manual).await.unwrap();
        store.add_tags(&[b], &["beach"], TagProvenance::Ai).await.unwrap();

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM tags").await, 1);
        let tag = store.find("beach").await.unwrap().unwrap();
        assert_eq!(tag.provenance, TagProvenance::Manual, "first writer wins");
        assert_eq!(store.tags_for(a).await.unwrap(), vec![tag.clone()]);
        assert_eq!(store.tags_for(b).await.unwrap(), vec![tag]);
    }

    #[tokio::test]
    async fn names_are_case_sensitive() {
        let (_dir, pool) = setup().await;
        let store = TagStore::new(pool.clone());
        let a = image(&pool, 1).await;

        store.add_tags(&[a], &["Cat", "cat"], TagProvenance::Manual).await.unwrap();
        assert_eq!(store.tags_for(a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_inputs_are_noops() {
        let (_dir, pool) = setup().await;
        let store = TagStore::new(pool.clone());
        let a = image(&pool, 1).await;

        assert_eq!(store.add_tags(&[], &["x"], TagProvenance::Manual).await.unwrap(), 0);
        assert_eq!(store.add_tags(&[a], &["  "], TagProvenance::Manual).await.unwrap(), 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM tags").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_new_tag_creates_single_entry() {
        let (_dir, pool) = setup().await;
        let store = Arc::new(TagStore::new(pool.clone()));
        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(image(&pool, 1).await);
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let store = store.clone();
                let id = *id;
                tokio::spawn(async move {
                    store.add_tags(&[id], &["sunset"], TagProvenance::Ai).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM tags WHERE name = 'sunset'").await, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM image_tags").await, 8);
    }

    #[tokio::test]
    async fn stats_count_distinct_owned_images_by_provenance() {
        let (_dir, pool) = setup().await;
        let store = TagStore::new(pool.clone());
        let a = image(&pool, 1).await;
        let b = image(&pool, 1).await;
        let other = image(&pool, 2).await;

        store.add_tags(&[a, b], &["family"], TagProvenance::Manual).await.unwrap();
        store.add_tags(&[a, other], &["dog"], TagProvenance::Ai).await.unwrap();
        store.add_tags(&[b], &["2023"], TagProvenance::Exif).await.unwrap();

        let manual = store.stats_for(1, &[TagProvenance::Manual]).await.unwrap();
        assert_eq!(
            manual,
            vec![TagStat { name: "family".into(), provenance: TagProvenance::Manual, count: 2 }]
        );

        let all = store.stats_for(1, &[]).await.unwrap();
        assert_eq!(all.len(), 3);
        let dog = all.iter().find(|s| s.name == "dog").unwrap();
        assert_eq!(dog.count, 1, "only user 1's images count");

        // deleting an image drops its edges from the stats
        ImageRepository::new(pool.clone()).delete(a).await.unwrap();
        let manual = store.stats_for(1, &[TagProvenance::Manual]).await.unwrap();
        assert_eq!(manual[0].count, 1);
        assert!(store
            .stats_for(1, &[TagProvenance::Ai])
            .await
            .unwrap()
            .is_empty());
        assert!(store.find("dog").await.unwrap().is_some(), "dictionary entries persist");
    }
}
