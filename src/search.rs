//! Keyword search over file names, tags and structured metadata.

use crate::error::AppError;
use crate::models::{ImageRecord, UserId};
use crate::synonyms::SynonymTable;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct KeywordSearcher {
    pool: SqlitePool,
    synonyms: SynonymTable,
}

/// `%word%` with LIKE wildcards escaped for `ESCAPE '\'`.
fn like_pattern(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len() + 2);
    escaped.push('%');
    for c in word.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn as_year(word: &str) -> Option<i32> {
    if word.len() == 4 && word.chars().all(|c| c.is_ascii_digit()) {
        word.parse().ok()
    } else {
        None
    }
}

impl KeywordSearcher {
    pub fn new(pool: SqlitePool, synonyms: SynonymTable) -> Self {
        Self { pool, synonyms }
    }

    /// Every whitespace-separated term plus its synonyms, deduplicated.
    pub fn expand_keyword(&self, keyword: &str) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for term in keyword.split_whitespace() {
            for word in self.synonyms.expand(term) {
                if !words.contains(&word) {
                    words.push(word);
                }
            }
        }
        words
    }

    /// Owned records matching any expanded word, newest upload first. An empty keyword
    /// matches everything.
    pub async fn search(
        &self,
        user_id: UserId,
        keyword: &str,
        only_favorites: bool,
    ) -> Result<Vec<ImageRecord>, AppError> {
        let words = self.expand_keyword(keyword);
        log::debug!("Keyword search for user {}: {:?} -> {:?}", user_id, keyword, words);

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT i.id, i.user_id, i.original_name, i.file_path, i.thumbnail_path,
                    i.content_hash, i.upload_time, i.is_favorite
             FROM images i
             LEFT JOIN image_metadata m ON m.image_id = i.id
             WHERE i.user_id = ",
        );
        qb.push_bind(user_id);
        if only_favorites {
            qb.push(" AND i.is_favorite = 1");
        }

        if !words.is_empty() {
            qb.push(" AND (");
            for (n, word) in words.iter().enumerate() {
                if n > 0 {
                    qb.push(" OR ");
                }
                let pattern = like_pattern(word);
                qb.push("(i.original_name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR m.location_name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR m.camera_model LIKE ")
                    .push_bind(pattern.clone())
                    .push(
                        " ESCAPE '\\' OR EXISTS (SELECT 1 FROM image_tags r JOIN tags t ON t.id = r.tag_id
                          WHERE r.image_id = i.id AND t.name LIKE ",
                    )
                    .push_bind(pattern)
                    .push(" ESCAPE '\\')");
                if let Some(year) = as_year(word) {
                    qb.push(" OR CAST(strftime('%Y', m.captured_at) AS INTEGER) = ")
                        .push_bind(year);
                }
                qb.push(")");
            }
            qb.push(")");
        }
        qb.push(" ORDER BY i.upload_time DESC, i.id DESC");

        let records = qb.build_query_as::<ImageRecord>().fetch_all(&self.pool).await?;
        log::debug!("Keyword search matched {} record(s)", records.len());
        Ok(records)
    }
}
