//! SQLite connection setup and schema creation.

use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        original_name TEXT NOT NULL DEFAULT '',
        file_path TEXT NOT NULL,
        thumbnail_path TEXT NOT NULL,
        content_hash TEXT NOT NULL DEFAULT '',
        upload_time TEXT NOT NULL,
        is_favorite INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_images_user_time ON images(user_id, upload_time)",
    "CREATE INDEX IF NOT EXISTS idx_images_user_hash ON images(user_id, content_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS image_metadata (
        image_id INTEGER PRIMARY KEY REFERENCES images(id) ON DELETE CASCADE,
        width INTEGER,
        height INTEGER,
        camera_model TEXT,
        location_name TEXT,
        captured_at TEXT,
        is_vectorized INTEGER NOT NULL DEFAULT 0,
        embedding TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metadata_vectorized ON image_metadata(is_vectorized)",
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        provenance TEXT NOT NULL CHECK (provenance IN ('manual', 'ai', 'exif'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS image_tags (
        image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        PRIMARY KEY (image_id, tag_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag_id)",
];

/// Open (creating if needed) the database and make sure every table exists.
pub async fn init_database(database_url: &str, max_connections: u32) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_path = options.get_filename().to_path_buf();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let newly_created = !Path::new(&db_path).exists();

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    if newly_created {
        log::info!("Initialized new database: {}", db_path.display());
    } else {
        log::info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    log::debug!("Database schema verified ({} statements)", SCHEMA.len());
    Ok(())
}
