mod common;

use common::*;
use photo_indexer::config::AppConfig;
use photo_indexer::db::init_database;
use photo_indexer::embedding::ContentItem;
use photo_indexer::error::AppError;
use photo_indexer::geocode::OfflineGeocoder;
use photo_indexer::ingest::Upload;
use photo_indexer::library::{Collaborators, PhotoLibrary};
use photo_indexer::models::TagProvenance;
use photo_indexer::storage::BlobStore;
use std::sync::Arc;

#[tokio::test]
async fn exif_and_ai_tags_are_searchable() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("beach", 0.82), ("sand", 0.3)])).await;

    let record = t.library.ingest(upload(1, "holiday.jpg", acme_photo())).await.unwrap();

    let detail = t.library.detail(record.id, 1).await.unwrap();
    let mut tags: Vec<(String, TagProvenance)> =
        detail.tags.iter().map(|t| (t.name.clone(), t.provenance)).collect();
    tags.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        tags,
        vec![
            ("2022".to_string(), TagProvenance::Exif),
            ("Acme".to_string(), TagProvenance::Exif),
            ("beach".to_string(), TagProvenance::Ai),
        ]
    );
    let meta = detail.metadata.unwrap();
    assert_eq!(meta.camera_model.as_deref(), Some("Acme X100"));
    assert_eq!((meta.width, meta.height), (Some(1200), Some(800)));

    for keyword in ["2022", "Acme", "acme", "beach"] {
        let found = t.library.search(1, keyword, false).await.unwrap();
        assert_eq!(found.len(), 1, "keyword {:?}", keyword);
        assert_eq!(found[0].id, record.id);
    }
    assert!(t.library.search(2, "Acme", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn thumbnail_is_bounded_and_used_for_tagging() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("beach", 0.82)])).await;

    let record = t.library.ingest(upload(1, "holiday.JPG", acme_photo())).await.unwrap();

    assert!(record.file_path.ends_with(".jpg"));
    assert!(record.thumbnail_path.ends_with("_thumb.jpg"));
    let (w, h) = image::image_dimensions(t.blobs.resolve(&record.thumbnail_path)).unwrap();
    assert_eq!((w, h), (600, 400));

    let calls = t.classifier.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![t.blobs.resolve(&record.thumbnail_path)]);
}

#[tokio::test]
async fn undecodable_upload_still_gets_a_thumbnail() {
    let t = TestLibrary::new(FakeClassifier::failing()).await;
    let bytes = b"this is not an image at all".to_vec();

    let record = t.library.ingest(upload(1, "broken.jpg", bytes.clone())).await.unwrap();

    assert!(t.blobs.exists(&record.thumbnail_path).await);
    assert_eq!(std::fs::read(t.blobs.resolve(&record.thumbnail_path)).unwrap(), bytes);
    // classifier failure leaves the record untagged, not missing
    assert!(t.library.detail(record.id, 1).await.unwrap().tags.is_empty());
}

#[tokio::test]
async fn unsupported_formats_skip_ai_tagging() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("beach", 0.9)])).await;

    let record = t.library.ingest(upload(1, "sticker.webp", b"RIFF....WEBP".to_vec())).await.unwrap();

    assert!(t.classifier.calls.lock().unwrap().is_empty());
    assert!(t.library.tag_names(record.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_original_write_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("photos.db").display());
    let pool = init_database(&url, 2).await.unwrap();
    let library = PhotoLibrary::new(
        &AppConfig::default(),
        pool.clone(),
        Collaborators {
            blobs: Arc::new(BrokenBlobStore),
            geocoder: Arc::new(OfflineGeocoder),
            classifier: Arc::new(FakeClassifier::default()),
            embedder: Arc::new(FakeEmbedder::default()),
        },
    );

    let result = library.ingest(upload(1, "a.jpg", acme_photo())).await;

    assert!(matches!(result, Err(AppError::Io(_))));
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn failed_record_insert_rolls_back_and_removes_files() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("beach", 0.82)])).await;
    sqlx::query(
        "CREATE TRIGGER reject_images AFTER INSERT ON images
         BEGIN SELECT RAISE(ABORT, 'images are read-only'); END",
    )
    .execute(&t.pool)
    .await
    .unwrap();

    let result = t.library.ingest(upload(1, "holiday.jpg", acme_photo())).await;

    assert!(matches!(result, Err(AppError::Database(_))), "{:?}", result);
    for table in ["images", "image_metadata", "image_tags", "tags"] {
        assert_eq!(t.count(&format!("SELECT COUNT(*) FROM {}", table)).await, 0, "{}", table);
    }
    let leftover: Vec<_> = std::fs::read_dir(t.dir.path().join("uploads")).unwrap().collect();
    assert!(leftover.is_empty(), "{:?}", leftover);
    // classification ran before the transaction, but nothing was enqueued
    assert_eq!(t.classifier.calls.lock().unwrap().len(), 1);
    t.library.wait_for_vectorization().await;
    assert!(t.embedder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let result = t.library.ingest(upload(1, "a.jpg", Vec::new())).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
}

#[tokio::test]
async fn empty_keyword_returns_everything_newest_first() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let mut ids = Vec::new();
    for name in ["one.jpg", "two.jpg", "three.jpg"] {
        ids.push(t.library.ingest(upload(1, name, jpeg_with_exif(8, 8, &[]))).await.unwrap().id);
    }
    t.library.ingest(upload(2, "theirs.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();

    let found: Vec<i64> = t.library.search(1, "", false).await.unwrap().iter().map(|r| r.id).collect();
    ids.reverse();
    assert_eq!(found, ids);
}

#[tokio::test]
async fn capture_time_hint_fills_missing_exif() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let hint = chrono::NaiveDate::from_ymd_opt(2019, 3, 1).and_then(|d| d.and_hms_opt(12, 0, 0));

    let record = t
        .library
        .ingest(Upload {
            capture_time_hint: hint,
            ..upload(1, "IMG_1.jpg", jpeg_with_exif(8, 8, &[]))
        })
        .await
        .unwrap();

    let meta = t.library.detail(record.id, 1).await.unwrap().metadata.unwrap();
    assert_eq!(meta.captured_at, hint);
    let found = t.library.search(1, "2019", false).await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn vectorization_runs_after_commit() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("beach", 0.82)])).await;

    let record = t.library.ingest(upload(1, "holiday.jpg", acme_photo())).await.unwrap();
    t.library.wait_for_vectorization().await;

    let meta = t.library.detail(record.id, 1).await.unwrap().metadata.unwrap();
    assert!(meta.is_vectorized);

    let calls = t.embedder.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], ContentItem::Image(t.blobs.resolve(&record.thumbnail_path)));
    match &calls[0][1] {
        ContentItem::Text(text) => {
            assert!(text.contains("2022"), "{}", text);
            assert!(text.contains("Acme X100"), "{}", text);
            assert!(text.contains("beach"), "{}", text);
        }
        other => panic!("expected context text, got {:?}", other),
    }

    let hits = t.library.search_semantic(1, "acme camera").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].image_id, record.id);
    assert!(hits[0].score > 0.0);
    assert!(t.library.search_semantic(1, "cat").await.unwrap().is_empty());
    assert!(t.library.search_semantic(2, "acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn revectorize_picks_up_unvectorized_records() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let record = t.library.ingest(upload(1, "a.jpg", acme_photo())).await.unwrap();
    t.library.wait_for_vectorization().await;

    sqlx::query("UPDATE image_metadata SET is_vectorized = 0, embedding = NULL")
        .execute(&t.pool)
        .await
        .unwrap();

    assert_eq!(t.library.revectorize_pending().await.unwrap(), 1);
    t.library.wait_for_vectorization().await;
    assert!(t.library.detail(record.id, 1).await.unwrap().metadata.unwrap().is_vectorized);
    assert_eq!(t.library.revectorize_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn delete_removes_rows_relations_and_files() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let keep = t.library.ingest(upload(1, "keep.jpg", acme_photo())).await.unwrap();
    let gone = t.library.ingest(upload(1, "gone.jpg", acme_photo())).await.unwrap();
    t.library.add_tags(1, &[keep.id, gone.id], &["family".to_string()]).await.unwrap();
    t.library.wait_for_vectorization().await;

    let before = t.library.tag_stats(1, &[TagProvenance::Manual]).await.unwrap();
    assert_eq!(before[0].count, 2);

    assert!(matches!(t.library.delete(gone.id, 2).await, Err(AppError::Forbidden(_))));
    t.library.delete(gone.id, 1).await.unwrap();

    assert_eq!(
        t.count(&format!("SELECT COUNT(*) FROM image_metadata WHERE image_id = {}", gone.id)).await,
        0
    );
    assert_eq!(
        t.count(&format!("SELECT COUNT(*) FROM image_tags WHERE image_id = {}", gone.id)).await,
        0
    );
    assert!(!t.blobs.exists(&gone.file_path).await);
    assert!(!t.blobs.exists(&gone.thumbnail_path).await);

    let after = t.library.tag_stats(1, &[TagProvenance::Manual]).await.unwrap();
    assert_eq!(after[0].count, 1);
    let exif = t.library.tag_stats(1, &[TagProvenance::Exif]).await.unwrap();
    assert!(exif.iter().all(|s| s.count == 1));

    assert!(matches!(t.library.delete(gone.id, 1).await, Err(AppError::NotFound(_))));
    assert!(t.blobs.exists(&keep.file_path).await);
}

#[tokio::test]
async fn manual_tags_require_ownership_of_every_image() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let mine = t.library.ingest(upload(1, "a.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();
    let theirs = t.library.ingest(upload(2, "b.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();

    let result = t
        .library
        .add_tags(1, &[mine.id, theirs.id], &["party".to_string()])
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert_eq!(t.count("SELECT COUNT(*) FROM tags WHERE name = 'party'").await, 0);

    let created = t
        .library
        .add_tags(1, &[mine.id, mine.id], &[" party ".to_string(), "party".to_string()])
        .await
        .unwrap();
    assert_eq!(created, 1);
    assert_eq!(t.library.tag_names(mine.id).await.unwrap(), vec!["party"]);
}

#[tokio::test]
async fn favorites_toggle_and_filter() {
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let a = t.library.ingest(upload(1, "a.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();
    t.library.ingest(upload(1, "b.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();

    assert!(t.library.toggle_favorite(a.id, 1).await.unwrap());
    let favorites = t.library.search(1, "", true).await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, a.id);

    assert!(!t.library.toggle_favorite(a.id, 1).await.unwrap());
    assert!(t.library.search(1, "", true).await.unwrap().is_empty());
    assert!(matches!(t.library.toggle_favorite(a.id, 2).await, Err(AppError::Forbidden(_))));
    assert!(matches!(t.library.toggle_favorite(999, 1).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn edited_images_are_ingested_as_jpeg() {
    use base64::Engine as _;
    let t = TestLibrary::new(FakeClassifier::default()).await;
    let payload = format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(acme_photo())
    );

    let record = t.library.save_edited(1, &payload).await.unwrap();

    assert!(record.original_name.starts_with("edited-"));
    assert!(record.file_path.ends_with(".jpg"));
    assert!(t.blobs.exists(&record.file_path).await);
    assert!(t.library.tag_names(record.id).await.unwrap().contains(&"Acme".to_string()));
}

#[tokio::test]
async fn analyze_adds_ai_tags_on_demand() {
    let t = TestLibrary::new(FakeClassifier::returning(&[("cat", 0.2), ("sofa", 0.15), ("rug", 0.1)])).await;
    let record = t.library.ingest(upload(1, "a.jpg", jpeg_with_exif(8, 8, &[]))).await.unwrap();

    let tags = t.library.analyze(record.id, 1).await.unwrap();

    assert_eq!(tags, vec!["cat", "sofa"]);
    let stats = t.library.tag_stats(1, &[TagProvenance::Ai]).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert!(matches!(t.library.analyze(record.id, 2).await, Err(AppError::Forbidden(_))));
}
