#![allow(dead_code)]

use async_trait::async_trait;
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use photo_indexer::config::AppConfig;
use photo_indexer::db::init_database;
use photo_indexer::embedding::{ContentItem, Embedder};
use photo_indexer::error::AppError;
use photo_indexer::geocode::OfflineGeocoder;
use photo_indexer::ingest::Upload;
use photo_indexer::library::{Collaborators, PhotoLibrary};
use photo_indexer::storage::{BlobStore, LocalBlobStore};
use photo_indexer::tagger::ImageClassifier;
use sqlx::SqlitePool;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A JPEG of the given size carrying `fields` in an APP1 segment.
pub fn jpeg_with_exif(width: u32, height: u32, fields: &[Field]) -> Vec<u8> {
    let mut jpeg = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 90, 160])))
        .write_to(&mut jpeg, ImageOutputFormat::Jpeg(85))
        .unwrap();
    let jpeg = jpeg.into_inner();
    if fields.is_empty() {
        return jpeg;
    }

    let mut tiff = Cursor::new(Vec::new());
    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub fn ascii(tag: Tag, value: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

/// Camera "Acme X100", taken 2022-07-14.
pub fn acme_photo() -> Vec<u8> {
    jpeg_with_exif(
        1200,
        800,
        &[
            ascii(Tag::Make, "Acme"),
            ascii(Tag::Model, "X100"),
            ascii(Tag::DateTimeOriginal, "2022:07:14 09:30:00"),
        ],
    )
}

pub fn upload(user_id: i64, name: &str, bytes: Vec<u8>) -> Upload {
    Upload {
        user_id,
        original_name: name.to_string(),
        bytes,
        capture_time_hint: None,
    }
}

/// Classifier returning a fixed candidate list, recording the paths it was asked about.
#[derive(Default)]
pub struct FakeClassifier {
    pub candidates: Vec<(String, f64)>,
    pub fail: bool,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl FakeClassifier {
    pub fn returning(pairs: &[(&str, f64)]) -> Self {
        Self {
            candidates: pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageClassifier for FakeClassifier {
    async fn classify(&self, path: &Path) -> Result<Vec<(String, f64)>, AppError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            return Err(AppError::External("classifier unavailable".into()));
        }
        Ok(self.candidates.clone())
    }
}

/// Embedder mapping known words to fixed axes so similarity is predictable.
#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: Mutex<Vec<Vec<ContentItem>>>,
}

pub const DIMENSION: usize = 4;

fn axis_for(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    let mut v = vec![0.0; DIMENSION];
    for (i, word) in ["beach", "acme", "cat", "night"].iter().enumerate() {
        if text.contains(word) {
            v[i] += 1.0;
        }
    }
    v
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, items: &[ContentItem]) -> Result<Vec<f32>, AppError> {
        self.calls.lock().unwrap().push(items.to_vec());
        let mut v = vec![0.0; DIMENSION];
        for item in items {
            if let ContentItem::Text(text) = item {
                for (acc, x) in v.iter_mut().zip(axis_for(text)) {
                    *acc += x;
                }
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Blob store whose writes always fail.
pub struct BrokenBlobStore;

#[async_trait]
impl BlobStore for BrokenBlobStore {
    async fn put(&self, _: &str, _: &[u8]) -> Result<PathBuf, AppError> {
        Err(AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
    }

    async fn delete(&self, _: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn exists(&self, _: &str) -> bool {
        false
    }

    fn resolve(&self, key: &str) -> PathBuf {
        PathBuf::from("/nonexistent").join(key)
    }
}

pub struct TestLibrary {
    pub dir: tempfile::TempDir,
    pub pool: SqlitePool,
    pub library: Arc<PhotoLibrary>,
    pub blobs: Arc<LocalBlobStore>,
    pub classifier: Arc<FakeClassifier>,
    pub embedder: Arc<FakeEmbedder>,
}

impl TestLibrary {
    pub async fn new(classifier: FakeClassifier) -> Self {
        Self::with_config(classifier, AppConfig::default()).await
    }

    pub async fn with_config(classifier: FakeClassifier, mut config: AppConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config.upload_directory = dir.path().join("uploads").to_string_lossy().into_owned();
        config.database_url = format!("sqlite://{}", dir.path().join("photos.db").display());
        config.num_workers = 2;

        let pool = init_database(&config.database_url, 4).await.unwrap();
        let blobs = Arc::new(LocalBlobStore::new(&config.upload_directory).unwrap());
        let classifier = Arc::new(classifier);
        let embedder = Arc::new(FakeEmbedder::default());

        let library = PhotoLibrary::new(
            &config,
            pool.clone(),
            Collaborators {
                blobs: blobs.clone(),
                geocoder: Arc::new(OfflineGeocoder),
                classifier: classifier.clone(),
                embedder: embedder.clone(),
            },
        );

        Self {
            dir,
            pool,
            library: Arc::new(library),
            blobs,
            classifier,
            embedder,
        }
    }

    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.pool).await.unwrap()
    }
}
