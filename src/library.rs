//! The operations the outer surfaces (HTTP, CLI) call, with ownership checks.

use crate::clients::{classifier::HttpClassifier, embedding::HttpEmbedder, geocoder::HttpGeocoder};
use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::error::AppError;
use crate::geocode::{OfflineGeocoder, ReverseGeocoder};
use crate::ingest::{decode_edited_payload, extension_of, Ingestor, Upload};
use crate::metadata::MetadataExtractor;
use crate::models::{ImageDetail, ImageId, ImageRecord, SemanticHit, TagProvenance, TagStat, UserId};
use crate::records::ImageRepository;
use crate::search::KeywordSearcher;
use crate::semantic::SemanticSearcher;
use crate::storage::{BlobStore, LocalBlobStore};
use crate::synonyms::SynonymTable;
use crate::tagger::{AutoTagger, ImageClassifier};
use crate::tags::TagStore;
use crate::thumbnail::ThumbnailDeriver;
use crate::vectorizer::{VectorizeQueue, Vectorizer};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The external services the library depends on.
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub classifier: Arc<dyn ImageClassifier>,
    pub embedder: Arc<dyn Embedder>,
}

impl Collaborators {
    /// Local blob storage plus the HTTP services named in `config`. Without a geocoder key,
    /// places are recorded as coordinates.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let geocoder: Arc<dyn ReverseGeocoder> = if config.geocoder.api_key.is_empty() {
            log::info!("No geocoder key configured; locations will be stored as coordinates");
            Arc::new(OfflineGeocoder)
        } else {
            Arc::new(HttpGeocoder::new(&config.geocoder)?)
        };
        if config.classifier.api_key.is_empty() {
            log::warn!("No classifier key configured; AI tagging requests will fail and be skipped");
        }
        if config.embedding.api_key.is_empty() {
            log::warn!("No embedding key configured; vectorization and semantic search will fail");
        }

        Ok(Self {
            blobs: Arc::new(LocalBlobStore::new(&config.upload_directory)?),
            geocoder,
            classifier: Arc::new(HttpClassifier::new(&config.classifier)?),
            embedder: Arc::new(HttpEmbedder::new(&config.embedding)?),
        })
    }
}

pub struct PhotoLibrary {
    images: ImageRepository,
    tags: TagStore,
    blobs: Arc<dyn BlobStore>,
    tagger: Arc<AutoTagger>,
    ingestor: Ingestor,
    keyword: KeywordSearcher,
    semantic: SemanticSearcher,
    queue: VectorizeQueue,
}

impl PhotoLibrary {
    /// Assemble the library and start the vectorization worker on the current runtime.
    pub fn new(config: &AppConfig, pool: SqlitePool, collaborators: Collaborators) -> Self {
        let Collaborators {
            blobs,
            geocoder,
            classifier,
            embedder,
        } = collaborators;

        let images = ImageRepository::new(pool.clone());
        let tags = TagStore::new(pool.clone());
        let tagger = Arc::new(AutoTagger::new(classifier, config.classifier.policy.clone()));

        let vectorizer = Vectorizer::new(images.clone(), tags.clone(), blobs.clone(), embedder.clone());
        let queue = VectorizeQueue::start(Arc::new(vectorizer), config.num_workers);

        let extractor = MetadataExtractor::new(geocoder, Duration::from_secs(config.geocoder.timeout_secs));
        let ingestor = Ingestor::new(
            pool.clone(),
            blobs.clone(),
            ThumbnailDeriver::new(config.thumbnail.clone()),
            extractor,
            tagger.clone(),
            config.classifier.skip_extensions.clone(),
            queue.clone(),
        );

        Self {
            keyword: KeywordSearcher::new(pool, SynonymTable::from_groups(&config.search.synonyms)),
            semantic: SemanticSearcher::new(images.clone(), embedder, config.search.semantic_min_score),
            images,
            tags,
            blobs,
            tagger,
            ingestor,
            queue,
        }
    }

    pub async fn ingest(&self, upload: Upload) -> Result<ImageRecord, AppError> {
        self.ingestor.ingest(upload).await
    }

    /// Store an edited image sent as base64 through the regular ingestion path.
    pub async fn save_edited(&self, user_id: UserId, payload: &str) -> Result<ImageRecord, AppError> {
        let bytes = decode_edited_payload(payload)?;
        let original_name = format!("edited-{}.jpg", Utc::now().format("%Y%m%d-%H%M%S"));
        self.ingestor
            .ingest(Upload {
                user_id,
                original_name,
                bytes,
                capture_time_hint: None,
            })
            .await
    }

    pub async fn search(
        &self,
        user_id: UserId,
        keyword: &str,
        only_favorites: bool,
    ) -> Result<Vec<ImageRecord>, AppError> {
        self.keyword.search(user_id, keyword, only_favorites).await
    }

    /// Semantic search restricted to the acting user's records.
    pub async fn search_semantic(&self, user_id: UserId, query: &str) -> Result<Vec<SemanticHit>, AppError> {
        self.semantic.search_by_text(query, Some(user_id)).await
    }

    /// Attach manual tags to images the user owns. Nothing is written unless every id is owned.
    pub async fn add_tags(
        &self,
        user_id: UserId,
        image_ids: &[ImageId],
        names: &[String],
    ) -> Result<u64, AppError> {
        let unique: HashSet<ImageId> = image_ids.iter().copied().collect();
        for id in &unique {
            self.images.get_owned(*id, user_id).await?;
        }
        let ids: Vec<ImageId> = unique.into_iter().collect();
        let created = self.tags.add_tags(&ids, names, TagProvenance::Manual).await?;
        log::info!("User {} added {} tag edge(s) to {} image(s)", user_id, created, ids.len());
        Ok(created)
    }

    pub async fn tag_stats(
        &self,
        user_id: UserId,
        provenances: &[TagProvenance],
    ) -> Result<Vec<TagStat>, AppError> {
        self.tags.stats_for(user_id, provenances).await
    }

    /// Remove the record and its rows, then its files. File removal failures are logged only.
    pub async fn delete(&self, id: ImageId, user_id: UserId) -> Result<(), AppError> {
        let record = self.images.get_owned(id, user_id).await?;
        self.images.delete(id).await?;

        let mut keys = vec![record.file_path.as_str()];
        if record.thumbnail_path != record.file_path {
            keys.push(record.thumbnail_path.as_str());
        }
        for key in keys {
            if let Err(e) = self.blobs.delete(key).await {
                log::warn!("Image {} deleted but {} could not be removed: {}", id, key, e);
            }
        }
        log::info!("Image {} deleted by user {}", id, user_id);
        Ok(())
    }

    /// Flip the favorite flag and return its new value.
    pub async fn toggle_favorite(&self, id: ImageId, user_id: UserId) -> Result<bool, AppError> {
        self.images.get_owned(id, user_id).await?;
        self.images.toggle_favorite(id).await
    }

    /// Re-run AI tagging on a stored image and keep what it finds.
    pub async fn analyze(&self, id: ImageId, user_id: UserId) -> Result<Vec<String>, AppError> {
        let record = self.images.get_owned(id, user_id).await?;
        if !self.ingestor.ai_supported(&extension_of(&record.file_path)) {
            log::debug!("Image {} has a format the classifier does not accept", id);
            return Ok(Vec::new());
        }

        let names = self.tagger.tag(&self.blobs.resolve(&record.thumbnail_path)).await;
        if !names.is_empty() {
            self.tags.add_tags(&[id], &names, TagProvenance::Ai).await?;
            // refresh the embedding so it reflects the new tags
            self.queue.enqueue(id);
        }
        Ok(names)
    }

    pub async fn detail(&self, id: ImageId, user_id: UserId) -> Result<ImageDetail, AppError> {
        let record = self.images.get_owned(id, user_id).await?;
        let tags = self.tags.tags_for(id).await?;
        let metadata = self.images.metadata(id).await?.map(|mut m| {
            m.embedding = None;
            m
        });
        Ok(ImageDetail { record, tags, metadata })
    }

    pub async fn tag_names(&self, id: ImageId) -> Result<Vec<String>, AppError> {
        Ok(self.tags.tags_for(id).await?.into_iter().map(|t| t.name).collect())
    }

    /// Records for the given ids, in the order given. Unknown ids are skipped.
    pub async fn records(&self, ids: &[ImageId]) -> Result<Vec<ImageRecord>, AppError> {
        let mut found = self.images.list_by_ids(ids).await?;
        found.sort_by_key(|r| ids.iter().position(|id| *id == r.id));
        Ok(found)
    }

    pub async fn known_hashes(&self, user_id: UserId) -> Result<HashSet<String>, AppError> {
        self.images.hashes_for_user(user_id).await
    }

    /// Queue every record without an embedding. Returns how many were queued.
    pub async fn revectorize_pending(&self) -> Result<usize, AppError> {
        let ids = self.images.pending_vectorization().await?;
        log::info!("Queueing {} image(s) for vectorization", ids.len());
        for id in &ids {
            self.queue.enqueue(*id);
        }
        Ok(ids.len())
    }

    /// Resolve once queued vectorization work has drained.
    pub async fn wait_for_vectorization(&self) {
        self.queue.wait_idle().await
    }
}
