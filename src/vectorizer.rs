//! Fused image+text embeddings, computed off the request path.

use crate::embedding::{check_dimension, ContentItem, Embedder};
use crate::error::AppError;
use crate::models::{ImageId, MetadataRecord};
use crate::records::ImageRepository;
use crate::storage::BlobStore;
use crate::tags::TagStore;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};

/// Text describing what is already known about an image: place, year, camera, tags.
pub fn build_context(metadata: Option<&MetadataRecord>, tags: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(meta) = metadata {
        if let Some(place) = meta.location_name.as_deref().filter(|p| !p.trim().is_empty()) {
            parts.push(format!("Taken at {}.", place.trim()));
        }
        if let Some(year) = meta.capture_year() {
            parts.push(format!("Taken in {}.", year));
        }
        if let Some(camera) = meta.camera_model.as_deref().filter(|c| !c.trim().is_empty()) {
            parts.push(format!("Shot with {}.", camera.trim()));
        }
    }
    if !tags.is_empty() {
        parts.push(format!("Contains: {}.", tags.join(", ")));
    }
    parts.join(" ")
}

pub struct Vectorizer {
    images: ImageRepository,
    tags: TagStore,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
}

impl Vectorizer {
    pub fn new(
        images: ImageRepository,
        tags: TagStore,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            images,
            tags,
            blobs,
            embedder,
        }
    }

    /// Embed the image (thumbnail when present, else the original) together with its
    /// context text and persist the vector.
    pub async fn vectorize(&self, id: ImageId) -> Result<(), AppError> {
        let record = self
            .images
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("image {}", id)))?;

        let key = if self.blobs.exists(&record.thumbnail_path).await {
            &record.thumbnail_path
        } else if self.blobs.exists(&record.file_path).await {
            &record.file_path
        } else {
            return Err(AppError::NotFound(format!(
                "no stored file for image {} ({})",
                id, record.file_path
            )));
        };

        let metadata = self.images.metadata(id).await?;
        let tag_names: Vec<String> = self.tags.tags_for(id).await?.into_iter().map(|t| t.name).collect();
        let context = build_context(metadata.as_ref(), &tag_names);
        log::debug!("Vectorizing image {} from {} with context {:?}", id, key, context);

        let mut items = vec![ContentItem::Image(self.blobs.resolve(key))];
        if !context.is_empty() {
            items.push(ContentItem::Text(context));
        }
        let vector = check_dimension(self.embedder.embed(&items).await?, self.embedder.dimension())?;

        self.images.store_embedding(id, &vector).await?;
        log::info!("Image {} vectorized ({} dimensions)", id, vector.len());
        Ok(())
    }
}

/// Post-commit vectorization queue. Ids are sent only once the ingesting transaction has
/// committed; a single dispatcher runs at most `workers` jobs at a time.
#[derive(Clone)]
pub struct VectorizeQueue {
    tx: mpsc::UnboundedSender<ImageId>,
    pending: Arc<watch::Sender<usize>>,
}

impl VectorizeQueue {
    /// Spawn the dispatcher on the current runtime.
    pub fn start(vectorizer: Arc<Vectorizer>, workers: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ImageId>();
        let pending = Arc::new(watch::channel(0usize).0);
        let slots = Arc::new(Semaphore::new(workers.max(1)));

        let dispatcher_pending = pending.clone();
        tokio::spawn(async move {
            log::info!("Vectorization worker started with {} slot(s)", workers.max(1));
            while let Some(id) = rx.recv().await {
                let permit = match slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let vectorizer = vectorizer.clone();
                let pending = dispatcher_pending.clone();
                tokio::spawn(async move {
                    if let Err(e) = vectorizer.vectorize(id).await {
                        log::warn!("Vectorization abandoned for image {}: {}", id, e);
                    }
                    drop(permit);
                    pending.send_modify(|n| *n = n.saturating_sub(1));
                });
            }
            log::info!("Vectorization worker stopped");
        });

        Self { tx, pending }
    }

    pub fn enqueue(&self, id: ImageId) {
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(id).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            log::error!("Vectorization worker is gone; image {} was not queued", id);
        } else {
            log::trace!("Queued image {} for vectorization", id);
        }
    }

    /// Number of queued or running jobs.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolve once every queued job has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
