//! Natural-language search by cosine similarity over stored embeddings.
//!
//! The scan is linear over every vectorized record.

use crate::embedding::{ContentItem, Embedder};
use crate::error::AppError;
use crate::models::{ImageId, SemanticHit, UserId};
use crate::records::{decode_embedding, ImageRepository};
use rayon::prelude::*;
use std::sync::Arc;

/// Cosine of the angle between `a` and `b`; 0 when either has zero magnitude or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Score each candidate against `query`, keep scores above `min_score`, best first.
pub fn rank(query: &[f32], candidates: Vec<(ImageId, Vec<f32>)>, min_score: f32) -> Vec<SemanticHit> {
    let mut hits: Vec<SemanticHit> = candidates
        .into_par_iter()
        .filter_map(|(image_id, vector)| {
            let score = cosine_similarity(query, &vector);
            (score > min_score).then_some(SemanticHit { image_id, score })
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}

pub struct SemanticSearcher {
    images: ImageRepository,
    embedder: Arc<dyn Embedder>,
    min_score: f32,
}

impl SemanticSearcher {
    pub fn new(images: ImageRepository, embedder: Arc<dyn Embedder>, min_score: f32) -> Self {
        Self {
            images,
            embedder,
            min_score,
        }
    }

    /// Embed `query` as text and rank vectorized records against it, optionally only
    /// those owned by `owner`.
    pub async fn search_by_text(
        &self,
        query: &str,
        owner: Option<UserId>,
    ) -> Result<Vec<SemanticHit>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("semantic query is empty".into()));
        }
        let query_vector = self.embedder.embed(&[ContentItem::Text(query.to_string())]).await?;
        let dimension = self.embedder.dimension();
        let stored = self.images.vectorized_embeddings(owner).await?;
        log::debug!("Semantic search for {:?} over {} vector(s)", query, stored.len());

        let min_score = self.min_score;
        let hits = tokio::task::spawn_blocking(move || {
            let candidates: Vec<(ImageId, Vec<f32>)> = stored
                .into_par_iter()
                .filter_map(|(id, raw)| match decode_embedding(&raw) {
                    Ok(v) if v.len() == dimension => Some((id, v)),
                    Ok(v) => {
                        log::warn!(
                            "Skipping image {}: stored embedding has {} dimensions, expected {}",
                            id,
                            v.len(),
                            dimension
                        );
                        None
                    }
                    Err(e) => {
                        log::warn!("Skipping image {}: unreadable embedding: {}", id, e);
                        None
                    }
                })
                .collect();
            rank(&query_vector, candidates, min_score)
        })
        .await?;

        log::info!("Semantic search for {:?} returned {} hit(s)", query, hits.len());
        Ok(hits)
    }
}
