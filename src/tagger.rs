//! AI tag selection on top of an external image classifier.

use crate::config::TagPolicy;
use crate::error::AppError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// External image classification: ranked (keyword, confidence) candidates for a local file.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, path: &Path) -> Result<Vec<(String, f64)>, AppError>;
}

/// Apply the two-tier confidence policy to ranked candidates.
///
/// Only the first `max_candidates` are considered. Everything above the primary threshold
/// is kept; if that is nothing, up to `fallback_count` candidates above the fallback floor
/// are kept instead.
pub fn select_tags(candidates: &[(String, f64)], policy: &TagPolicy) -> Vec<String> {
    let top = &candidates[..candidates.len().min(policy.max_candidates)];

    let primary: Vec<String> = top
        .iter()
        .filter(|(_, score)| *score > policy.primary_threshold)
        .map(|(name, _)| name.clone())
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    top.iter()
        .take(policy.fallback_count)
        .filter(|(_, score)| *score > policy.fallback_threshold)
        .map(|(name, _)| name.clone())
        .collect()
}

pub struct AutoTagger {
    classifier: Arc<dyn ImageClassifier>,
    policy: TagPolicy,
}

impl AutoTagger {
    pub fn new(classifier: Arc<dyn ImageClassifier>, policy: TagPolicy) -> Self {
        Self { classifier, policy }
    }

    /// Tags for the image at `path`. Classifier failures yield no tags.
    pub async fn tag(&self, path: &Path) -> Vec<String> {
        match self.classifier.classify(path).await {
            Ok(candidates) => {
                log::trace!("Classifier candidates for {:?}: {:?}", path, candidates);
                let tags = select_tags(&candidates, &self.policy);
                log::debug!("AI tags for {:?}: {:?}", path, tags);
                tags
            }
            Err(e) => {
                log::warn!("AI tagging failed for {:?}: {}", path, e);
                Vec::new()
            }
        }
    }
}
