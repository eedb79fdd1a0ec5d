use crate::error::AppError;
use async_trait::async_trait;
use std::path::PathBuf;

/// One input to the multimodal embedding model.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Image(PathBuf),
    Text(String),
}

/// External multimodal embedding: one fused vector for all items.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, items: &[ContentItem]) -> Result<Vec<f32>, AppError>;

    /// Fixed length of every vector this model returns.
    fn dimension(&self) -> usize;
}

/// Reject vectors whose length differs from the model's dimensionality.
pub fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, AppError> {
    if vector.len() != expected {
        return Err(AppError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}
