use super::{endpoint, ensure_success, http_client};
use crate::config::EmbeddingConfig;
use crate::embedding::{check_dimension, ContentItem, Embedder};
use crate::error::AppError;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    output: Option<EmbeddingOutput>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingOutput {
    embeddings: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Fused image+text embeddings from a DashScope-style multimodal endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: url::Url,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: endpoint(&config.url)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

async fn image_data_url(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or(mime_guess::mime::IMAGE_JPEG);
    Ok(format!(
        "data:{};base64,{}",
        mime.essence_str(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, items: &[ContentItem]) -> Result<Vec<f32>, AppError> {
        if items.is_empty() {
            return Err(AppError::InvalidInput("nothing to embed".into()));
        }

        let mut contents: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            contents.push(match item {
                ContentItem::Image(path) => json!({ "image": image_data_url(path).await? }),
                ContentItem::Text(text) => json!({ "text": text }),
            });
        }
        let body = json!({
            "model": self.model,
            "input": { "contents": contents },
        });

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: EmbeddingResponse = ensure_success("embedding service", response)
            .await?
            .json()
            .await?;

        if let Some(code) = parsed.code {
            return Err(AppError::External(format!(
                "embedding service error {}: {}",
                code,
                parsed.message.unwrap_or_default()
            )));
        }
        let vector = parsed
            .output
            .and_then(|o| o.embeddings.into_iter().next())
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::External("embedding response carried no vectors".into()))?;

        log::trace!("Received embedding of length {}", vector.len());
        check_dimension(vector, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
