use super::{endpoint, ensure_success, http_client};
use crate::config::ClassifierConfig;
use crate::error::AppError;
use crate::tagger::ImageClassifier;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    result: Vec<Candidate>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    keyword: String,
    score: f64,
}

/// Image classification against a Baidu-style `advanced_general` endpoint.
pub struct HttpClassifier {
    client: reqwest::Client,
    url: url::Url,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, AppError> {
        let mut url = endpoint(&config.url)?;
        url.query_pairs_mut().append_pair("access_token", &config.api_key);
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url,
        })
    }
}

fn into_candidates(response: ClassifyResponse) -> Result<Vec<(String, f64)>, AppError> {
    if let Some(code) = response.error_code {
        return Err(AppError::External(format!(
            "classifier error {}: {}",
            code,
            response.error_msg.unwrap_or_default()
        )));
    }
    let mut candidates: Vec<(String, f64)> = response
        .result
        .into_iter()
        .map(|c| (c.keyword, c.score))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(candidates)
}

#[async_trait]
impl ImageClassifier for HttpClassifier {
    async fn classify(&self, path: &Path) -> Result<Vec<(String, f64)>, AppError> {
        let bytes = tokio::fs::read(path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        log::trace!("Classifying {:?} ({} bytes)", path, bytes.len());

        let response = self
            .client
            .post(self.url.clone())
            .form(&[("image", encoded)])
            .send()
            .await?;
        let body: ClassifyResponse = ensure_success("classifier", response).await?.json().await?;
        into_candidates(body)
    }
}
