use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub upload_directory: String,
    pub allowed_extensions: HashSet<String>,
    pub num_workers: usize,
    pub web_port: u16,
    pub log_level: String,
    pub thumbnail: ThumbnailConfig,
    pub geocoder: GeocoderConfig,
    pub classifier: ClassifierConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/photos.db".into(),
            upload_directory: "uploads".into(),
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            num_workers: 4,
            web_port: 8080,
            log_level: "info".into(),
            thumbnail: ThumbnailConfig::default(),
            geocoder: GeocoderConfig::default(),
            classifier: ClassifierConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Extensions copied verbatim instead of resized.
    pub skip_extensions: HashSet<String>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: 600,
            max_height: 1000,
            quality: 80,
            skip_extensions: ["gif", "webp", "avif"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub radius: u32,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: "https://restapi.amap.com/v3/geocode/regeo".into(),
            api_key: String::new(),
            timeout_secs: 5,
            radius: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Extensions the classification service rejects; AI tagging is skipped for them.
    pub skip_extensions: HashSet<String>,
    pub policy: TagPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: "https://aip.baidubce.com/rest/2.0/image-classify/v2/advanced_general".into(),
            api_key: String::new(),
            timeout_secs: 30,
            skip_extensions: ["webp", "avif"].iter().map(|s| s.to_string()).collect(),
            policy: TagPolicy::default(),
        }
    }
}

/// Confidence policy applied to classifier candidates.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TagPolicy {
    pub max_candidates: usize,
    pub primary_threshold: f64,
    pub fallback_threshold: f64,
    pub fallback_count: usize,
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            primary_threshold: 0.4,
            fallback_threshold: 0.09,
            fallback_count: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "https://dashscope.aliyuncs.com/api/v1/services/embeddings/multimodal-embedding/multimodal-embedding".into(),
            api_key: String::new(),
            model: "multimodal-embedding-v1".into(),
            dimension: 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SearchConfig {
    /// Semantic hits must score strictly above this.
    pub semantic_min_score: f32,
    /// Equivalence groups for keyword expansion. Empty means the built-in table.
    pub synonyms: Vec<Vec<String>>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("PHOTO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
