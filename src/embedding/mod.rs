//! Embedding generation
//!
//! Supports multiple embedding backends:
//! - TF-IDF feature hashing (no external dependencies, deterministic)
//! - OpenAI-compatible API (text-embedding-3-small) - requires `openai` feature
//! - Google Gemini (gemini-embedding-001) - requires `gemini` feature
//!
//! # Feature Flags
//!
//! - `openai`: Enables the OpenAI-compatible backend (requires API key)
//! - `gemini`: Enables the Gemini backend (requires Google API key)

mod tfidf;

pub use tfidf::TfIdfEmbedder;

use std::sync::Arc;
#[cfg(any(feature = "openai", feature = "gemini"))]
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MemdcError, Result};
use crate::types::EmbeddingConfig;

/// Trait for embedding generators
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

#[cfg(any(feature = "openai", feature = "gemini"))]
fn check_dimensions(expected: usize, embedding: &[f32], env_hint: &str) -> Result<()> {
    if embedding.len() != expected {
        return Err(MemdcError::Embedding(format!(
            "Embedding dimensions mismatch: expected {}, got {}. Set {}={} to match your model.",
            expected,
            embedding.len(),
            env_hint,
            embedding.len()
        )));
    }
    Ok(())
}

#[cfg(any(feature = "openai", feature = "gemini"))]
fn parse_vector(values: &serde_json::Value) -> Option<Vec<f32>> {
    values.as_array().map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    })
}

/// OpenAI embedding client
///
/// Supports OpenAI, OpenRouter, Azure OpenAI, and other OpenAI-compatible APIs.
#[cfg(feature = "openai")]
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai")]
impl OpenAIEmbedder {
    /// Create a new OpenAI embedder with custom settings
    ///
    /// # Arguments
    /// * `api_key` - API key for authentication
    /// * `base_url` - API base URL (e.g., "https://openrouter.ai/api/v1" for OpenRouter)
    /// * `model` - Model name (e.g., "openai/text-embedding-3-small" for OpenRouter)
    /// * `dimensions` - Expected embedding dimensions (must match model output)
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: crate::http::client(timeout)?,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions,
        })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemdcError::Embedding(format!(
                "Embedding API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding = parse_vector(&data["data"][0]["embedding"])
            .ok_or_else(|| MemdcError::Embedding("Invalid response format".to_string()))?;

        check_dimensions(self.dimensions, &embedding, "EMBEDDING_DIMENSIONS")?;
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Google Gemini embedding client (`models/*:embedContent`)
#[cfg(feature = "gemini")]
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "gemini")]
impl GeminiEmbedder {
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.unwrap_or_else(|| "gemini-embedding-001".to_string());
        Ok(Self {
            client: crate::http::client(timeout)?,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.trim_start_matches("models/").to_string(),
            dimensions,
        })
    }
}

#[cfg(feature = "gemini")]
#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({
                "model": format!("models/{}", self.model),
                "content": { "parts": [{ "text": text }] },
                "outputDimensionality": self.dimensions,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemdcError::Embedding(format!(
                "Embedding API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding = parse_vector(&data["embedding"]["values"])
            .ok_or_else(|| MemdcError::Embedding("Invalid response format".to_string()))?;

        check_dimensions(self.dimensions, &embedding, "EMBEDDING_DIMENSIONS")?;
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an embedder from configuration
///
/// Available models depend on enabled features:
/// - `"tfidf"`: Always available, no external dependencies
/// - `"openai"`: Requires `openai` feature and `OPENAI_API_KEY`
/// - `"gemini"`: Requires `gemini` feature and `GOOGLE_API_KEY`
#[cfg_attr(
    not(any(feature = "openai", feature = "gemini")),
    allow(unused_variables)
)]
pub fn create_embedder(
    config: &EmbeddingConfig,
    timeout: std::time::Duration,
) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                MemdcError::Config(
                    "OPENAI_API_KEY required when EMBEDDING_PROVIDER=openai".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAIEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.embedding_model.clone(),
                config.dimensions,
                timeout,
            )?))
        }
        #[cfg(feature = "gemini")]
        "gemini" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                MemdcError::Config(
                    "GOOGLE_API_KEY required when EMBEDDING_PROVIDER=gemini".to_string(),
                )
            })?;
            Ok(Arc::new(GeminiEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.embedding_model.clone(),
                config.dimensions,
                timeout,
            )?))
        }
        #[cfg(not(feature = "openai"))]
        "openai" => Err(MemdcError::Config(
            "OpenAI embeddings require the 'openai' feature to be enabled".to_string(),
        )),
        #[cfg(not(feature = "gemini"))]
        "gemini" => Err(MemdcError::Config(
            "Gemini embeddings require the 'gemini' feature to be enabled".to_string(),
        )),
        "tfidf" => Ok(Arc::new(TfIdfEmbedder::new(config.dimensions))),
        _ => Err(MemdcError::Config(format!(
            "Unknown embedding provider: '{}'. Use 'tfidf', 'openai' or 'gemini'",
            config.model
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Map a cosine similarity in [-1, 1] onto a score in [0, 1]
pub fn similarity_to_score(similarity: f32) -> f32 {
    ((1.0 + similarity) / 2.0).clamp(0.0, 1.0)
}

/// Map a RediSearch cosine distance in [0, 2] onto a score in [0, 1]
pub fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_scores_agree_between_similarity_and_distance() {
        // RediSearch reports cosine distance as 1 - similarity
        for sim in [-1.0_f32, -0.3, 0.0, 0.42, 1.0] {
            let from_sim = similarity_to_score(sim);
            let from_dist = distance_to_score(1.0 - sim);
            assert!((from_sim - from_dist).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&from_sim));
        }
    }

    #[tokio::test]
    async fn test_tfidf_embedder_from_config() {
        let embedder = create_embedder(&EmbeddingConfig::default(), Duration::from_secs(5)).unwrap();
        let embedding = embedder.embed("Hello world").await.unwrap();
        assert_eq!(embedding.len(), 384);
        assert_eq!(embedder.model_name(), "tfidf");
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            model: "word2vec".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config, Duration::from_secs(5)),
            Err(MemdcError::Config(_))
        ));
    }

    #[cfg(feature = "gemini")]
    #[test]
    fn test_gemini_requires_key() {
        let config = EmbeddingConfig {
            model: "gemini".to_string(),
            dimensions: 768,
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config, Duration::from_secs(5)),
            Err(MemdcError::Config(_))
        ));
    }
}
