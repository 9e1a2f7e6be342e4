use crate::error::ModelError;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Sentence-embedding model run in-process with fastembed (ONNX Runtime).
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    name: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Loads `model_name`, downloading its weights into `cache_dir` on first use.
    ///
    /// Blocks while the model is fetched and initialised.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, ModelError> {
        let (model, dimension) = resolve_local_model(model_name)?;
        let options = InitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options).map_err(|error| ModelError::BackendResponse {
            provider: model_name.to_string(),
            details: error.to_string(),
        })?;
        info!(model = model_name, dimension, "local embedding model loaded");

        Ok(Self {
            model: Arc::new(embedding),
            name: model_name.to_string(),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn failure(&self, details: String) -> ModelError {
        ModelError::BackendResponse {
            provider: self.name.clone(),
            details,
        }
    }
}

/// `sentence-transformers/all-MiniLM-L6-v2`, `Qdrant/all-MiniLM-L6-v2-onnx` and
/// `all-MiniLM-L6-v2` all name the same model.
fn local_model_key(name: &str) -> String {
    let short = name.trim().rsplit('/').next().unwrap_or(name);
    short.trim_end_matches("-onnx").to_ascii_lowercase()
}

/// Maps a Hugging Face style model name to a fastembed model and its dimension.
pub fn resolve_local_model(name: &str) -> Result<(EmbeddingModel, usize), ModelError> {
    let wanted = local_model_key(name);
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| local_model_key(&info.model_code) == wanted)
        .map(|info| (info.model, info.dim))
        .ok_or_else(|| {
            ModelError::InvalidRequest(format!(
                "embedding model '{name}' is not available for local inference"
            ))
        })
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let model = Arc::clone(&self.model);
        let input = vec![text.to_string()];
        let embeddings = tokio::task::spawn_blocking(move || model.embed(input, None))
            .await
            .map_err(|error| self.failure(format!("embedding task failed: {error}")))?
            .map_err(|error| self.failure(error.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| ModelError::EmptyResponse(self.name.clone()))
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints (OpenAI, text-embeddings-inference, ...).
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ModelError::InvalidRequest(
                "missing embedding model name".to_string(),
            ));
        }
        let endpoint = Url::parse(&format!("{}/embeddings", base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: [text],
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.trim());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ModelError::BackendResponse {
                provider: self.endpoint.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| ModelError::EmptyResponse(self.endpoint.to_string()))
    }
}
