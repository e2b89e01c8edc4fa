//! Embedding backend abstraction and implementations.
//!
//! The [`Embedder`] trait is the capability the sync engine and the reindex
//! orchestrator depend on. The set of backends is closed and selected by
//! [`EmbeddingProviderKind`]:
//! - **Ollama**: `POST /api/embed`, models listed by `GET /api/tags`.
//! - **OpenAI-compatible**: `POST /v1/embeddings`, models listed by `GET /v1/models`.
//! - **Disabled**: never reachable; every embed call fails.
//!
//! Also provides vector utilities used by the SQLite vector index:
//! [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`].
//!
//! # Retry Strategy
//!
//! Embedding calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Probe timeout for reachability and model-list requests.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// An embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The model identifier. Recorded as the embedding version of every vector.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. Returns one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn is_reachable(&self) -> bool;

    async fn model_available(&self, model: &str) -> bool;

    /// `false` for the disabled provider.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }

    async fn is_reachable(&self) -> bool {
        false
    }

    async fn model_available(&self, _model: &str) -> bool {
        false
    }
}

// ============ HTTP backends ============

/// Embedder for Ollama and OpenAI-compatible servers.
pub struct HttpEmbedder {
    kind: EmbeddingProviderKind,
    model: String,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {:?} provider", config.provider))?;

        let (url, api_key) = match config.provider {
            EmbeddingProviderKind::Ollama => (
                config.url.clone().unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
                None,
            ),
            EmbeddingProviderKind::OpenAI => {
                let api_key = std::env::var("OPENAI_API_KEY").ok();
                // A custom URL points at a compatible server that may not need a key.
                if api_key.is_none() && config.url.is_none() {
                    bail!("OPENAI_API_KEY environment variable not set");
                }
                (
                    config.url.clone().unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
                    api_key,
                )
            }
            EmbeddingProviderKind::Disabled => bail!("Embedding provider is disabled"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            kind: config.provider,
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn embed_endpoint(&self) -> String {
        match self.kind {
            EmbeddingProviderKind::OpenAI => format!("{}/v1/embeddings", self.url),
            _ => format!("{}/api/embed", self.url),
        }
    }

    fn models_endpoint(&self) -> String {
        match self.kind {
            EmbeddingProviderKind::OpenAI => format!("{}/v1/models", self.url),
            _ => format!("{}/api/tags", self.url),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .request(self.client.get(self.models_endpoint()))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("model list request failed: {}", response.status());
        }
        let json: serde_json::Value = response.json().await?;
        Ok(parse_model_list(self.kind, &json))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .request(self.client.post(self.embed_endpoint()))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = match self.kind {
                            EmbeddingProviderKind::OpenAI => parse_openai_response(&json)?,
                            _ => parse_ollama_response(&json)?,
                        };
                        if vectors.len() != texts.len() {
                            bail!(
                                "embedding backend returned {} vectors for {} inputs",
                                vectors.len(),
                                texts.len()
                            );
                        }
                        return Ok(vectors);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("embedding API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::warn!(attempt, url = %self.url, error = %e, "embedding request failed");
                    last_err = Some(anyhow::anyhow!(
                        "connection error (is the embedding server running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    async fn is_reachable(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn model_available(&self, model: &str) -> bool {
        match self.list_models().await {
            Ok(models) => models.iter().any(|name| model_matches(name, model)),
            Err(e) => {
                tracing::warn!(error = %e, "could not list embedding models");
                false
            }
        }
    }
}

/// Ollama reports tagged names (`nomic-embed-text:latest`); an untagged
/// configured model matches any tag.
fn model_matches(listed: &str, wanted: &str) -> bool {
    if listed == wanted {
        return true;
    }
    match listed.split_once(':') {
        Some((base, _)) => !wanted.contains(':') && base == wanted,
        None => false,
    }
}

fn parse_model_list(kind: EmbeddingProviderKind, json: &serde_json::Value) -> Vec<String> {
    let (array_key, name_key) = match kind {
        EmbeddingProviderKind::OpenAI => ("data", "id"),
        _ => ("models", "name"),
    };
    json.get(array_key)
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get(name_key).and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts the `data[].embedding` arrays, ordered by `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        embeddings.push((index, to_f32_vec(embedding)));
    }

    embeddings.sort_by_key(|(index, _)| *index);
    Ok(embeddings.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Create the [`Embedder`] selected by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProviderKind::Disabled => Ok(Arc::new(DisabledEmbedder)),
        EmbeddingProviderKind::Ollama | EmbeddingProviderKind::OpenAI => {
            Ok(Arc::new(HttpEmbedder::new(config)?))
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
