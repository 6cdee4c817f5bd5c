use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Converts record text into fixed-length vectors for similarity comparison.
/// Vectors from one provider instance all share the same dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic local embedder: character-trigram feature hashing into a
/// fixed-width vector, L2-normalized. No model download, no network; suitable
/// as a default and for reproducible tests. Lexically similar texts land
/// close in cosine distance, which is what greedy dedup needs from it.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return vector;
        }
        for window in chars.windows(3.min(chars.len())) {
            let bucket = (fnv1a(window) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-trigram"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    fn model_name(&self) -> &str {
        self.as_ref().model_name()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.as_ref().embed_batch(texts).await
    }
}

/// Scales a vector to unit length. Zero vectors are left untouched so the
/// all-zero embedding of empty text stays comparable (distance 1.0 to all).
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// FNV-1a over the window's UTF-32 units; stable across platforms and runs,
// unlike the std hasher.
fn fnv1a(window: &[char]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for c in window {
        for byte in (*c as u32).to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Config(
                "embeddings API key is empty; set DATAPREP_API_KEY".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.trim().to_string(),
            max_retries: 2,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut attempt = 0;
        let response: EmbeddingResponse = loop {
            let result = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match result {
                Ok(resp) => break resp.json().await?,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %e, "embedding request failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(PipelineError::Config(format!(
                "embeddings endpoint returned {} vectors for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Wraps a provider with an on-disk cache keyed by a content hash of
/// model name + text, so reruns over the same corpus skip recomputation.
pub struct CachedEmbedder<P> {
    inner: P,
    directory: PathBuf,
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {
    pub fn new(inner: P, directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { inner, directory })
    }

    fn cache_path(&self, text: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update(text.as_bytes());
        let key = hex::encode(hasher.finalize());
        self.directory.join(format!("{key}.vec"))
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let path = self.cache_path(text);
            // Unreadable or unparsable entries are both misses; a corrupt
            // file gets recomputed and overwritten rather than failing the
            // batch.
            let cached: Option<Vec<f32>> = std::fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok());
            if cached.is_none() {
                misses.push(i);
            }
            vectors.push(cached);
        }
        if !misses.is_empty() {
            info!(
                cached = texts.len() - misses.len(),
                computed = misses.len(),
                "embedding cache lookup"
            );
            let uncached: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&uncached).await?;
            for (&i, vector) in misses.iter().zip(fresh) {
                std::fs::write(self.cache_path(&texts[i]), serde_json::to_vec(&vector)?)?;
                vectors[i] = Some(vector);
            }
        }
        // Every slot is filled: cache hits above, misses just now.
        Ok(vectors.into_iter().flatten().collect())
    }
}
