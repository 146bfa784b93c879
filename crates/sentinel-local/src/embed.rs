//! Text embedders.
//!
//! `HashingEmbedder` is self-contained (no model download, no network): signed feature hashing
//! over normalized unigrams and bigrams. It captures lexical overlap only, which is enough to
//! order a handful of news summaries against a query and to spot near-duplicate pages.
//! `OpenAiCompatEmbedder` calls a `/v1/embeddings` endpoint when real sentence vectors are wanted.

use serde::{Deserialize, Serialize};
use sentinel_core::{Embedder, Error, Result};
use std::time::Duration;

pub const DEFAULT_DIMS: usize = 384;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: DEFAULT_DIMS }
    }
}

impl HashingEmbedder {
    pub fn with_dims(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn fnv1a(s: &str) -> u64 {
        let mut h: u64 = 1469598103934665603;
        for b in s.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        h
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let h = Self::fnv1a(feature);
        let idx = (h % self.dims as u64) as usize;
        let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
        v[idx] += sign * weight;
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let toks = crate::textprep::tokens(text);
        let mut v = vec![0.0f32; self.dims];
        for t in &toks {
            self.add_feature(&mut v, t, 1.0);
        }
        for w in toks.windows(2) {
            self.add_feature(&mut v, &format!("{} {}", w[0], w[1]), 0.5);
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatEmbedder {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = crate::env("SENTINEL_EMBEDDINGS_BASE_URL").ok_or_else(|| {
            Error::NotConfigured("missing SENTINEL_EMBEDDINGS_BASE_URL".to_string())
        })?;
        let model = crate::env("SENTINEL_EMBEDDINGS_MODEL")
            .unwrap_or_else(|| "all-MiniLM-L6-v2".to_string());
        Ok(Self::new(
            client,
            base_url,
            crate::env("SENTINEL_EMBEDDINGS_API_KEY"),
            model,
        ))
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut rb = self
            .client
            .post(format!(
                "{}/v1/embeddings",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(Duration::from_secs(30))
            .json(&EmbeddingsRequest {
                model: &self.model,
                input,
            });
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Embedding(format!("embeddings HTTP {status}")));
        }
        let mut parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        if parsed.data.len() != input.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiCompatEmbedder {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.request(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::Embedding("empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request(texts).await {
            Ok(vs) => vs.into_iter().map(Ok).collect(),
            Err(e) => texts.iter().map(|_| Err(e.clone())).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
