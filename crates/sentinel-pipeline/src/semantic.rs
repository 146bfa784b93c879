//! Embedding-based similarity: reranking and near-duplicate detection.

use crate::bounded;
use sentinel_core::{is_preferred_domain, AssessedResult, Embedder, Query, RankedResult, Result};
use std::sync::Arc;
use std::time::Duration;

/// Score given to a document whose embedding could not be computed.
pub const UNSCORED: f32 = -1.0;

/// Cosine similarity clamped to `[-1, 1]`; mismatched, empty or zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let s = dot / (na * nb);
    if s.is_nan() {
        0.0
    } else {
        s.clamp(-1.0, 1.0)
    }
}

/// Sort by `(similarity, preferred_domain)` descending and apply the threshold/cap policy.
///
/// The sort is stable, so full ties keep arrival order. Everything at or above `threshold`
/// is kept; when nothing clears it the top `max_results` are kept instead. The result never
/// exceeds `max_results` and is empty only for empty input or `max_results == 0`.
pub fn order_and_select(
    mut scored: Vec<RankedResult>,
    threshold: f32,
    max_results: usize,
) -> Vec<RankedResult> {
    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(b.preferred_domain.cmp(&a.preferred_domain))
    });
    let above = scored
        .iter()
        .take_while(|r| r.similarity >= threshold)
        .count();
    let keep = if above == 0 { max_results } else { above.min(max_results) };
    scored.truncate(keep);
    scored
}

/// True unless some existing vector is strictly more similar than `threshold`.
pub fn is_unique_vector(new: &[f32], existing: &[Vec<f32>], threshold: f32) -> bool {
    !existing.iter().any(|e| cosine(new, e) > threshold)
}

#[derive(Clone)]
pub struct SemanticRanker {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl SemanticRanker {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn embedder_name(&self) -> &'static str {
        self.embedder.name()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        bounded(self.timeout, self.embedder.embed(text)).await
    }

    async fn embed_many(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        match tokio::time::timeout(self.timeout, self.embedder.embed_batch(texts)).await {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                tracing::warn!(expected = texts.len(), got = v.len(), "embedder returned wrong batch size");
                texts
                    .iter()
                    .map(|_| Err(sentinel_core::Error::Embedding("batch size mismatch".to_string())))
                    .collect()
            }
            Err(_) => {
                let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                texts.iter().map(|_| Err(sentinel_core::Error::Timeout(ms))).collect()
            }
        }
    }

    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let va = self.embed(a).await?;
        let vb = self.embed(b).await?;
        Ok(cosine(&va, &vb))
    }

    /// Order `documents` by similarity to `query` and keep the best ones.
    ///
    /// Documents are embedded by their summary, or their page text when there is no summary.
    pub async fn rerank(
        &self,
        query: &Query,
        documents: Vec<AssessedResult>,
        similarity_threshold: f32,
        max_results: usize,
        preferred_domains: &[String],
    ) -> Vec<RankedResult> {
        if documents.is_empty() {
            return Vec::new();
        }
        let query_vec = match self.embed(query.as_str()).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; keeping arrival order");
                None
            }
        };
        let texts: Vec<String> = documents
            .iter()
            .map(|d| d.ranking_text().to_string())
            .collect();
        let vectors = match &query_vec {
            Some(_) => self.embed_many(&texts).await,
            None => Vec::new(),
        };

        let scored: Vec<RankedResult> = documents
            .into_iter()
            .enumerate()
            .map(|(i, assessed)| {
                let similarity = match (&query_vec, vectors.get(i)) {
                    (Some(q), Some(Ok(v))) => cosine(q, v),
                    (Some(_), Some(Err(e))) => {
                        tracing::warn!(url = %assessed.candidate.url, error = %e, "document embedding failed");
                        UNSCORED
                    }
                    _ => UNSCORED,
                };
                let preferred_domain =
                    is_preferred_domain(&assessed.candidate.url, preferred_domains);
                RankedResult {
                    assessed,
                    similarity,
                    preferred_domain,
                }
            })
            .collect();

        let ranked = order_and_select(scored, similarity_threshold, max_results);
        tracing::debug!(
            kept = ranked.len(),
            top = ranked.first().map(|r| r.similarity).unwrap_or(UNSCORED),
            "reranked"
        );
        ranked
    }

    /// False as soon as one existing text is strictly more similar than `threshold`.
    ///
    /// Existing texts that fail to embed are skipped; a new text that fails to embed is
    /// treated as unique.
    pub async fn is_content_unique(&self, new_text: &str, existing: &[String], threshold: f32) -> bool {
        if existing.is_empty() {
            return true;
        }
        let new_vec = match self.embed(new_text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; treating text as unique");
                return true;
            }
        };
        for text in existing {
            match self.embed(text).await {
                Ok(v) if cosine(&new_vec, &v) > threshold => return false,
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping existing text that failed to embed"),
            }
        }
        true
    }
}
