//! Semantic similarity between a baseline and a current output.
//!
//! Embedding cosine when the provider offers embeddings, otherwise (or when
//! an embedding call fails) Jaccard overlap of lowercase word sets.

use crate::engine::retry::{call_with_retry, RetryPolicy};
use crate::engine::CancelToken;
use crate::errors::{EngineError, EngineResult, ErrorKind};
use crate::model::{Similarity, SimilarityMethod};
use crate::providers::Provider;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

pub struct SimilarityScorer {
    provider: Option<Arc<dyn Provider>>,
    retry: RetryPolicy,
}

impl SimilarityScorer {
    /// Uses embeddings from `provider` when it supports them. Each embedding
    /// call runs under `retry`.
    pub fn new(provider: Arc<dyn Provider>, retry: RetryPolicy) -> Self {
        Self {
            provider: Some(provider),
            retry,
        }
    }

    pub fn lexical() -> Self {
        Self {
            provider: None,
            retry: RetryPolicy::default(),
        }
    }

    fn embedder(&self) -> Option<&Arc<dyn Provider>> {
        self.provider.as_ref().filter(|p| p.supports_embeddings())
    }

    /// Score in [0, 1].
    ///
    /// A failed embedding call falls back to lexical overlap. Quota exhaustion
    /// and cancellation are returned instead, since the run has to stop.
    pub async fn score(
        &self,
        a: &str,
        b: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Similarity> {
        let Some(provider) = self.embedder() else {
            return Ok(lexical_score(a, b));
        };
        if a == b {
            return Ok(Similarity::Score {
                value: 1.0,
                method: SimilarityMethod::Embedding,
            });
        }
        if cancel.is_cancelled() {
            return Err(EngineError::cancelled("embed: run cancelled"));
        }

        let (ea, eb) = tokio::join!(
            self.embed(provider, a, cancel),
            self.embed(provider, b, cancel)
        );
        if let Some(e) = [&ea, &eb]
            .into_iter()
            .find_map(|r| r.as_ref().err().filter(|e| stops_scoring(e)))
        {
            return Err(e.clone());
        }

        let (va, vb) = match (ea, eb) {
            (Ok(va), Ok(vb)) => (va, vb),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "embedding failed, using lexical similarity");
                return Ok(lexical_score(a, b));
            }
        };
        match cosine(&va, &vb) {
            Some(value) => Ok(Similarity::Score {
                value,
                method: SimilarityMethod::Embedding,
            }),
            None => {
                warn!(
                    left = va.len(),
                    right = vb.len(),
                    "embedding dimensions differ, using lexical similarity"
                );
                Ok(lexical_score(a, b))
            }
        }
    }

    async fn embed(
        &self,
        provider: &Arc<dyn Provider>,
        text: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<f32>> {
        call_with_retry(&self.retry, cancel, "embed", || provider.embed(text))
            .await
            .result
    }
}

fn stops_scoring(e: &EngineError) -> bool {
    matches!(e.kind(), ErrorKind::ProviderQuota | ErrorKind::Cancelled)
}

fn lexical_score(a: &str, b: &str) -> Similarity {
    Similarity::Score {
        value: lexical_similarity(a, b),
        method: SimilarityMethod::Lexical,
    }
}

/// Cosine similarity clamped to [0, 1]. `None` on dimension mismatch.
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Some(0.0);
    }
    let v = dot / (na.sqrt() * nb.sqrt());
    if v.is_nan() {
        return Some(0.0);
    }
    Some(v.clamp(0.0, 1.0))
}

/// Jaccard overlap of lowercase word sets.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let ta = tokens(a);
    let tb = tokens(b);
    match (ta.is_empty(), tb.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let inter = ta.intersection(&tb).count();
            let union = ta.union(&tb).count();
            inter as f64 / union as f64
        }
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.unicode_words().map(str::to_lowercase).collect()
}
