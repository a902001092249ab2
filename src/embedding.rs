//! The multilingual sentence-embedding substrate (spec.md §3, §5): a
//! process-wide singleton (384 dims, normalized) used by the learning
//! lookup/writer, the vector candidate retriever, and the fiscal
//! regulations RAG lookup.
//!
//! Mirrors the teacher's `GeminiClient` shape (`src/llm/client.rs`): a
//! small typed client wrapping `reqwest`, one call per remote operation,
//! explicit error mapping on non-2xx responses.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{ClassificationError, Result};

pub const EMBEDDING_DIM: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Calls out to an HTTP embedding endpoint (e.g. a sidecar serving a
/// multilingual MiniLM model) and normalizes the result.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ClassificationError::Embedding(e.to_string()))?;

        if !res.status().is_success() {
            return Err(ClassificationError::Embedding(format!(
                "embedding endpoint returned {}",
                res.status()
            )));
        }

        let body: EmbedResponse = res
            .json()
            .await
            .map_err(|e| ClassificationError::Embedding(e.to_string()))?;

        Ok(normalize(&body.embedding))
    }
}

/// Deterministic, network-free embedder: hashes n-grams of the input into a
/// fixed-size vector. Not semantically meaningful, but stable across calls
/// with the same input — used as the test double and as the fail-open
/// fallback surface when no embedding endpoint is configured (spec.md §7.6,
/// "degrade silently").
#[derive(Default)]
pub struct DeterministicEmbedder;

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(deterministic_embedding(text))
    }
}

pub fn deterministic_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    let normalized = text.to_lowercase();
    for token in normalized.split_whitespace() {
        let mut hash: u64 = 1469598103934665603; // FNV offset basis
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        let bucket = (hash as usize) % EMBEDDING_DIM;
        v[bucket] += 1.0;
        let bucket2 = ((hash >> 17) as usize) % EMBEDDING_DIM;
        v[bucket2] += 0.5;
    }
    normalize(&v)
}

pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity between two (ideally already-normalized) vectors.
/// Normalizes defensively, per DESIGN.md's resolution of the "historical
/// non-normalized embeddings" open question: computations never assume a
/// stored vector is already unit length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let a = normalize(a);
    let b = normalize(b);
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0) as f64
}
