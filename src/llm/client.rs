//! Provider-agnostic LLM client: strict-JSON `generateContent`-style calls
//! with retry/backoff and an admission semaphore on the strong model.
//!
//! Wire shape and call structure are grounded on the teacher's
//! `src/llm/client.rs` (`GeminiClient::generate_content`): one typed
//! request/response pair, explicit non-2xx mapping, `finish_reason`
//! handling. Retry/backoff is grounded on
//! `src/llm/extractor.rs::call_llm_with_retry`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{ClassificationError, Result};
use crate::llm::types::ModelTier;

/// spec.md §5: "a process-wide admission semaphore with capacity 3 bounds
/// concurrent LLM calls to the strong-model provider".
pub const STRONG_MODEL_ADMISSION_CAPACITY: usize = 3;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Calls `model` with `system_prompt`/`user_prompt`, constraining the
    /// response to `response_schema` (a JSON Schema produced by an
    /// `Instructor`-derived type's `::schema().to_json()`). Returns the raw
    /// JSON text of the model's response.
    async fn generate_json(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: Value,
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ModelRoster {
    pub cheap_model: String,
    pub strong_model: String,
}

pub struct UsageCounters {
    pub cheap_calls: AtomicU64,
    pub strong_calls: AtomicU64,
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self {
            cheap_calls: AtomicU64::new(0),
            strong_calls: AtomicU64::new(0),
        }
    }
}

/// HTTP-backed client against a Gemini-compatible `generateContent`
/// endpoint. The base URL is configurable so the same client shape serves
/// either the cheap or the strong model provider.
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    roster: ModelRoster,
    strong_admission: Arc<Semaphore>,
    pub usage: UsageCounters,
}

impl HttpLlmClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, roster: ModelRoster) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            roster,
            strong_admission: Arc::new(Semaphore::new(STRONG_MODEL_ADMISSION_CAPACITY)),
            usage: UsageCounters::default(),
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Cheap => &self.roster.cheap_model,
            ModelTier::Strong => &self.roster.strong_model,
        }
    }

    async fn call_once(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: &Value,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::Text {
                    text: user_prompt.to_string(),
                }],
            }],
            system_instruction: Some(Content {
                role: "user".to_string(),
                parts: vec![Part::Text {
                    text: system_prompt.to_string(),
                }],
            }),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: Some(response_schema.clone()),
                max_output_tokens: Some(8192),
            },
        };

        let res = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClassificationError::LlmProvider(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClassificationError::LlmProvider(format!(
                "status {status}: {body}"
            )));
        }

        let body: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| ClassificationError::LlmProvider(e.to_string()))?;

        if let Some(feedback) = body.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(ClassificationError::LlmProvider(format!(
                    "prompt blocked: {reason}"
                )));
            }
        }

        let candidate = body
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ClassificationError::LlmProvider("no candidates returned".to_string()))?;

        if let Some(reason) = &candidate.finish_reason {
            if reason == "SAFETY" || reason == "RECITATION" {
                return Err(ClassificationError::LlmProvider(format!(
                    "generation stopped: {reason}"
                )));
            }
        }

        let content = candidate
            .content
            .ok_or_else(|| ClassificationError::LlmProvider("candidate has no content".to_string()))?;
        let part = content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| ClassificationError::LlmProvider("content has no parts".to_string()))?;

        match part {
            Part::Text { text } => Ok(text),
        }
    }

    fn is_retryable(err: &ClassificationError) -> bool {
        matches!(err, ClassificationError::LlmProvider(msg) if msg.contains("429") || msg.contains("529"))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate_json(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: Value,
    ) -> Result<String> {
        let model = self.model_for(tier).to_string();

        let _permit = if tier == ModelTier::Strong {
            Some(
                self.strong_admission
                    .acquire()
                    .await
                    .expect("semaphore is never closed"),
            )
        } else {
            None
        };

        match tier {
            ModelTier::Cheap => self.usage.cheap_calls.fetch_add(1, Ordering::Relaxed),
            ModelTier::Strong => self.usage.strong_calls.fetch_add(1, Ordering::Relaxed),
        };

        let mut backoff = Duration::from_secs(INITIAL_BACKOFF_SECS);
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match self
                .call_once(&model, system_prompt, user_prompt, &response_schema)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    let retryable = Self::is_retryable(&e);
                    last_err = Some(e);
                    if !retryable || attempt == MAX_RETRIES {
                        break;
                    }
                    log::warn!("llm call attempt {attempt} failed, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ClassificationError::LlmProvider("unknown failure".to_string())))
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Option<Value>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Deterministic, network-free client used by tests and by callers without
/// an LLM API key configured (spec.md §4.3 "no-LLM fallback").
pub struct MockLlmClient {
    pub scripted_responses: parking_lot::Mutex<Vec<Result<String>>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            scripted_responses: parking_lot::Mutex::new(
                responses.into_iter().map(Ok).rev().collect(),
            ),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate_json(
        &self,
        _tier: ModelTier,
        _system_prompt: &str,
        _user_prompt: &str,
        _response_schema: Value,
    ) -> Result<String> {
        let mut queue = self.scripted_responses.lock();
        queue
            .pop()
            .unwrap_or_else(|| Err(ClassificationError::LlmProvider("mock exhausted".to_string())))
    }
}
