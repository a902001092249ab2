//! Learning Lookup (§4.L) and Learning Writer (§4.M): the KNN short-circuit
//! against validated history, and the append-only write path that feeds it.
//!
//! Grounded on the teacher's `src/overrides.rs` `AccountModification::apply`
//! (apply-a-decision-to-a-base-config, append-then-patch ordering) for
//! `save`'s append-only semantics, and `src/llm/extractor.rs`'s
//! validate-then-retry shape for `batch_auto_apply`'s per-row handling.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::schema::{
    ClassificationMetadata, ClassificationResult, ClassificationStatus, LearningRow,
    ValidationType,
};

/// spec.md §4.L: auto-apply threshold.
pub const THETA_AUTO: f64 = 0.92;
/// spec.md §4.L: broader "find similar" display-only threshold.
pub const THETA_DISPLAY: f64 = 0.85;

#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn rows_for_tenant(&self, tenant_id: i64) -> Result<Vec<LearningRow>>;
    async fn append(&self, row: LearningRow) -> Result<()>;
}

/// In-memory store used when the `storage` feature is disabled and in
/// tests. Append-only, last-writer-wins on ties is handled by the caller
/// (most recent row naturally sorts last).
#[derive(Default)]
pub struct InMemoryLearningStore {
    rows: parking_lot::Mutex<Vec<LearningRow>>,
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn rows_for_tenant(&self, tenant_id: i64) -> Result<Vec<LearningRow>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn append(&self, row: LearningRow) -> Result<()> {
        self.rows.lock().push(row);
        Ok(())
    }
}

pub struct LearnedMatch {
    pub row: LearningRow,
    pub similarity: f64,
}

pub struct LearningEngine {
    store: Arc<dyn LearningStore>,
    embedder: Arc<dyn Embedder>,
}

impl LearningEngine {
    pub fn new(store: Arc<dyn LearningStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Top-1 KNN match at or above `THETA_AUTO`, fail-open on any error
    /// (spec.md §4.L "Failure: ... yields None").
    pub async fn lookup(&self, tenant_id: i64, provider: &str, concept: &str) -> Option<LearnedMatch> {
        self.best_match(tenant_id, provider, concept, THETA_AUTO)
            .await
            .ok()
            .flatten()
    }

    /// Broader-threshold match for UI suggestions; never short-circuits the
    /// pipeline (spec.md §4.L "Policy").
    pub async fn find_similar(
        &self,
        tenant_id: i64,
        provider: &str,
        concept: &str,
    ) -> Result<Option<LearnedMatch>> {
        self.best_match(tenant_id, provider, concept, THETA_DISPLAY)
            .await
    }

    async fn best_match(
        &self,
        tenant_id: i64,
        provider: &str,
        concept: &str,
        threshold: f64,
    ) -> Result<Option<LearnedMatch>> {
        let query_text = format!("{} - {}", provider.trim(), concept.trim());
        let query_embedding = self.embedder.embed(&query_text).await?;
        let rows = self.store.rows_for_tenant(tenant_id).await?;

        let mut best: Option<LearnedMatch> = None;
        for row in rows {
            let similarity = cosine_similarity(&query_embedding, &row.embedding);
            if similarity < threshold {
                continue;
            }
            let replace = match &best {
                None => true,
                // Last-writer-wins on ties (spec.md §3): a later row with an
                // equal-or-better similarity displaces the current best.
                Some(current) => similarity >= current.similarity,
            };
            if replace {
                best = Some(LearnedMatch { row, similarity });
            }
        }
        Ok(best)
    }

    /// Promotes a learned match to a full classification result (spec.md
    /// §4.L): confidence = similarity, model_version = "learning-history".
    pub fn promote(&self, learned: &LearnedMatch) -> ClassificationResult {
        ClassificationResult {
            sat_account_code: learned.row.sat_account_code.clone(),
            sat_account_name: learned.row.sat_account_name.clone(),
            family_code: learned.row.family_code.clone(),
            confidence_sat: learned.similarity,
            confidence_family: learned.similarity,
            model_version: "learning-history".to_string(),
            explanation_short: format!(
                "Matched prior classification of {} (similarity {:.2})",
                learned.row.provider_name, learned.similarity
            ),
            explanation_detail: format!(
                "Auto-applied from learning history: provider '{}', concept '{}', validated \
                 {} on {}, cosine similarity {:.4} to the current invoice.",
                learned.row.provider_name,
                learned.row.concept,
                format!("{:?}", learned.row.validation_type).to_lowercase(),
                learned.row.created_at,
                learned.similarity
            ),
            alternative_candidates: Vec::new(),
            status: ClassificationStatus::AutoApplied,
            requires_human_review: false,
            metadata: ClassificationMetadata::default(),
        }
    }

    /// Persists a validated classification (spec.md §4.M).
    #[allow(clippy::too_many_arguments)]
    pub async fn save(
        &self,
        tenant_id: i64,
        provider_rfc: &str,
        provider_name: &str,
        concept: &str,
        sat_account_code: &str,
        sat_account_name: &str,
        family_code: &str,
        validation_type: ValidationType,
        validated_by: &str,
        session_id: Option<String>,
        original_prediction: Option<String>,
        original_confidence: Option<f64>,
    ) -> Result<()> {
        let embedding_text = format!("{} - {}", provider_name.trim(), concept.trim());
        let embedding = self.embedder.embed(&embedding_text).await?;
        let row = LearningRow {
            tenant_id,
            provider_rfc: provider_rfc.to_string(),
            provider_name: provider_name.to_string(),
            concept: concept.to_string(),
            embedding,
            sat_account_code: sat_account_code.to_string(),
            sat_account_name: sat_account_name.to_string(),
            family_code: family_code.to_string(),
            validation_type,
            validated_by: validated_by.to_string(),
            session_id: session_id.or_else(|| Some(Uuid::new_v4().to_string())),
            original_prediction,
            original_confidence,
            created_at: Utc::now(),
        };
        self.store.append(row).await
    }

    /// Counts historical rows for this tenant+provider that agree on a
    /// single SAT code, used by the account selector's auto-apply shortcut
    /// (spec.md §4.3 "Auto-apply shortcut").
    pub async fn agreeing_correction_count(
        &self,
        tenant_id: i64,
        provider_rfc: &str,
    ) -> Result<Option<(String, String, u32)>> {
        let rows = self.store.rows_for_tenant(tenant_id).await?;
        let mut tally: std::collections::HashMap<String, (String, u32)> = std::collections::HashMap::new();
        for row in rows.iter().filter(|r| r.provider_rfc == provider_rfc) {
            let entry = tally
                .entry(row.sat_account_code.clone())
                .or_insert((row.sat_account_name.clone(), 0));
            entry.1 += 1;
        }
        Ok(tally
            .into_iter()
            .find(|(_, (_, count))| *count >= 2)
            .map(|(code, (name, count))| (code, name, count)))
    }

    /// How many times this provider's classifications have been corrected
    /// by a human, used by the model selector's complexity score.
    pub async fn correction_count_for_provider(
        &self,
        tenant_id: i64,
        provider_rfc: &str,
    ) -> Result<u32> {
        let rows = self.store.rows_for_tenant(tenant_id).await?;
        Ok(rows
            .iter()
            .filter(|r| r.provider_rfc == provider_rfc && r.validation_type == ValidationType::Corrected)
            .count() as u32)
    }

    /// Scans pending invoices for tenant's history and applies learned
    /// classifications at `THETA_AUTO` without invoking any LLM (spec.md
    /// §4.L "batch auto-apply", §8 "Auto-apply is monotone").
    pub async fn batch_auto_apply<'a>(
        &self,
        tenant_id: i64,
        pending: impl IntoIterator<Item = (&'a str, &'a str, ClassificationStatus)>,
    ) -> Result<Vec<(String, ClassificationResult)>> {
        let mut applied = Vec::new();
        for (provider, concept, status) in pending {
            if status == ClassificationStatus::Confirmed {
                continue;
            }
            if let Some(learned) = self.lookup(tenant_id, provider, concept).await {
                applied.push((format!("{provider}::{concept}"), self.promote(&learned)));
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbedder;

    fn sample_row(code: &str, provider: &str, concept: &str, embedding: Vec<f32>) -> LearningRow {
        LearningRow {
            tenant_id: 1,
            provider_rfc: "GET130827SN7".to_string(),
            provider_name: provider.to_string(),
            concept: concept.to_string(),
            embedding,
            sat_account_code: code.to_string(),
            sat_account_name: "Peajes".to_string(),
            family_code: "600".to_string(),
            validation_type: ValidationType::Human,
            validated_by: "tester".to_string(),
            session_id: None,
            original_prediction: None,
            original_confidence: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn lookup_returns_none_below_threshold() {
        let embedder = Arc::new(DeterministicEmbedder);
        let store = Arc::new(InMemoryLearningStore::default());
        let unrelated = crate::embedding::deterministic_embedding("OFICINA MAX - PAPELERIA");
        store.append(sample_row("601.48", "PASE", "RECARGA IDMX", unrelated)).await.unwrap();

        let engine = LearningEngine::new(store, embedder);
        let result = engine.lookup(1, "PASE", "RECARGA IDMX").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn save_then_lookup_round_trips() {
        let embedder = Arc::new(DeterministicEmbedder);
        let store = Arc::new(InMemoryLearningStore::default());
        let engine = LearningEngine::new(store, embedder);

        engine
            .save(
                1,
                "PASE123456AA1",
                "PASE SERVICIOS ELECTRONICOS",
                "RECARGA IDMX",
                "601.48",
                "Peajes",
                "600",
                ValidationType::Human,
                "tester",
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let found = engine
            .lookup(1, "PASE SERVICIOS ELECTRONICOS", "RECARGA IDMX")
            .await
            .expect("identical text re-embeds to similarity 1.0");
        assert_eq!(found.row.sat_account_code, "601.48");
        assert!(found.similarity >= 0.99);
    }

    #[tokio::test]
    async fn two_agreeing_corrections_trigger_shortcut() {
        let embedder = Arc::new(DeterministicEmbedder);
        let store = Arc::new(InMemoryLearningStore::default());
        store
            .append(sample_row("601.48", "PASE", "A", vec![0.0; crate::embedding::EMBEDDING_DIM]))
            .await
            .unwrap();
        store
            .append(sample_row("601.48", "PASE", "B", vec![0.0; crate::embedding::EMBEDDING_DIM]))
            .await
            .unwrap();
        let engine = LearningEngine::new(store, embedder);

        let shortcut = engine
            .agreeing_correction_count(1, "GET130827SN7")
            .await
            .unwrap();
        assert_eq!(shortcut, Some(("601.48".to_string(), "Peajes".to_string(), 2)));
    }
}
