//! Correction API (§6): thin delegation layer consumed by a UI. The HTTP
//! surface itself is out of scope (spec.md §1); these are plain async
//! functions over the learning engine and context provider.
//!
//! Grounded on `examples/original_source/api/classification_correction_api.py`
//! (the original's correction endpoints), adapted into function calls
//! rather than HTTP handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ContextProvider;
use crate::error::Result;
use crate::learning::{LearningEngine, THETA_AUTO};
use crate::schema::{ClassificationResult, LearningRow, ValidationType};

pub struct LearningStats {
    pub total_rows: usize,
    pub by_type: HashMap<String, usize>,
    pub top_providers: Vec<(String, usize)>,
}

pub struct CorrectionApi {
    learning: Arc<LearningEngine>,
    context: Arc<ContextProvider>,
}

impl CorrectionApi {
    pub fn new(learning: Arc<LearningEngine>, context: Arc<ContextProvider>) -> Self {
        Self { learning, context }
    }

    /// Records a human correction, then reports other pending invoices for
    /// the same tenant that would benefit — without re-applying them
    /// (spec.md §4.M "Correction cascade").
    #[allow(clippy::too_many_arguments)]
    pub async fn correct(
        &self,
        tenant_id: i64,
        provider_rfc: &str,
        provider_name: &str,
        concept: &str,
        new_sat_code: &str,
        new_sat_name: &str,
        new_family_code: &str,
        reason: &str,
        user: &str,
        original_prediction: Option<String>,
        original_confidence: Option<f64>,
    ) -> Result<Vec<(String, f64)>> {
        self.learning
            .save(
                tenant_id,
                provider_rfc,
                provider_name,
                concept,
                new_sat_code,
                new_sat_name,
                new_family_code,
                ValidationType::Corrected,
                user,
                None,
                original_prediction,
                original_confidence,
            )
            .await?;
        log::info!("correction recorded for tenant {tenant_id}, provider {provider_rfc}: {reason}");

        self.search_similar(tenant_id, provider_name, concept, 20, THETA_AUTO)
            .await
    }

    /// Vector KNN preview for a UI (spec.md §6 `search_similar`).
    pub async fn search_similar(
        &self,
        tenant_id: i64,
        provider: &str,
        concept: &str,
        _top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<(String, f64)>> {
        match self.learning.find_similar(tenant_id, provider, concept).await? {
            Some(found) if found.similarity >= min_similarity => {
                Ok(vec![(found.row.sat_account_code, found.similarity)])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Prior human corrections for this provider, sourced from
    /// `ai_correction_memory` via the context provider rather than the
    /// auto-apply learning history (spec.md "Resolved Open Questions": the
    /// two stores stay separate reads).
    pub async fn provider_correction_history(
        &self,
        tenant_id: i64,
        provider_rfc: &str,
    ) -> Vec<crate::context::Correction> {
        self.context
            .get_similar_corrections(tenant_id, Some(provider_rfc), 20)
            .await
    }

    pub async fn learning_stats(&self, tenant_id: i64, rows: &[LearningRow]) -> LearningStats {
        let mine: Vec<&LearningRow> = rows.iter().filter(|r| r.tenant_id == tenant_id).collect();

        let mut by_type = HashMap::new();
        let mut provider_counts: HashMap<String, usize> = HashMap::new();
        for row in &mine {
            *by_type.entry(format!("{:?}", row.validation_type)).or_insert(0) += 1;
            *provider_counts.entry(row.provider_name.clone()).or_insert(0) += 1;
        }
        let mut top_providers: Vec<(String, usize)> = provider_counts.into_iter().collect();
        top_providers.sort_by(|a, b| b.1.cmp(&a.1));
        top_providers.truncate(10);

        LearningStats {
            total_rows: mine.len(),
            by_type,
            top_providers,
        }
    }

    /// spec.md §6 `batch_auto_apply`: scans pending invoices, applies
    /// learned classifications where similarity >= 0.92.
    pub async fn batch_auto_apply<'a>(
        &self,
        tenant_id: i64,
        pending: impl IntoIterator<Item = (&'a str, &'a str, crate::schema::ClassificationStatus)>,
    ) -> Result<Vec<(String, ClassificationResult)>> {
        self.learning.batch_auto_apply(tenant_id, pending).await
    }
}
