//! Top-level orchestrator: wires L -> S -> 1 -> S -> 2A -> 2B -> 3, threads
//! each phase's reasoning forward, and builds the metadata trace.
//!
//! Grounded on the teacher's top-level `FinancialExtractor::extract` (a
//! handful of numbered steps with a shared optional progress channel) —
//! `ExtractionEvent` becomes `PipelineEvent` here, same optional-channel
//! shape.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::context::ContextProvider;
use crate::error::{ClassificationError, Result};
use crate::family::FamilyClassifier;
use crate::learning::LearningEngine;
use crate::llm::types::PipelineEvent;
use crate::model_selector::ModelSelector;
use crate::retrieval::CandidateRetriever;
use crate::schema::{ClassificationMetadata, ClassificationResult, ClassificationStatus, InvoiceSnapshot};
use crate::selector::AccountSelector;
use crate::subfamily::SubfamilyClassifier;

pub struct ClassificationPipeline {
    pub learning: Arc<LearningEngine>,
    pub family_classifier: Arc<FamilyClassifier>,
    pub subfamily_classifier: Arc<SubfamilyClassifier>,
    pub retriever: Arc<CandidateRetriever>,
    pub selector: Arc<AccountSelector>,
    pub context: Arc<ContextProvider>,
    pub model_selector: Arc<ModelSelector>,
}

impl ClassificationPipeline {
    pub async fn classify_invoice(
        &self,
        invoice: &InvoiceSnapshot,
        progress: Option<UnboundedSender<PipelineEvent>>,
    ) -> Result<ClassificationResult> {
        invoice.validate().map_err(|e| {
            emit(&progress, PipelineEvent::Failed { reason: e.to_string() });
            e
        })?;

        let mut timings_ms = std::collections::HashMap::new();

        // Stage L: learning lookup short-circuit.
        emit(&progress, PipelineEvent::LearningLookup);
        let lookup_started = Instant::now();
        let concept = invoice.primary_concept();
        if let Some(learned) = self
            .learning
            .lookup(invoice.tenant_id, &invoice.emisor_nombre, &concept.descripcion)
            .await
        {
            timings_ms.insert("learning_lookup".to_string(), elapsed_ms(lookup_started));
            emit(&progress, PipelineEvent::Success);
            let mut result = self.learning.promote(&learned);
            result.metadata.timings_ms = timings_ms;
            return Ok(result);
        }
        timings_ms.insert("learning_lookup".to_string(), elapsed_ms(lookup_started));

        let context = self
            .context
            .get_context(invoice.tenant_id)
            .await
            .unwrap_or_default();

        // Stage S (family) -> Stage 1.
        emit(
            &progress,
            PipelineEvent::ModelSelected {
                phase: "family".to_string(),
                model: "cheap".to_string(),
                reason: self.model_selector.select_for_family().reason,
            },
        );
        emit(&progress, PipelineEvent::FamilyClassification);
        let family_started = Instant::now();
        let few_shot = self.context.get_family_classification_examples(invoice.tenant_id).await;
        let family_result = self
            .family_classifier
            .classify_family(invoice, &context, &few_shot)
            .await;
        timings_ms.insert("family".to_string(), elapsed_ms(family_started));

        // Stage 2A.
        emit(&progress, PipelineEvent::SubfamilyClassification);
        let subfamily_started = Instant::now();
        let subfamily_result = self
            .subfamily_classifier
            .classify_subfamily(invoice, &family_result, &context)
            .await;
        timings_ms.insert("subfamily".to_string(), elapsed_ms(subfamily_started));

        // Stage 2B.
        emit(&progress, PipelineEvent::CandidateRetrieval);
        let retrieval_started = Instant::now();
        let candidates = match self
            .retriever
            .retrieve_candidates(invoice, &subfamily_result, &subfamily_result.reasoning)
            .await
        {
            Ok(candidates) => candidates,
            Err(ClassificationError::NoCandidates { family, subfamily }) => {
                emit(
                    &progress,
                    PipelineEvent::Failed {
                        reason: format!("no candidates for family {family} subfamily {subfamily}"),
                    },
                );
                return Ok(no_candidates_result(&family, &subfamily, timings_ms));
            }
            Err(e) => {
                emit(&progress, PipelineEvent::Failed { reason: e.to_string() });
                return Err(e);
            }
        };
        timings_ms.insert("candidate_retrieval".to_string(), elapsed_ms(retrieval_started));

        // Stage 3.
        emit(&progress, PipelineEvent::AccountSelection);
        let selection_started = Instant::now();
        let similar_corrections = self
            .context
            .get_similar_corrections(invoice.tenant_id, Some(&invoice.emisor_rfc), 5)
            .await;
        let mut result = self
            .selector
            .select_account(
                invoice,
                &candidates,
                &family_result,
                &similar_corrections,
                &subfamily_result.reasoning,
            )
            .await?;
        timings_ms.insert("account_selection".to_string(), elapsed_ms(selection_started));

        result.metadata.hierarchical_phase1 = serde_json::to_value(&family_result).ok();
        result.metadata.hierarchical_phase2a = serde_json::to_value(&subfamily_result).ok();
        result.metadata.hierarchical_phase2b = serde_json::to_value(&candidates).ok();
        result.metadata.hierarchical_phase3 = serde_json::to_value(&result.status).ok();
        result.metadata.timings_ms = timings_ms;

        emit(&progress, PipelineEvent::Success);
        Ok(result)
    }
}

fn emit(progress: &Option<UnboundedSender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// spec.md §7.2: an empty candidate set aborts with a well-formed pending
/// result citing the empty set, never a panic.
fn no_candidates_result(
    family: &str,
    subfamily: &str,
    timings_ms: std::collections::HashMap<String, u64>,
) -> ClassificationResult {
    ClassificationResult {
        sat_account_code: String::new(),
        sat_account_name: String::new(),
        family_code: family.to_string(),
        confidence_sat: 0.0,
        confidence_family: 0.0,
        model_version: "none".to_string(),
        explanation_short: "No candidate accounts were found for this invoice.".to_string(),
        explanation_detail: format!(
            "The catalog produced no leaf accounts for family {family} / subfamily {subfamily}, \
             even after widening the search. This invoice needs manual classification."
        ),
        alternative_candidates: Vec::new(),
        status: ClassificationStatus::Pending,
        requires_human_review: true,
        metadata: ClassificationMetadata {
            timings_ms,
            ..Default::default()
        },
    }
}
