//! Account Selector (§4.3): picks exactly one leaf account from the
//! retrieved candidates, enforcing the hierarchical and level-2
//! constraints, with an auto-apply shortcut and a no-LLM fallback.

use std::sync::Arc;

use crate::catalog::SharedCatalog;
use crate::consistency::check_selection;
use crate::context::Correction;
use crate::error::{ClassificationError, Result};
use crate::learning::LearningEngine;
use crate::llm::client::LlmClient;
use crate::llm::json::parse_json_object;
use crate::llm::prompts::{build_account_selection_prompt, SYSTEM_PROMPT_ACCOUNT_SELECTION};
use crate::llm::types::ModelTier;
use crate::model_selector::ModelSelector;
use crate::schema::{
    AccountSelectionResponse, AlternativeCandidate, Candidate, ClassificationMetadata,
    ClassificationResult, ClassificationStatus, FamilyResult, InvoiceSnapshot,
};
use rstructor::SchemaType;

const MAX_ALTERNATIVES: usize = 4;
/// spec.md §4.3 "Auto-apply shortcut": confidence assigned when two or more
/// historical corrections agree on a code.
const AUTO_APPLY_SHORTCUT_CONFIDENCE: f64 = 0.95;

pub struct AccountSelector {
    llm: Option<Arc<dyn LlmClient>>,
    catalog: SharedCatalog,
    learning: Arc<LearningEngine>,
    model_selector: Arc<ModelSelector>,
}

impl AccountSelector {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        catalog: SharedCatalog,
        learning: Arc<LearningEngine>,
        model_selector: Arc<ModelSelector>,
    ) -> Self {
        Self {
            llm,
            catalog,
            learning,
            model_selector,
        }
    }

    pub async fn select_account(
        &self,
        invoice: &InvoiceSnapshot,
        candidates: &[Candidate],
        family_result: &FamilyResult,
        similar_corrections: &[Correction],
        subfamily_reasoning: &str,
    ) -> Result<ClassificationResult> {
        if candidates.is_empty() {
            return Err(ClassificationError::NoCandidates {
                family: family_result.family_code.clone(),
                subfamily: String::new(),
            });
        }

        if let Some((code, name, _count)) = self
            .learning
            .agreeing_correction_count(invoice.tenant_id, &invoice.emisor_rfc)
            .await?
        {
            return Ok(self.build_result(
                &code,
                &name,
                &family_result.family_code,
                AUTO_APPLY_SHORTCUT_CONFIDENCE,
                family_result.confidence,
                "learning-history-shortcut".to_string(),
                "2+ historical corrections agree; no model was called".to_string(),
                "Auto-applied: 2+ historical corrections agree on this account.".to_string(),
                "Two or more past human corrections for this provider agreed on the same SAT \
                 account, so the model call was skipped entirely (spec.md-style shortcut)."
                    .to_string(),
                candidates,
                family_result,
                ClassificationStatus::AutoApplied,
            ));
        }

        let Some(llm) = &self.llm else {
            return self.fallback_to_top_candidate(candidates, family_result);
        };

        let provider_corrections = self
            .learning
            .correction_count_for_provider(invoice.tenant_id, &invoice.emisor_rfc)
            .await
            .unwrap_or(0);
        let selection = self
            .model_selector
            .select_for_account(invoice, candidates, provider_corrections);

        let shortlist: Vec<(String, String, f64)> = candidates
            .iter()
            .map(|c| (c.code.clone(), c.name.clone(), c.score))
            .collect();
        let history: Vec<String> = similar_corrections
            .iter()
            .map(|c| format!("{} -> {} ({})", c.concept, c.sat_account_code, c.sat_account_name))
            .collect();
        let prompt = build_account_selection_prompt(invoice, &shortlist, &history, subfamily_reasoning);

        match self.call_llm(llm.as_ref(), &prompt, selection.tier).await {
            Ok(response) => {
                let code = response.sat_account_code;
                if !code.contains('.') {
                    return self.fallback_to_top_candidate(candidates, family_result);
                }
                let name = self.catalog.name_for(&code).unwrap_or_else(|_| {
                    candidates
                        .iter()
                        .find(|c| c.code == code)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| "Unknown".to_string())
                });
                Ok(self.build_result(
                    &code,
                    &name,
                    &family_result.family_code,
                    response.confidence.clamp(0.0, 1.0),
                    family_result.confidence,
                    tier_name(selection.tier).to_string(),
                    selection.reason,
                    response.explanation_short,
                    response.explanation_detail,
                    candidates,
                    family_result,
                    ClassificationStatus::Pending,
                ))
            }
            // spec.md §7.4: invalid JSON/schema -> fall back to the top
            // retrieval candidate under the hierarchical constraint.
            Err(_) => self.fallback_to_top_candidate(candidates, family_result),
        }
    }

    async fn call_llm(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        tier: ModelTier,
    ) -> Result<AccountSelectionResponse> {
        let schema = AccountSelectionResponse::schema().to_json();
        let raw = llm
            .generate_json(tier, SYSTEM_PROMPT_ACCOUNT_SELECTION, prompt, schema)
            .await?;
        parse_json_object(&raw)
    }

    /// spec.md §4.3 "No-LLM fallback" and §7.4 "Fallo al parsear JSON"
    /// fallback: highest retrieval score satisfying the hierarchical
    /// constraint when one applies.
    fn fallback_to_top_candidate(
        &self,
        candidates: &[Candidate],
        family_result: &FamilyResult,
    ) -> Result<ClassificationResult> {
        let family_digit = family_result.family_code.chars().next();
        let enforce_constraint = family_result.confidence >= 0.80;

        let chosen = candidates
            .iter()
            .filter(|c| {
                !enforce_constraint || c.code.chars().next() == family_digit
            })
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap())
            .or_else(|| candidates.iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap()))
            .ok_or_else(|| ClassificationError::NoCandidates {
                family: family_result.family_code.clone(),
                subfamily: String::new(),
            })?;

        let name = self.catalog.name_for(&chosen.code).unwrap_or_else(|_| chosen.name.clone());
        Ok(self.build_result(
            &chosen.code,
            &name,
            &family_result.family_code,
            chosen.score,
            family_result.confidence,
            "no-llm-fallback".to_string(),
            "no LLM key configured, or the LLM response failed to parse".to_string(),
            "Selected automatically from retrieval ranking (no LLM available).".to_string(),
            "No LLM API key was configured, or the LLM response could not be parsed; fell back \
             to the highest-scored retrieval candidate satisfying the family constraint."
                .to_string(),
            candidates,
            family_result,
            ClassificationStatus::Pending,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        code: &str,
        name: &str,
        family_code: &str,
        confidence_sat: f64,
        confidence_family: f64,
        selected_model: String,
        model_selection_reason: String,
        explanation_short: String,
        explanation_detail: String,
        candidates: &[Candidate],
        family_result: &FamilyResult,
        status: ClassificationStatus,
    ) -> ClassificationResult {
        let check = check_selection(code, family_result);

        let alternatives: Vec<AlternativeCandidate> = candidates
            .iter()
            .filter(|c| c.code != code)
            .take(MAX_ALTERNATIVES)
            .map(|c| AlternativeCandidate {
                code: c.code.clone(),
                name: c.name.clone(),
                family_code: c.family_hint.clone(),
                score: c.score,
                description: c.description.clone(),
            })
            .collect();

        let metadata = ClassificationMetadata {
            selected_model: Some(selected_model.clone()),
            model_selection_reason: Some(model_selection_reason),
            ..Default::default()
        };

        ClassificationResult {
            sat_account_code: code.to_string(),
            sat_account_name: name.to_string(),
            family_code: family_code.to_string(),
            confidence_sat,
            confidence_family,
            model_version: selected_model,
            explanation_short,
            explanation_detail,
            alternative_candidates: alternatives,
            status,
            requires_human_review: check.requires_human_review,
            metadata,
        }
    }
}

/// spec.md §6: `metadata.selected_model` names the model tier actually
/// called, kept distinct from `model_selection_reason`.
fn tier_name(tier: ModelTier) -> &'static str {
    match tier {
        ModelTier::Cheap => "cheap",
        ModelTier::Strong => "strong",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SatAccountCatalog;
    use crate::embedding::DeterministicEmbedder;
    use crate::learning::InMemoryLearningStore;
    use crate::schema::{ConceptLine, PaymentMethod, SatAccount};

    fn catalog() -> SharedCatalog {
        Arc::new(SatAccountCatalog::new(vec![SatAccount {
            code: "601.48".to_string(),
            name: "Peajes".to_string(),
            description: String::new(),
            embedding: None,
        }]))
    }

    fn invoice() -> InvoiceSnapshot {
        InvoiceSnapshot {
            emisor_rfc: "PASE010101AAA".to_string(),
            emisor_nombre: "PASE SERVICIOS ELECTRONICOS".to_string(),
            receptor_rfc: "TEN010101AAA".to_string(),
            receptor_nombre: "Tenant".to_string(),
            receptor_uso_cfdi: "G03".to_string(),
            conceptos: vec![ConceptLine {
                descripcion: "RECARGA IDMX".to_string(),
                importe: 336.21,
                clave_prod_serv: None,
            }],
            total: 344.83,
            moneda: "MXN".to_string(),
            metodo_pago: PaymentMethod::Pue,
            forma_pago: None,
            tenant_id: 1,
            company_id: None,
        }
    }

    fn family_result() -> FamilyResult {
        FamilyResult {
            family_code: "600".to_string(),
            family_name: "Gastos".to_string(),
            confidence: 0.95,
            reasoning: "test".to_string(),
            override_uso_cfdi: false,
            override_reason: None,
            requires_human_review: false,
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![Candidate {
            code: "601.48".to_string(),
            name: "Peajes".to_string(),
            family_hint: "600".to_string(),
            score: 0.93,
            description: None,
            llm_reasoning: None,
        }]
    }

    #[tokio::test]
    async fn no_llm_key_falls_back_to_top_candidate() {
        let learning = Arc::new(LearningEngine::new(
            Arc::new(InMemoryLearningStore::default()),
            Arc::new(DeterministicEmbedder),
        ));
        let selector = AccountSelector::new(None, catalog(), learning, Arc::new(ModelSelector::new()));
        let result = selector
            .select_account(&invoice(), &candidates(), &family_result(), &[], "test reasoning")
            .await
            .unwrap();
        assert_eq!(result.sat_account_code, "601.48");
        assert_eq!(result.sat_account_name, "Peajes");
    }

    #[tokio::test]
    async fn two_agreeing_corrections_skip_llm_entirely() {
        let store = Arc::new(InMemoryLearningStore::default());
        let learning = Arc::new(LearningEngine::new(store.clone(), Arc::new(DeterministicEmbedder)));
        learning
            .save(1, "PASE010101AAA", "PASE", "A", "601.48", "Peajes", "600", crate::schema::ValidationType::Human, "u", None, None, None)
            .await
            .unwrap();
        learning
            .save(1, "PASE010101AAA", "PASE", "B", "601.48", "Peajes", "600", crate::schema::ValidationType::Human, "u", None, None, None)
            .await
            .unwrap();

        let selector = AccountSelector::new(None, catalog(), learning, Arc::new(ModelSelector::new()));
        let result = selector
            .select_account(&invoice(), &candidates(), &family_result(), &[], "test reasoning")
            .await
            .unwrap();
        assert_eq!(result.status, ClassificationStatus::AutoApplied);
        assert_eq!(result.confidence_sat, AUTO_APPLY_SHORTCUT_CONFIDENCE);
    }

    #[tokio::test]
    async fn empty_candidates_errors() {
        let learning = Arc::new(LearningEngine::new(
            Arc::new(InMemoryLearningStore::default()),
            Arc::new(DeterministicEmbedder),
        ));
        let selector = AccountSelector::new(None, catalog(), learning, Arc::new(ModelSelector::new()));
        let result = selector
            .select_account(&invoice(), &[], &family_result(), &[], "test reasoning")
            .await;
        assert!(result.is_err());
    }
}
