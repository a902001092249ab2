//! Candidate Retriever (§4.2B): Strategy A (LLM-ranked) and Strategy B
//! (vector cosine scan), with the subfamily -> family -> default fallback
//! chain.
//!
//! Grounded on the teacher's `extractor.rs::extract` dual sub-call shape
//! (`try_join!` of two independent extraction calls) — here the two
//! strategies are symmetric call sites dispatched by a config flag rather
//! than joined, since only one strategy's result is used per invocation.

use std::sync::Arc;

use crate::catalog::SharedCatalog;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{ClassificationError, Result};
use crate::llm::client::LlmClient;
use crate::llm::json::parse_json_object;
use crate::llm::prompts::{build_candidate_ranking_prompt, SYSTEM_PROMPT_CANDIDATE_RANKING};
use crate::llm::types::ModelTier;
use crate::schema::{Candidate, CandidateRankingResponse, InvoiceSnapshot, SubfamilyResult};
use rstructor::SchemaType;

/// spec.md §4.2B: small subfamilies favor LLM semantic interpretation over
/// a bare vector scan (e.g. distinguishing an ODOO "plan" software invoice
/// from a pension plan by provider type, not concept substring).
const LLM_STRATEGY_SIZE_CEILING: usize = 30;
const DEFAULT_TOP_K: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    LlmIntelligent,
    Vector,
}

/// Common default subfamilies tried when both the subfamily and the family
/// yield no leaf accounts (spec.md §4.2B "Fallbacks").
const DEFAULT_PURCHASE_SUBFAMILY_PREFIXES: &[&str] = &["601", "602", "603", "605", "613"];

pub struct CandidateRetriever {
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    catalog: SharedCatalog,
    strategy: RetrievalStrategy,
}

impl CandidateRetriever {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        catalog: SharedCatalog,
        strategy: RetrievalStrategy,
    ) -> Self {
        Self {
            llm,
            embedder,
            catalog,
            strategy,
        }
    }

    pub async fn retrieve_candidates(
        &self,
        invoice: &InvoiceSnapshot,
        subfamily_result: &SubfamilyResult,
        phase2a_reasoning: &str,
    ) -> Result<Vec<Candidate>> {
        let family_code = family_code_of(&subfamily_result.subfamily_code);

        let mut leaves = self.catalog.leaves_in_subfamily(&subfamily_result.subfamily_code);
        if leaves.is_empty() {
            leaves = self.catalog.leaves_in_family(&family_code);
        }
        if leaves.is_empty() {
            leaves = DEFAULT_PURCHASE_SUBFAMILY_PREFIXES
                .iter()
                .flat_map(|prefix| self.catalog.leaves_in_subfamily(prefix))
                .collect();
        }
        if leaves.is_empty() {
            return Err(ClassificationError::NoCandidates {
                family: family_code,
                subfamily: subfamily_result.subfamily_code.clone(),
            });
        }

        let use_llm = self.strategy == RetrievalStrategy::LlmIntelligent
            && leaves.len() <= LLM_STRATEGY_SIZE_CEILING;

        if use_llm {
            match self
                .retrieve_llm(invoice, &leaves, &family_code, phase2a_reasoning)
                .await
            {
                Ok(candidates) if !candidates.is_empty() => return Ok(candidates),
                _ => {}
            }
        }

        self.retrieve_vector(invoice, &leaves, &family_code).await
    }

    async fn retrieve_llm(
        &self,
        invoice: &InvoiceSnapshot,
        leaves: &[&crate::schema::SatAccount],
        family_code: &str,
        phase2a_reasoning: &str,
    ) -> Result<Vec<Candidate>> {
        let listing: Vec<(String, String, Option<String>)> = leaves
            .iter()
            .map(|a| (a.code.clone(), a.name.clone(), Some(a.description.clone())))
            .collect();
        let prompt = build_candidate_ranking_prompt(invoice, &listing, phase2a_reasoning);
        let schema = CandidateRankingResponse::schema().to_json();
        let raw = self
            .llm
            .generate_json(ModelTier::Cheap, SYSTEM_PROMPT_CANDIDATE_RANKING, &prompt, schema)
            .await?;
        let parsed: CandidateRankingResponse = parse_json_object(&raw)?;

        let mut candidates = Vec::new();
        for ranking in parsed.rankings.into_iter().take(DEFAULT_TOP_K) {
            if let Some(account) = leaves.iter().find(|a| a.code == ranking.code) {
                candidates.push(Candidate {
                    code: account.code.clone(),
                    name: account.name.clone(),
                    family_hint: family_code.to_string(),
                    score: ranking.score.clamp(0.0, 1.0),
                    description: Some(account.description.clone()),
                    llm_reasoning: ranking.reasoning,
                });
            }
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(candidates)
    }

    async fn retrieve_vector(
        &self,
        invoice: &InvoiceSnapshot,
        leaves: &[&crate::schema::SatAccount],
        family_code: &str,
    ) -> Result<Vec<Candidate>> {
        let query_text = enriched_query_string(invoice);
        let query_embedding = self.embedder.embed(&query_text).await?;

        let mut scored: Vec<Candidate> = leaves
            .iter()
            .filter_map(|account| {
                let embedding = account.embedding.as_ref()?;
                let score = cosine_similarity(&query_embedding, embedding);
                Some(Candidate {
                    code: account.code.clone(),
                    name: account.name.clone(),
                    family_hint: family_code.to_string(),
                    score,
                    description: Some(account.description.clone()),
                    llm_reasoning: None,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(DEFAULT_TOP_K);
        Ok(scored)
    }
}

/// The family a subfamily belongs to shares its first digit (the
/// hierarchical invariant), so the retriever derives it from the subfamily
/// code rather than taking a redundant parameter.
fn family_code_of(subfamily_code: &str) -> String {
    match subfamily_code.chars().next() {
        Some(d) => format!("{d}00"),
        None => "600".to_string(),
    }
}

/// spec.md §4.2B "Vector retrieval": primary concept with its share of
/// total, additional concepts >= 5%, and the provider name.
fn enriched_query_string(invoice: &InvoiceSnapshot) -> String {
    let primary = invoice.primary_concept();
    let secondary: Vec<String> = invoice
        .secondary_concepts(0.05)
        .iter()
        .map(|c| c.descripcion.clone())
        .collect();
    format!(
        "{} ({:.0}%) {} - {}",
        primary.descripcion,
        primary.percentage_of(invoice.total) * 100.0,
        secondary.join(" "),
        invoice.emisor_nombre,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SatAccountCatalog;
    use crate::embedding::DeterministicEmbedder;
    use crate::llm::client::MockLlmClient;
    use crate::schema::{ConceptLine, PaymentMethod, SatAccount};

    fn catalog_with_embeddings() -> SharedCatalog {
        Arc::new(SatAccountCatalog::new(vec![
            SatAccount {
                code: "601.48".to_string(),
                name: "Peajes".to_string(),
                description: "Tolls".to_string(),
                embedding: Some(crate::embedding::deterministic_embedding("peajes carretera")),
            },
            SatAccount {
                code: "601.49".to_string(),
                name: "Estacionamientos".to_string(),
                description: "Parking".to_string(),
                embedding: Some(crate::embedding::deterministic_embedding("estacionamiento")),
            },
        ]))
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
                clave_prod_serv: Some("80141628".to_string()),
            }],
            total: 344.83,
            moneda: "MXN".to_string(),
            metodo_pago: PaymentMethod::Pue,
            forma_pago: None,
            tenant_id: 1,
            company_id: None,
        }
    }

    fn subfamily_result() -> SubfamilyResult {
        SubfamilyResult {
            subfamily_code: "601".to_string(),
            subfamily_name: "Gastos de Venta".to_string(),
            confidence: 0.9,
            reasoning: "test".to_string(),
            alternative_subfamilies: Vec::new(),
            requires_human_review: false,
            hierarchically_valid: true,
            in_shortlist: true,
        }
    }

    #[tokio::test]
    async fn vector_strategy_ranks_by_cosine_similarity() {
        let retriever = CandidateRetriever::new(
            Arc::new(MockLlmClient::new(vec![])),
            Arc::new(DeterministicEmbedder),
            catalog_with_embeddings(),
            RetrievalStrategy::Vector,
        );
        let candidates = retriever
            .retrieve_candidates(&invoice(), &subfamily_result(), "Concept matches sales-side expenses.")
            .await
            .unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates[0].score >= candidates.last().unwrap().score);
    }

    #[tokio::test]
    async fn empty_catalog_yields_no_candidates_error() {
        let empty_catalog: SharedCatalog = Arc::new(SatAccountCatalog::new(Vec::new()));
        let retriever = CandidateRetriever::new(
            Arc::new(MockLlmClient::new(vec![])),
            Arc::new(DeterministicEmbedder),
            empty_catalog,
            RetrievalStrategy::Vector,
        );
        let result = retriever
            .retrieve_candidates(&invoice(), &subfamily_result(), "Concept matches sales-side expenses.")
            .await;
        assert!(matches!(result, Err(ClassificationError::NoCandidates { .. })));
    }
}
