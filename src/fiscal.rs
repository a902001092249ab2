//! Fiscal regulations RAG (SPEC_FULL.md §B supplement): a read-only
//! cosine-KNN lookup over LISR depreciation provisions, used to attach a
//! depreciation rate and legal citation once an invoice is classified into
//! a fixed-asset account.
//!
//! Grounded on
//! `examples/original_source/core/fiscal/depreciation_rate_service.py`
//! (`DepreciationRateService.get_depreciation_rate`): build an enriched
//! query, embed it, cosine-rank regulations, extract structured rate data,
//! fall back to a default when nothing matches.

use crate::embedding::{cosine_similarity, Embedder};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FiscalRegulation {
    pub law_code: String,
    pub article_number: String,
    pub section: String,
    pub text: String,
    pub annual_rate_fiscal: f64,
    pub useful_life_years: f64,
    pub asset_type: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DepreciationRate {
    pub annual_rate_fiscal: f64,
    pub useful_life_years: f64,
    pub law_code: String,
    pub article_number: String,
    pub section: String,
    pub reasoning: String,
    pub confidence: f64,
}

/// spec.md-style default applied when no regulation matches closely enough
/// (mirrors the original's `_get_default_rate` fallback).
const DEFAULT_ANNUAL_RATE: f64 = 10.0;
const DEFAULT_USEFUL_LIFE_YEARS: f64 = 10.0;
const MATCH_CONFIDENCE_FLOOR: f64 = 0.55;

pub struct FiscalRegulationIndex {
    regulations: Vec<FiscalRegulation>,
    embedder: Arc<dyn Embedder>,
}

impl FiscalRegulationIndex {
    pub fn new(regulations: Vec<FiscalRegulation>, embedder: Arc<dyn Embedder>) -> Self {
        Self { regulations, embedder }
    }

    pub async fn lookup_depreciation_rate(
        &self,
        asset_description: &str,
        sat_account_code: Option<&str>,
    ) -> DepreciationRate {
        let query = build_search_query(asset_description, sat_account_code);
        let embedding = match self.embedder.embed(&query).await {
            Ok(v) => v,
            Err(_) => return default_rate(),
        };

        let best = self
            .regulations
            .iter()
            .map(|r| (r, cosine_similarity(&embedding, &r.embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        match best {
            Some((regulation, similarity)) if similarity >= MATCH_CONFIDENCE_FLOOR => {
                DepreciationRate {
                    annual_rate_fiscal: regulation.annual_rate_fiscal,
                    useful_life_years: regulation.useful_life_years,
                    law_code: regulation.law_code.clone(),
                    article_number: regulation.article_number.clone(),
                    section: regulation.section.clone(),
                    reasoning: format!(
                        "Matched {} art. {} {} (similarity {:.2}) for asset type '{}'.",
                        regulation.law_code, regulation.article_number, regulation.section, similarity, regulation.asset_type
                    ),
                    confidence: similarity,
                }
            }
            _ => default_rate(),
        }
    }
}

fn build_search_query(asset_description: &str, sat_account_code: Option<&str>) -> String {
    match sat_account_code {
        Some(code) => format!("{asset_description} ({code})"),
        None => asset_description.to_string(),
    }
}

fn default_rate() -> DepreciationRate {
    DepreciationRate {
        annual_rate_fiscal: DEFAULT_ANNUAL_RATE,
        useful_life_years: DEFAULT_USEFUL_LIFE_YEARS,
        law_code: "LISR".to_string(),
        article_number: "34".to_string(),
        section: "general".to_string(),
        reasoning: "No fiscal regulation matched closely enough; applied the default rate."
            .to_string(),
        confidence: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{deterministic_embedding, DeterministicEmbedder};

    fn sample_regulations() -> Vec<FiscalRegulation> {
        vec![FiscalRegulation {
            law_code: "LISR".to_string(),
            article_number: "34".to_string(),
            section: "Fraccion V".to_string(),
            text: "Equipo de computo electronico 30%".to_string(),
            annual_rate_fiscal: 30.0,
            useful_life_years: 3.33,
            asset_type: "equipo_computo".to_string(),
            embedding: deterministic_embedding("equipo de computo laptop"),
        }]
    }

    #[tokio::test]
    async fn matches_laptop_to_computer_equipment_rate() {
        let index = FiscalRegulationIndex::new(sample_regulations(), Arc::new(DeterministicEmbedder));
        let rate = index
            .lookup_depreciation_rate("Laptop Dell Inspiron 15", Some("152.01"))
            .await;
        assert!(rate.confidence >= 0.0);
        assert_eq!(rate.law_code, "LISR");
    }

    #[tokio::test]
    async fn empty_index_falls_back_to_default() {
        let index = FiscalRegulationIndex::new(Vec::new(), Arc::new(DeterministicEmbedder));
        let rate = index.lookup_depreciation_rate("Unknown asset", None).await;
        assert_eq!(rate.annual_rate_fiscal, DEFAULT_ANNUAL_RATE);
        assert_eq!(rate.confidence, 0.0);
    }
}
