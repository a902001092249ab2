//! Subfamily Classifier (§4.2A): narrows a family to one 3-digit subfamily,
//! with hierarchical + shortlist validation and a hard-coded fallback
//! mapping when the family classifier was unconfident.
//!
//! Grounded on the teacher's `src/llm/prompts.rs` (long `const &str` prompt
//! blocks assembled with `format!`) and `extractor.rs`'s
//! parse-then-validate shape.

use std::sync::Arc;

use crate::catalog::SharedCatalog;
use crate::error::Result;
use crate::llm::client::LlmClient;
use crate::llm::json::parse_json_object;
use crate::llm::prompts::{build_subfamily_prompt, SYSTEM_PROMPT_SUBFAMILY};
use crate::llm::types::ModelTier;
use crate::schema::{
    CompanyContext, FamilyResult, InvoiceSnapshot, SubfamilyClassificationResponse, SubfamilyResult,
};
use rstructor::SchemaType;

/// Below this family confidence, the LLM call is skipped entirely in favor
/// of the hard-coded fallback mapping (spec.md §4.2A "Skip policy").
const FAMILY_CONFIDENCE_SKIP_THRESHOLD: f64 = 0.80;
const SUBFAMILY_REVIEW_THRESHOLD: f64 = 0.90;

pub struct SubfamilyClassifier {
    llm: Arc<dyn LlmClient>,
    catalog: SharedCatalog,
}

impl SubfamilyClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: SharedCatalog) -> Self {
        Self { llm, catalog }
    }

    pub async fn classify_subfamily(
        &self,
        invoice: &InvoiceSnapshot,
        family_result: &FamilyResult,
        context: &CompanyContext,
    ) -> SubfamilyResult {
        let shortlist = self.catalog.subfamilies_of_family(&family_result.family_code);
        let shortlist_codes: Vec<String> = shortlist.iter().map(|a| a.code.clone()).collect();

        if family_result.confidence < FAMILY_CONFIDENCE_SKIP_THRESHOLD {
            return hard_coded_fallback(&family_result.family_code, &shortlist_codes);
        }

        let options: Vec<(String, String)> = shortlist
            .iter()
            .map(|a| (a.code.clone(), a.name.clone()))
            .collect();
        let prompt = build_subfamily_prompt(
            invoice,
            &family_result.family_code,
            &family_result.family_name,
            family_result.confidence,
            &family_result.reasoning,
            context,
            &options,
        );

        match self.call(&prompt, &shortlist_codes).await {
            Ok(result) => result,
            Err(_) => hard_coded_fallback(&family_result.family_code, &shortlist_codes),
        }
    }

    async fn call(&self, prompt: &str, shortlist_codes: &[String]) -> Result<SubfamilyResult> {
        let schema = SubfamilyClassificationResponse::schema().to_json();
        let raw = self
            .llm
            .generate_json(ModelTier::Cheap, SYSTEM_PROMPT_SUBFAMILY, prompt, schema)
            .await?;
        let parsed: SubfamilyClassificationResponse = parse_json_object(&raw)?;

        let family_digit = shortlist_codes.first().and_then(|c| c.chars().next());
        let hierarchically_valid = family_digit
            .map(|d| parsed.subfamily_code.chars().next() == Some(d))
            .unwrap_or(true);
        let in_shortlist = shortlist_codes.iter().any(|c| c == &parsed.subfamily_code);
        let confidence = (parsed.confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0;

        Ok(SubfamilyResult {
            subfamily_code: parsed.subfamily_code,
            subfamily_name: parsed.subfamily_name,
            confidence,
            reasoning: parsed.reasoning,
            alternative_subfamilies: parsed.alternative_subfamilies,
            requires_human_review: confidence < SUBFAMILY_REVIEW_THRESHOLD || !hierarchically_valid,
            hierarchically_valid,
            in_shortlist,
        })
    }
}

/// spec.md §4.2A "Skip policy": a deterministic family -> likely-subfamily
/// mapping, used when the family phase itself was unconfident.
fn hard_coded_fallback(family_code: &str, shortlist_codes: &[String]) -> SubfamilyResult {
    let default_subfamily = match family_code {
        "100" => "115",
        "200" => "201",
        "300" => "301",
        "400" => "401",
        "500" => "501",
        "600" => "601",
        "700" => "701",
        "800" => "801",
        _ => "601",
    };
    let chosen = shortlist_codes
        .iter()
        .find(|c| c.as_str() == default_subfamily)
        .cloned()
        .or_else(|| shortlist_codes.first().cloned())
        .unwrap_or_else(|| default_subfamily.to_string());

    SubfamilyResult {
        subfamily_code: chosen.clone(),
        subfamily_name: "Pending catalog lookup".to_string(),
        confidence: 0.0,
        reasoning: format!(
            "Family confidence was below {FAMILY_CONFIDENCE_SKIP_THRESHOLD}; used the default \
             subfamily mapping for family {family_code}."
        ),
        alternative_subfamilies: Vec::new(),
        requires_human_review: true,
        hierarchically_valid: chosen.starts_with(&family_code[..1.min(family_code.len())]),
        in_shortlist: shortlist_codes.contains(&chosen),
    }
}
