//! Data model shared across every pipeline stage: the invoice snapshot fed
//! in, the catalog/context read-shared reference data, and the
//! classification result emitted out.

use chrono::{DateTime, Utc};
use rstructor::Instructor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ClassificationError, Result};

/// Canonical tenant identifier accepted at the crate boundary. Internal
/// functions take a resolved `i64`; this enum exists only where callers may
/// legitimately hand in either form (see DESIGN.md "Resolved Open
/// Questions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TenantRef {
    Id(i64),
    Slug(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Pago en una sola exhibicion (cash-like, settled immediately).
    Pue,
    /// Pago en parcialidades o diferido.
    Ppd,
    Other,
}

impl PaymentMethod {
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "PUE" => PaymentMethod::Pue,
            "PPD" => PaymentMethod::Ppd,
            _ => PaymentMethod::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptLine {
    pub descripcion: String,
    pub importe: f64,
    pub clave_prod_serv: Option<String>,
}

impl ConceptLine {
    pub fn percentage_of(&self, total: f64) -> f64 {
        if total <= 0.0 {
            0.0
        } else {
            (self.importe / total).clamp(0.0, 1.0)
        }
    }
}

/// The invoice dict handed to the core by the upstream CFDI parser,
/// represented as a tagged record instead of a dynamically-keyed dict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub emisor_rfc: String,
    pub emisor_nombre: String,
    pub receptor_rfc: String,
    pub receptor_nombre: String,
    pub receptor_uso_cfdi: String,
    pub conceptos: Vec<ConceptLine>,
    pub total: f64,
    pub moneda: String,
    pub metodo_pago: PaymentMethod,
    pub forma_pago: Option<String>,
    pub tenant_id: i64,
    pub company_id: Option<String>,
}

impl InvoiceSnapshot {
    /// spec.md §7.1: missing emisor/conceptos/total is a caller error, not a
    /// pipeline failure — the pipeline never receives such an invoice in
    /// practice, but we validate defensively at the boundary.
    pub fn validate(&self) -> Result<()> {
        if self.emisor_rfc.trim().is_empty() {
            return Err(ClassificationError::InvalidInvoice(
                "missing emisor.rfc".to_string(),
            ));
        }
        if self.conceptos.is_empty() {
            return Err(ClassificationError::InvalidInvoice(
                "invoice has no conceptos".to_string(),
            ));
        }
        if self.total <= 0.0 {
            return Err(ClassificationError::InvalidInvoice(
                "invoice total must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Direction detection used by the family classifier: RECIBIDA (purchase)
    /// when the tenant is the receiver, EMITIDA (sale) otherwise.
    pub fn is_purchase(&self, tenant_rfc: Option<&str>) -> bool {
        match tenant_rfc {
            Some(rfc) => rfc.eq_ignore_ascii_case(&self.receptor_rfc),
            None => true,
        }
    }

    /// The concept carrying the largest share of `total`.
    pub fn primary_concept(&self) -> &ConceptLine {
        self.conceptos
            .iter()
            .max_by(|a, b| a.importe.partial_cmp(&b.importe).unwrap())
            .expect("validate() guarantees at least one concepto")
    }

    /// Additional concepts whose share of `total` is at least `min_share`
    /// (spec.md §4.2B: "additional concepts >= 5% of total").
    pub fn secondary_concepts(&self, min_share: f64) -> Vec<&ConceptLine> {
        let primary_descr = self.primary_concept().descripcion.clone();
        self.conceptos
            .iter()
            .filter(|c| c.descripcion != primary_descr && c.percentage_of(self.total) >= min_share)
            .collect()
    }

    /// `"<provider> - <concept>"` string used as the embedding input by both
    /// the learning lookup and the learning writer (spec.md §4.L/§4.M).
    pub fn embedding_text(&self) -> String {
        format!(
            "{} - {}",
            self.emisor_nombre.trim(),
            self.primary_concept().descripcion.trim()
        )
    }
}

/// A single row of the read-only SAT chart-of-accounts catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatAccount {
    pub code: String,
    pub name: String,
    pub description: String,
    pub embedding: Option<Vec<f32>>,
}

impl SatAccount {
    pub fn family_code(&self) -> &str {
        &self.code[..3.min(self.code.len())]
    }

    pub fn is_leaf(&self) -> bool {
        self.code.contains('.')
    }

    pub fn is_family(&self) -> bool {
        self.code.len() == 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationType {
    Human,
    Auto,
    Corrected,
}

/// A row of `classification_learning_history` (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRow {
    pub tenant_id: i64,
    pub provider_rfc: String,
    pub provider_name: String,
    pub concept: String,
    pub embedding: Vec<f32>,
    pub sat_account_code: String,
    pub sat_account_name: String,
    pub family_code: String,
    pub validation_type: ValidationType,
    pub validated_by: String,
    pub session_id: Option<String>,
    pub original_prediction: Option<String>,
    pub original_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant business context (spec.md §3 "Company Context").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompanyContext {
    pub tenant_id: i64,
    /// The tenant's own RFC, used for invoice direction detection
    /// (spec.md §4.1 step iv: receptor == tenant_rfc -> RECIBIDA/purchase).
    pub tenant_rfc: Option<String>,
    pub industry: Option<String>,
    pub business_model: Option<String>,
    pub typical_expenses: Vec<String>,
    pub provider_treatments: HashMap<String, String>,
    pub capitalization_threshold: Option<f64>,
    pub policies: Option<serde_json::Value>,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub detail_level: String,
    pub auto_approve_threshold: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            detail_level: "standard".to_string(),
            auto_approve_threshold: 0.92,
        }
    }
}

impl CompanyContext {
    /// Industry/business-model keys map to prose descriptions used verbatim
    /// in prompts (spec.md §4.C).
    pub fn semantic_description(&self) -> String {
        let industry = self
            .industry
            .as_deref()
            .map(describe_industry)
            .unwrap_or_default();
        let model = self
            .business_model
            .as_deref()
            .map(describe_business_model)
            .unwrap_or_default();
        [industry, model]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn treatment_for(&self, rfc: &str) -> Option<&str> {
        self.provider_treatments.get(rfc).map(|s| s.as_str())
    }
}

fn describe_industry(key: &str) -> String {
    match key {
        "food_production" => {
            "The company manufactures or processes food products; raw materials and packaging \
             used in production should be treated as inventory/COGS inputs, not general expenses."
                .to_string()
        }
        "software consultancy" | "software_consultancy" => {
            "The company provides software development or consulting services; office supplies \
             and SaaS subscriptions are typical operating expenses."
                .to_string()
        }
        "services" => {
            "The company is a services business with few physical inventory needs; durable \
             equipment purchases above the capitalization threshold should be treated as fixed \
             assets."
                .to_string()
        }
        other => format!("The company operates in the '{other}' industry."),
    }
}

fn describe_business_model(key: &str) -> String {
    match key {
        "production" => {
            "The business model is production/manufacturing: inputs consumed directly in making \
             goods for sale belong in inventory accounts (NIF C-4), not operating expenses."
                .to_string()
        }
        other => format!("The business model is '{other}'."),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationStatus {
    Pending,
    AutoApplied,
    HumanCorrected,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassificationMetadata {
    pub hierarchical_phase1: Option<serde_json::Value>,
    pub hierarchical_phase2a: Option<serde_json::Value>,
    pub hierarchical_phase2b: Option<serde_json::Value>,
    pub hierarchical_phase3: Option<serde_json::Value>,
    pub selected_model: Option<String>,
    pub model_selection_reason: Option<String>,
    pub timings_ms: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeCandidate {
    pub code: String,
    pub name: String,
    pub family_code: String,
    pub score: f64,
    pub description: Option<String>,
}

/// The record this crate emits to its caller (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub sat_account_code: String,
    pub sat_account_name: String,
    pub family_code: String,
    pub confidence_sat: f64,
    pub confidence_family: f64,
    pub model_version: String,
    pub explanation_short: String,
    pub explanation_detail: String,
    pub alternative_candidates: Vec<AlternativeCandidate>,
    pub status: ClassificationStatus,
    pub requires_human_review: bool,
    pub metadata: ClassificationMetadata,
}

// ---------------------------------------------------------------------
// LLM-structured response payloads. Each derives `Instructor` so
// `T::schema().to_json()` produces the strict JSON Schema sent to the
// provider, following the teacher's `schema.rs`/`overrides.rs` pattern.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct FamilyClassificationResponse {
    #[llm(
        description = "One of the eight SAT family codes: 100 (Activo), 200 (Pasivo), 300 (Capital), 400 (Ingresos), 500 (Costos), 600 (Gastos), 700 (Resultado Integral de Financiamiento), 800 (Cuentas de Orden)."
    )]
    pub family_code: String,

    #[llm(description = "The human-readable family name in Spanish.")]
    pub family_name: String,

    #[llm(description = "Confidence in [0, 1], rounded to 2 decimal places.")]
    pub confidence: f64,

    #[llm(
        description = "At least 10 characters explaining the classification, citing the concept and business context used."
    )]
    pub reasoning: String,

    #[llm(
        description = "True if the declared uso_cfdi contradicts the business-semantic classification and was overridden."
    )]
    pub override_uso_cfdi: bool,

    #[llm(
        description = "Required when override_uso_cfdi is true: a short textual reason for the override."
    )]
    pub override_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyResult {
    pub family_code: String,
    pub family_name: String,
    pub confidence: f64,
    pub reasoning: String,
    pub override_uso_cfdi: bool,
    pub override_reason: Option<String>,
    pub requires_human_review: bool,
}

impl From<FamilyClassificationResponse> for FamilyResult {
    fn from(r: FamilyClassificationResponse) -> Self {
        let confidence = (r.confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0;
        Self {
            requires_human_review: confidence < 0.95,
            family_code: r.family_code,
            family_name: r.family_name,
            confidence,
            reasoning: r.reasoning,
            override_uso_cfdi: r.override_uso_cfdi,
            override_reason: r.override_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct AlternativeSubfamily {
    pub code: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct SubfamilyClassificationResponse {
    #[llm(description = "A 3-digit subfamily code sharing the family's first digit.")]
    pub subfamily_code: String,

    #[llm(description = "The human-readable subfamily name in Spanish.")]
    pub subfamily_name: String,

    #[llm(description = "Confidence in [0, 1], rounded to 2 decimal places.")]
    pub confidence: f64,

    #[llm(description = "Reasoning citing which hard rule or invoice feature drove the choice.")]
    pub reasoning: String,

    #[llm(description = "Up to 3 alternative subfamilies considered, most-likely first.")]
    #[serde(default)]
    pub alternative_subfamilies: Vec<AlternativeSubfamily>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubfamilyResult {
    pub subfamily_code: String,
    pub subfamily_name: String,
    pub confidence: f64,
    pub reasoning: String,
    pub alternative_subfamilies: Vec<AlternativeSubfamily>,
    pub requires_human_review: bool,
    pub hierarchically_valid: bool,
    pub in_shortlist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct CandidateRanking {
    pub code: String,
    #[llm(description = "Relevance score in [0, 1].")]
    pub score: f64,
    #[llm(description = "Brief justification for ranking this account this high.")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct CandidateRankingResponse {
    #[llm(description = "Ranked list of account codes, most relevant first.")]
    pub rankings: Vec<CandidateRanking>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub name: String,
    pub family_hint: String,
    pub score: f64,
    pub description: Option<String>,
    pub llm_reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Instructor)]
pub struct AccountSelectionResponse {
    #[llm(description = "The chosen leaf SAT account code, format NNN.NN.")]
    pub sat_account_code: String,

    #[llm(description = "Confidence in [0, 1], rounded to 2 decimal places.")]
    pub confidence: f64,

    #[llm(description = "Short one-line explanation suitable for display in a list.")]
    pub explanation_short: String,

    #[llm(
        description = "Detailed explanation citing the candidates considered and why this one won."
    )]
    pub explanation_detail: String,
}
