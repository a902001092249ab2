//! Adaptive cheap-vs-strong model selection (spec.md §4.S), grounded on the
//! teacher's capped/normalized factor-scoring shape in `src/seasonality.rs`
//! (`get_profile_weights`), repurposed here as additive capped scoring
//! instead of weight normalization.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::llm::types::ModelTier;
use crate::schema::{Candidate, InvoiceSnapshot};

const SIMILARITY_THRESHOLD: f64 = 0.90;
const GAP_THRESHOLD: f64 = 0.05;
const LARGE_AMOUNT_THRESHOLD: f64 = 50_000.0;
const COMPLEXITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub tier: ModelTier,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ModelSelector {
    family_calls: AtomicU64,
    account_cheap_calls: AtomicU64,
    account_strong_calls: AtomicU64,
}

impl ModelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The family phase always gets the cheap model: only 8 outputs and the
    /// subfamily stage refines further, so the stakes of a wrong pick here
    /// are low (spec.md §4.S).
    pub fn select_for_family(&self) -> ModelSelection {
        self.family_calls.fetch_add(1, Ordering::Relaxed);
        ModelSelection {
            tier: ModelTier::Cheap,
            reason: "family phase always uses the cheap model".to_string(),
        }
    }

    /// Additive capped complexity score over the account-selection phase.
    /// Each factor is independently capped before summing; the sum is then
    /// clamped to `[0, 1]`.
    pub fn select_for_account(
        &self,
        invoice: &InvoiceSnapshot,
        candidates: &[Candidate],
        provider_correction_count: u32,
    ) -> ModelSelection {
        let mut score = 0.0f64;
        let mut reasons = Vec::new();

        if let Some(top) = candidates.first() {
            if top.score < SIMILARITY_THRESHOLD {
                score += 0.4;
                reasons.push("top candidate similarity below 0.90");
            }
        }

        if candidates.len() >= 2 {
            let gap = candidates[0].score - candidates[1].score;
            if gap < GAP_THRESHOLD {
                score += 0.3;
                reasons.push("top-1/top-2 candidate gap below 0.05");
            }
        }

        let concept = invoice.primary_concept();
        let conjunctions = count_conjunctions(&concept.descripcion);
        if conjunctions >= 2 {
            score += 0.3;
            reasons.push("concept description has 2+ conjunctions");
        }

        if concept.descripcion.split_whitespace().count() < 3 {
            score += 0.2;
            reasons.push("concept description under 3 words");
        }

        if invoice.total > LARGE_AMOUNT_THRESHOLD {
            score += 0.4;
            reasons.push("invoice total exceeds 50,000");
        }

        if provider_correction_count >= 2 {
            score += 0.5;
            reasons.push("provider corrected 2+ times historically");
        }

        score = score.clamp(0.0, 1.0);

        let tier = if score < COMPLEXITY_THRESHOLD {
            self.account_cheap_calls.fetch_add(1, Ordering::Relaxed);
            ModelTier::Cheap
        } else {
            self.account_strong_calls.fetch_add(1, Ordering::Relaxed);
            ModelTier::Strong
        };

        let reason = if reasons.is_empty() {
            format!("complexity score {score:.2} below threshold")
        } else {
            format!("complexity score {score:.2}: {}", reasons.join(", "))
        };

        ModelSelection { tier, reason }
    }

    pub fn usage_counts(&self) -> (u64, u64, u64) {
        (
            self.family_calls.load(Ordering::Relaxed),
            self.account_cheap_calls.load(Ordering::Relaxed),
            self.account_strong_calls.load(Ordering::Relaxed),
        )
    }
}

fn count_conjunctions(text: &str) -> usize {
    let lower = text.to_lowercase();
    ["y ", " e ", "con ", "mas ", "+"]
        .iter()
        .map(|tok| lower.matches(tok).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConceptLine, PaymentMethod};

    fn invoice_with(descripcion: &str, total: f64) -> InvoiceSnapshot {
        InvoiceSnapshot {
            emisor_rfc: "GET130827SN7".to_string(),
            emisor_nombre: "GARIN ETIQUETAS".to_string(),
            receptor_rfc: "TEN010101AAA".to_string(),
            receptor_nombre: "Tenant SA".to_string(),
            receptor_uso_cfdi: "G03".to_string(),
            conceptos: vec![ConceptLine {
                descripcion: descripcion.to_string(),
                importe: total,
                clave_prod_serv: None,
            }],
            total,
            moneda: "MXN".to_string(),
            metodo_pago: PaymentMethod::Pue,
            forma_pago: None,
            tenant_id: 1,
            company_id: None,
        }
    }

    #[test]
    fn family_phase_is_always_cheap() {
        let selector = ModelSelector::new();
        assert_eq!(selector.select_for_family().tier, ModelTier::Cheap);
    }

    #[test]
    fn clear_cheap_candidate_stays_cheap() {
        let selector = ModelSelector::new();
        let invoice = invoice_with("Peajes de carretera", 300.0);
        let candidates = vec![
            Candidate {
                code: "601.48".to_string(),
                name: "Peajes".to_string(),
                family_hint: "600".to_string(),
                score: 0.97,
                description: None,
                llm_reasoning: None,
            },
            Candidate {
                code: "601.49".to_string(),
                name: "Otro".to_string(),
                family_hint: "600".to_string(),
                score: 0.40,
                description: None,
                llm_reasoning: None,
            },
        ];
        let selection = selector.select_for_account(&invoice, &candidates, 0);
        assert_eq!(selection.tier, ModelTier::Cheap);
    }

    #[test]
    fn ambiguous_high_value_invoice_escalates() {
        let selector = ModelSelector::new();
        let invoice = invoice_with("Laptop", 60_000.0);
        let candidates = vec![
            Candidate {
                code: "152.01".to_string(),
                name: "Equipo de computo".to_string(),
                family_hint: "100".to_string(),
                score: 0.70,
                description: None,
                llm_reasoning: None,
            },
            Candidate {
                code: "613.01".to_string(),
                name: "Papeleria y articulos de oficina".to_string(),
                family_hint: "600".to_string(),
                score: 0.68,
                description: None,
                llm_reasoning: None,
            },
        ];
        let selection = selector.select_for_account(&invoice, &candidates, 3);
        assert_eq!(selection.tier, ModelTier::Strong);
    }
}
