//! Prompt templates for each LLM-backed pipeline stage. Structure mirrors
//! the teacher's `src/llm/prompts.rs`: a fixed system prompt per stage plus
//! a builder function that interpolates the per-call context.

use crate::schema::{CompanyContext, InvoiceSnapshot};

pub const SYSTEM_PROMPT_FAMILY: &str = "\
You are an expert Mexican accountant classifying CFDI invoices into one of \
the eight top-level SAT chart-of-accounts families:
  100 Activo, 200 Pasivo, 300 Capital, 400 Ingresos, 500 Costos, \
600 Gastos, 700 Resultado Integral de Financiamiento, 800 Cuentas de Orden.

Classify by business substance, not by the declared uso_cfdi alone: if the \
concept description and business context clearly contradict the uso_cfdi, \
override it and explain why. Durable goods above the tenant's capitalization \
threshold belong in Activo (fixed assets), not Gastos, per NIF C-6. Raw \
materials and packaging consumed directly in production belong in \
inventory-linked Costos, per NIF C-4, for manufacturing tenants.";

pub fn build_family_prompt(invoice: &InvoiceSnapshot, context: &CompanyContext) -> String {
    let concept = invoice.primary_concept();
    let secondary: Vec<String> = invoice
        .secondary_concepts(0.05)
        .iter()
        .map(|c| format!("  - {} (${:.2})", c.descripcion, c.importe))
        .collect();
    let direction = if invoice.is_purchase(context.tenant_rfc.as_deref()) {
        "RECIBIDA (purchase: receptor is this tenant)"
    } else {
        "EMITIDA (sale: emisor is this tenant)"
    };

    format!(
        "Provider: {provider}\n\
         Primary concept: {descr} (${amount:.2} of ${total:.2} total, {currency})\n\
         Additional concepts:\n{secondary}\n\
         Payment method: {payment:?}\n\
         Declared uso_cfdi: {uso}\n\
         Invoice direction: {direction}\n\
         \n\
         Business context: {context_desc}\n\
         Known treatment for this provider: {treatment}\n\
         \n\
         Return the single best-fitting family.",
        provider = invoice.emisor_nombre,
        descr = concept.descripcion,
        amount = concept.importe,
        total = invoice.total,
        currency = invoice.moneda,
        secondary = if secondary.is_empty() {
            "  (none)".to_string()
        } else {
            secondary.join("\n")
        },
        payment = invoice.metodo_pago,
        uso = invoice.receptor_uso_cfdi,
        context_desc = context.semantic_description(),
        treatment = context
            .treatment_for(&invoice.emisor_rfc)
            .unwrap_or("no prior history"),
    )
}

pub const SYSTEM_PROMPT_SUBFAMILY: &str = "\
You are refining a SAT family classification down to one of its 3-digit \
subfamilies. Hard rules that override general similarity:
  - Almacenamiento, logistica, fletes y paqueteria -> subfamily 602, never \
603 (services) even when billed by a freight company.
  - PUE payment method invoices are never classified under subfamily 120 \
(cuentas por cobrar), since PUE settles immediately.
  - Combustibles y lubricantes para vehiculos -> subfamily 605 unless the \
company context marks transportation as its primary line of business, in \
which case prefer the costos-de-venta subfamily instead.
Pick the single best subfamily and list up to 3 alternatives you rejected.";

#[allow(clippy::too_many_arguments)]
pub fn build_subfamily_prompt(
    invoice: &InvoiceSnapshot,
    family_code: &str,
    family_name: &str,
    family_confidence: f64,
    family_reasoning: &str,
    context: &CompanyContext,
    subfamily_options: &[(String, String)],
) -> String {
    let concept = invoice.primary_concept();
    let options: Vec<String> = subfamily_options
        .iter()
        .map(|(code, name)| format!("  {code} - {name}"))
        .collect();

    format!(
        "Family: {family_code} ({family_name}, confidence {family_confidence:.2})\n\
         Phase 1 reasoning: {family_reasoning}\n\
         Concept: {descr}\n\
         Provider: {provider}\n\
         Payment method: {payment:?}\n\
         Business context: {context_desc}\n\
         Candidate subfamilies:\n{options}",
        descr = concept.descripcion,
        provider = invoice.emisor_nombre,
        payment = invoice.metodo_pago,
        context_desc = context.semantic_description(),
        options = options.join("\n"),
    )
}

pub const SYSTEM_PROMPT_CANDIDATE_RANKING: &str = "\
You are ranking leaf SAT accounts by relevance to an invoice concept. Score \
each candidate in [0, 1] based on semantic fit with the concept description, \
not on account code order. Only rank accounts from the provided list — never \
invent a code.";

pub fn build_candidate_ranking_prompt(
    invoice: &InvoiceSnapshot,
    candidates: &[(String, String, Option<String>)],
    phase2a_reasoning: &str,
) -> String {
    let concept = invoice.primary_concept();
    let listing: Vec<String> = candidates
        .iter()
        .map(|(code, name, descr)| {
            format!(
                "  {code} - {name}{}",
                descr.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
            )
        })
        .collect();

    format!(
        "Concept: {descr}\nProvider: {provider}\n\
         Phase 2A reasoning: {phase2a_reasoning}\n\
         Candidates:\n{listing}",
        descr = concept.descripcion,
        provider = invoice.emisor_nombre,
        listing = listing.join("\n"),
    )
}

pub const SYSTEM_PROMPT_ACCOUNT_SELECTION: &str = "\
You are making the final SAT account selection from a shortlist of leaf \
accounts. Choose exactly one code from the shortlist. Explain briefly (for \
display in a list) and in detail (citing the runner-up candidates and why \
they lost).";

pub fn build_account_selection_prompt(
    invoice: &InvoiceSnapshot,
    shortlist: &[(String, String, f64)],
    similar_corrections: &[String],
    subfamily_reasoning: &str,
) -> String {
    let concept = invoice.primary_concept();
    let listing: Vec<String> = shortlist
        .iter()
        .map(|(code, name, score)| format!("  {code} - {name} (score {score:.2})"))
        .collect();
    let history = if similar_corrections.is_empty() {
        "  (none)".to_string()
    } else {
        similar_corrections
            .iter()
            .map(|c| format!("  - {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Concept: {descr} (${amount:.2})\nProvider: {provider}\n\
         Phase 2A reasoning: {subfamily_reasoning}\n\
         Shortlist:\n{listing}\n\
         Similar past human corrections:\n{history}",
        descr = concept.descripcion,
        amount = concept.importe,
        provider = invoice.emisor_nombre,
        listing = listing.join("\n"),
    )
}
