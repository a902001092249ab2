//! Classifies a single invoice end to end, printing the phase trace.
//!
//! Reads `CLASSIFIER_LLM_API_KEY` via `AppConfig::from_env()`; when it is
//! absent the pipeline still runs, falling back to the top retrieved
//! candidate at every LLM-backed phase (spec.md §7 "No-LLM fallback").
//!
//!     cargo run --example classify_single_invoice

use std::sync::Arc;

use cfdi_sat_classifier::*;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = AppConfig::from_env();

    let catalog: SharedCatalog = Arc::new(SatAccountCatalog::new(vec![
        SatAccount {
            code: "600".to_string(),
            name: "Gastos".to_string(),
            description: String::new(),
            embedding: None,
        },
        SatAccount {
            code: "601".to_string(),
            name: "Gastos de Venta".to_string(),
            description: String::new(),
            embedding: None,
        },
        SatAccount {
            code: "601.48".to_string(),
            name: "Peajes".to_string(),
            description: "Tolls and road fees".to_string(),
            embedding: Some(deterministic_embedding("peajes casetas carretera")),
        },
        SatAccount {
            code: "601.20".to_string(),
            name: "Papeleria y Utiles de Oficina".to_string(),
            description: "Office supplies".to_string(),
            embedding: Some(deterministic_embedding("papeleria oficina utiles")),
        },
    ]));
    catalog.check_hierarchical_invariant()?;

    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
    let learning = Arc::new(LearningEngine::new(
        Arc::new(InMemoryLearningStore::default()),
        embedder.clone(),
    ));
    let context = Arc::new(ContextProvider::new(Arc::new(InMemoryContextStore::default()), None));
    let model_selector = Arc::new(ModelSelector::new());

    let llm: Arc<dyn LlmClient> = match &config.llm_api_key {
        Some(key) => Arc::new(HttpLlmClient::new(key.clone(), config.llm_base_url.clone(), config.roster.clone())),
        None => Arc::new(MockLlmClient::new(vec![])),
    };

    let pipeline = ClassificationPipeline {
        learning: learning.clone(),
        family_classifier: Arc::new(FamilyClassifier::new(llm.clone())),
        subfamily_classifier: Arc::new(SubfamilyClassifier::new(llm.clone(), catalog.clone())),
        retriever: Arc::new(CandidateRetriever::new(
            llm.clone(),
            embedder,
            catalog.clone(),
            RetrievalStrategy::Vector,
        )),
        selector: Arc::new(AccountSelector::new(
            config.llm_api_key.as_ref().map(|_| llm.clone()),
            catalog,
            learning,
            model_selector.clone(),
        )),
        context,
        model_selector,
    };

    let invoice = InvoiceSnapshot {
        emisor_rfc: "PASE010101AAA".to_string(),
        emisor_nombre: "PASE SERVICIOS ELECTRONICOS".to_string(),
        receptor_rfc: "TEN010101AAA".to_string(),
        receptor_nombre: "Tenant SA de CV".to_string(),
        receptor_uso_cfdi: "G03".to_string(),
        conceptos: vec![ConceptLine {
            descripcion: "RECARGA IAVE".to_string(),
            importe: 500.0,
            clave_prod_serv: Some("80141628".to_string()),
        }],
        total: 580.0,
        moneda: "MXN".to_string(),
        metodo_pago: PaymentMethod::Pue,
        forma_pago: None,
        tenant_id: 1,
        company_id: None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("-- {event:?}");
        }
    });

    let result = pipeline.classify_invoice(&invoice, Some(tx)).await?;
    println!(
        "{} ({}) confidence={:.2} status={:?} review={}",
        result.sat_account_code, result.sat_account_name, result.confidence_sat, result.status, result.requires_human_review
    );
    println!("{}", result.explanation_short);
    Ok(())
}
