//! Seeds a small learning history, then batch-applies it to a set of
//! pending (provider, concept) pairs without invoking any LLM (spec.md §4.L
//! "batch auto-apply").
//!
//!     cargo run --example batch_auto_apply_demo

use std::sync::Arc;

use cfdi_sat_classifier::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
    let learning = Arc::new(LearningEngine::new(
        Arc::new(InMemoryLearningStore::default()),
        embedder.clone(),
    ));
    let context = Arc::new(ContextProvider::new(Arc::new(InMemoryContextStore::default()), None));
    let api = CorrectionApi::new(learning.clone(), context);

    learning
        .save(
            1,
            "PASE010101AAA",
            "PASE SERVICIOS ELECTRONICOS",
            "RECARGA IAVE",
            "601.48",
            "Peajes",
            "600",
            ValidationType::Human,
            "analyst@example.com",
            None,
            None,
            None,
        )
        .await?;

    learning
        .save(
            1,
            "OFM010101AAA",
            "OFICINA MAX",
            "PAPELERIA Y UTILES",
            "601.20",
            "Papeleria y Utiles de Oficina",
            "600",
            ValidationType::Human,
            "analyst@example.com",
            None,
            None,
            None,
        )
        .await?;

    let pending = vec![
        ("PASE SERVICIOS ELECTRONICOS", "RECARGA IAVE", ClassificationStatus::Pending),
        ("OFICINA MAX", "PAPELERIA Y UTILES", ClassificationStatus::Pending),
        ("DESCONOCIDO SA", "SERVICIO NUNCA VISTO", ClassificationStatus::Pending),
    ];

    let applied = api.batch_auto_apply(1, pending).await?;
    println!("auto-applied {} of 3 pending invoices:", applied.len());
    for (key, result) in &applied {
        println!(
            "  {key} -> {} ({}) confidence={:.2}",
            result.sat_account_code, result.sat_account_name, result.confidence_sat
        );
    }

    Ok(())
}
