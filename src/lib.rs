//! # CFDI SAT Classifier
//!
//! A hierarchical, multi-phase classification engine that maps Mexican
//! CFDI electronic invoices to SAT chart-of-accounts codes.
//!
//! ## Pipeline
//!
//! `Learning Lookup -> Model Selector -> Family Classifier -> Model
//! Selector -> Subfamily Classifier -> Candidate Retriever -> Account
//! Selector`, threading each phase's reasoning forward and short-circuiting
//! whenever a prior validated classification is close enough to reuse.
//!
//! ## Example
//!
//! ```no_run
//! use cfdi_sat_classifier::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<()> {
//! let catalog: SharedCatalog = Arc::new(SatAccountCatalog::new(vec![]));
//! let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
//! let learning = Arc::new(LearningEngine::new(
//!     Arc::new(InMemoryLearningStore::default()),
//!     embedder.clone(),
//! ));
//! let context = Arc::new(ContextProvider::new(Arc::new(InMemoryContextStore::default()), None));
//! let model_selector = Arc::new(ModelSelector::new());
//!
//! let pipeline = ClassificationPipeline {
//!     learning: learning.clone(),
//!     family_classifier: Arc::new(FamilyClassifier::new(Arc::new(MockLlmClient::new(vec![])))),
//!     subfamily_classifier: Arc::new(SubfamilyClassifier::new(
//!         Arc::new(MockLlmClient::new(vec![])),
//!         catalog.clone(),
//!     )),
//!     retriever: Arc::new(CandidateRetriever::new(
//!         Arc::new(MockLlmClient::new(vec![])),
//!         embedder,
//!         catalog.clone(),
//!         RetrievalStrategy::Vector,
//!     )),
//!     selector: Arc::new(AccountSelector::new(None, catalog, learning, model_selector.clone())),
//!     context,
//!     model_selector,
//! };
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod consistency;
pub mod context;
pub mod correction_api;
pub mod embedding;
pub mod error;
pub mod family;
pub mod fiscal;
pub mod learning;
pub mod llm;
pub mod model_selector;
pub mod pipeline;
pub mod retrieval;
pub mod schema;
pub mod selector;
pub mod subfamily;

#[cfg(feature = "storage")]
pub mod storage;

pub use catalog::{SatAccountCatalog, SharedCatalog};
pub use config::AppConfig;
pub use consistency::{check_selection, constraint_mode, ConstraintMode, ConsistencyCheck};
pub use context::{
    Correction, ContextProvider, ContextStore, ExampleCache, FamilyExample, InMemoryContextStore,
};
pub use correction_api::{CorrectionApi, LearningStats};
pub use embedding::{cosine_similarity, deterministic_embedding, DeterministicEmbedder, Embedder, HttpEmbedder};
pub use error::{ClassificationError, Result};
pub use family::FamilyClassifier;
pub use fiscal::{DepreciationRate, FiscalRegulation, FiscalRegulationIndex};
pub use learning::{InMemoryLearningStore, LearnedMatch, LearningEngine, LearningStore, THETA_AUTO, THETA_DISPLAY};
pub use llm::client::{HttpLlmClient, LlmClient, ModelRoster, MockLlmClient};
pub use llm::types::{ModelTier, PipelineEvent};
pub use model_selector::{ModelSelection, ModelSelector};
pub use pipeline::ClassificationPipeline;
pub use retrieval::{CandidateRetriever, RetrievalStrategy};
pub use schema::*;
pub use selector::AccountSelector;
pub use subfamily::SubfamilyClassifier;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_catalog() -> SharedCatalog {
        Arc::new(SatAccountCatalog::new(vec![
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
        ]))
    }

    fn toll_invoice() -> InvoiceSnapshot {
        InvoiceSnapshot {
            emisor_rfc: "PASE010101AAA".to_string(),
            emisor_nombre: "PASE SERVICIOS ELECTRONICOS".to_string(),
            receptor_rfc: "TEN010101AAA".to_string(),
            receptor_nombre: "Tenant SA".to_string(),
            receptor_uso_cfdi: "G03".to_string(),
            conceptos: vec![
                ConceptLine {
                    descripcion: "RECARGA IDMX".to_string(),
                    importe: 336.21,
                    clave_prod_serv: Some("80141628".to_string()),
                },
                ConceptLine {
                    descripcion: "COMISION".to_string(),
                    importe: 8.62,
                    clave_prod_serv: None,
                },
            ],
            total: 344.83,
            moneda: "MXN".to_string(),
            metodo_pago: PaymentMethod::Pue,
            forma_pago: None,
            tenant_id: 1,
            company_id: None,
        }
    }

    /// spec.md §8 scenario 2: picks the larger concept for the embedding
    /// text, ignoring the small commission line.
    #[tokio::test]
    async fn toll_top_up_vector_retrieval_finds_peajes() {
        let catalog = sample_catalog();
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
        let retriever = CandidateRetriever::new(
            Arc::new(MockLlmClient::new(vec![])),
            embedder,
            catalog,
            RetrievalStrategy::Vector,
        );
        let subfamily_result = SubfamilyResult {
            subfamily_code: "601".to_string(),
            subfamily_name: "Gastos de Venta".to_string(),
            confidence: 0.9,
            reasoning: "test".to_string(),
            alternative_subfamilies: Vec::new(),
            requires_human_review: false,
            hierarchically_valid: true,
            in_shortlist: true,
        };
        let candidates = retriever
            .retrieve_candidates(&toll_invoice(), &subfamily_result, "Toll concept, sales-side expense.")
            .await
            .unwrap();
        assert_eq!(candidates[0].code, "601.48");
    }

    /// spec.md §8: an end-to-end classification with no learning history
    /// and no LLM key still returns a hierarchically-valid leaf account.
    #[tokio::test]
    async fn full_pipeline_no_llm_key_yields_consistent_leaf() {
        let catalog = sample_catalog();
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
        let learning = Arc::new(LearningEngine::new(
            Arc::new(InMemoryLearningStore::default()),
            embedder.clone(),
        ));
        let context = Arc::new(ContextProvider::new(
            Arc::new(InMemoryContextStore::default()),
            None,
        ));
        let model_selector = Arc::new(ModelSelector::new());

        let pipeline = ClassificationPipeline {
            learning: learning.clone(),
            family_classifier: Arc::new(FamilyClassifier::new(Arc::new(MockLlmClient::new(vec![])))),
            subfamily_classifier: Arc::new(SubfamilyClassifier::new(
                Arc::new(MockLlmClient::new(vec![])),
                catalog.clone(),
            )),
            retriever: Arc::new(CandidateRetriever::new(
                Arc::new(MockLlmClient::new(vec![])),
                embedder,
                catalog.clone(),
                RetrievalStrategy::Vector,
            )),
            selector: Arc::new(AccountSelector::new(None, catalog, learning, model_selector.clone())),
            context,
            model_selector,
        };

        let result = pipeline.classify_invoice(&toll_invoice(), None).await.unwrap();
        assert_eq!(result.sat_account_code[..1].chars().next(), result.family_code.chars().next());
        assert!(result.sat_account_code.contains('.'));
    }
}
