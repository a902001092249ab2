//! Context Provider (§4.C): tenant business context, similar-correction
//! RAG, and Redis-cached few-shot examples.
//!
//! Grounded on the teacher's lazy-singleton discipline (`GeminiClient::new`
//! holding a reusable `reqwest::Client`) extended to an optional cache
//! handle so cache absence degrades to direct-store reads (spec.md §7.6).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::schema::CompanyContext;

/// A prior human correction, surfaced as RAG context for the account
/// selector (spec.md §4.3 "similar prior corrections").
#[derive(Debug, Clone)]
pub struct Correction {
    pub provider_rfc: String,
    pub concept: String,
    pub sat_account_code: String,
    pub sat_account_name: String,
}

/// A compressed few-shot example for the family classifier's retry branch
/// (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct FamilyExample {
    pub description: String,
    pub family_code: String,
    pub family_name: String,
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn load_context(&self, tenant_id: i64) -> Result<Option<CompanyContext>>;
    async fn corrections_for(&self, tenant_id: i64, provider_rfc: Option<&str>) -> Result<Vec<Correction>>;
    async fn family_examples(&self, tenant_id: i64) -> Result<Vec<FamilyExample>>;
}

/// In-memory context store, also the `storage`-feature-disabled default.
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: parking_lot::Mutex<HashMap<i64, CompanyContext>>,
    corrections: parking_lot::Mutex<HashMap<i64, Vec<Correction>>>,
    examples: parking_lot::Mutex<HashMap<i64, Vec<FamilyExample>>>,
}

impl InMemoryContextStore {
    pub fn set_context(&self, tenant_id: i64, context: CompanyContext) {
        self.contexts.lock().insert(tenant_id, context);
    }

    pub fn add_correction(&self, tenant_id: i64, correction: Correction) {
        self.corrections.lock().entry(tenant_id).or_default().push(correction);
    }

    pub fn add_example(&self, tenant_id: i64, example: FamilyExample) {
        self.examples.lock().entry(tenant_id).or_default().push(example);
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load_context(&self, tenant_id: i64) -> Result<Option<CompanyContext>> {
        Ok(self.contexts.lock().get(&tenant_id).cloned())
    }

    async fn corrections_for(&self, tenant_id: i64, provider_rfc: Option<&str>) -> Result<Vec<Correction>> {
        let all = self.corrections.lock().get(&tenant_id).cloned().unwrap_or_default();
        Ok(match provider_rfc {
            Some(rfc) => all.into_iter().filter(|c| c.provider_rfc == rfc).collect(),
            None => all,
        })
    }

    async fn family_examples(&self, tenant_id: i64) -> Result<Vec<FamilyExample>> {
        Ok(self.examples.lock().get(&tenant_id).cloned().unwrap_or_default())
    }
}

/// Abstracts the optional Redis few-shot example cache. Absence (or any
/// error) degrades to reading straight from the `ContextStore`, per
/// spec.md §7.6 "degrade silently".
#[async_trait]
pub trait ExampleCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<FamilyExample>>;
    async fn set(&self, key: &str, value: Vec<FamilyExample>);
}

pub const FEW_SHOT_CACHE_TTL_SECS: u64 = 3600;
const FEW_SHOT_LIMIT: usize = 5;

pub struct ContextProvider {
    store: Arc<dyn ContextStore>,
    cache: Option<Arc<dyn ExampleCache>>,
}

impl ContextProvider {
    pub fn new(store: Arc<dyn ContextStore>, cache: Option<Arc<dyn ExampleCache>>) -> Self {
        Self { store, cache }
    }

    pub async fn get_context(&self, tenant_id: i64) -> Option<CompanyContext> {
        self.store.load_context(tenant_id).await.ok().flatten()
    }

    pub async fn get_similar_corrections(
        &self,
        tenant_id: i64,
        provider_rfc: Option<&str>,
        limit: usize,
    ) -> Vec<Correction> {
        self.store
            .corrections_for(tenant_id, provider_rfc)
            .await
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .collect()
    }

    /// Up to `limit` (default 5) compressed few-shot examples, Redis-cached
    /// for 3600s with description-based dedup (spec.md §4.C).
    pub async fn get_family_classification_examples(
        &self,
        tenant_id: i64,
    ) -> Vec<FamilyExample> {
        let cache_key = format!("family_examples:{tenant_id}");
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&cache_key).await {
                return cached;
            }
        }

        let examples = self.store.family_examples(tenant_id).await.unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<FamilyExample> = examples
            .into_iter()
            .filter(|e| seen.insert(e.description.clone()))
            .take(FEW_SHOT_LIMIT)
            .collect();

        if let Some(cache) = &self.cache {
            cache.set(&cache_key, deduped.clone()).await;
        }
        deduped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCache;

    #[async_trait]
    impl ExampleCache for NoCache {
        async fn get(&self, _key: &str) -> Option<Vec<FamilyExample>> {
            None
        }
        async fn set(&self, _key: &str, _value: Vec<FamilyExample>) {}
    }

    #[tokio::test]
    async fn missing_context_degrades_to_none() {
        let store = Arc::new(InMemoryContextStore::default());
        let provider = ContextProvider::new(store, None);
        assert!(provider.get_context(42).await.is_none());
    }

    #[tokio::test]
    async fn examples_dedup_on_description() {
        let store = Arc::new(InMemoryContextStore::default());
        store.add_example(
            1,
            FamilyExample {
                description: "papeleria".to_string(),
                family_code: "600".to_string(),
                family_name: "Gastos".to_string(),
            },
        );
        store.add_example(
            1,
            FamilyExample {
                description: "papeleria".to_string(),
                family_code: "600".to_string(),
                family_name: "Gastos".to_string(),
            },
        );
        let provider = ContextProvider::new(store, Some(Arc::new(NoCache)));
        let examples = provider.get_family_classification_examples(1).await;
        assert_eq!(examples.len(), 1);
    }
}
