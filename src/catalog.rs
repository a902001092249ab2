//! The read-only SAT chart-of-accounts catalog: family/subfamily/leaf
//! queries, the hierarchical invariant, and the bounded
//! `sat_product_service_code -> name` cache (spec.md §3, §5).

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::{ClassificationError, Result};
use crate::schema::SatAccount;

const PRODUCT_SERVICE_CACHE_CAPACITY: usize = 10_000;

/// In-memory snapshot of `sat_account_embeddings`. A `storage`-feature
/// implementation can populate this from Postgres at startup; nothing in
/// the pipeline depends on the source, only on this read-shared structure
/// (spec.md §3 "Ownership").
#[derive(Debug)]
pub struct SatAccountCatalog {
    by_code: BTreeMap<String, SatAccount>,
    product_service_names: Mutex<LruCache<String, String>>,
}

impl SatAccountCatalog {
    pub fn new(accounts: Vec<SatAccount>) -> Self {
        let mut by_code = BTreeMap::new();
        for account in accounts {
            by_code.insert(account.code.clone(), account);
        }
        Self {
            by_code,
            product_service_names: Mutex::new(LruCache::new(
                NonZeroUsize::new(PRODUCT_SERVICE_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn find_by_code(&self, code: &str) -> Option<&SatAccount> {
        self.by_code.get(code)
    }

    /// Canonical account name for `code`, looked up from the catalog —
    /// never from an LLM-generated value (spec.md §4.3, §8 invariants).
    pub fn name_for(&self, code: &str) -> Result<String> {
        self.find_by_code(code)
            .map(|a| a.name.clone())
            .ok_or_else(|| ClassificationError::UnknownAccount(code.to_string()))
    }

    /// All 3-digit subfamily codes whose first digit matches `family_code`.
    pub fn subfamilies_of_family(&self, family_code: &str) -> Vec<&SatAccount> {
        let digit = &family_code[..1.min(family_code.len())];
        self.by_code
            .values()
            .filter(|a| a.is_family() && a.code.starts_with(digit))
            .collect()
    }

    /// Leaf accounts under a given 3-digit subfamily, i.e. `code LIKE
    /// "<subfamily>.%"`.
    pub fn leaves_in_subfamily(&self, subfamily_code: &str) -> Vec<&SatAccount> {
        let prefix = format!("{subfamily_code}.");
        self.by_code
            .values()
            .filter(|a| a.is_leaf() && a.code.starts_with(&prefix))
            .collect()
    }

    /// Leaf accounts whose family digit matches, used for the family-level
    /// fallback when a subfamily yields nothing (spec.md §4.2B).
    pub fn leaves_in_family(&self, family_code: &str) -> Vec<&SatAccount> {
        let digit = family_code.chars().next();
        self.by_code
            .values()
            .filter(|a| a.is_leaf() && a.code.chars().next() == digit)
            .collect()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &SatAccount> {
        self.by_code.values().filter(|a| a.is_leaf())
    }

    /// spec.md §3 invariant: every leaf code's first digit equals its
    /// family code's first digit. Checked once at construction so later
    /// code can assume it holds.
    pub fn check_hierarchical_invariant(&self) -> Result<()> {
        for account in self.by_code.values() {
            if account.is_leaf() && account.code.chars().next() != account.family_code().chars().next() {
                return Err(ClassificationError::HierarchicalViolation {
                    account: account.code.clone(),
                    family: account.family_code().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Thread-safe bounded lookup of a product/service code's human name.
    /// `compute` is only invoked on a cache miss.
    pub fn product_service_name(
        &self,
        code: &str,
        compute: impl FnOnce() -> String,
    ) -> String {
        let mut cache = self.product_service_names.lock();
        if let Some(name) = cache.get(code) {
            return name.clone();
        }
        let name = compute();
        cache.put(code.to_string(), name.clone());
        name
    }
}

pub type SharedCatalog = Arc<SatAccountCatalog>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> SatAccountCatalog {
        SatAccountCatalog::new(vec![
            SatAccount {
                code: "600".to_string(),
                name: "Gastos".to_string(),
                description: "Operating expenses".to_string(),
                embedding: None,
            },
            SatAccount {
                code: "601".to_string(),
                name: "Gastos de Venta".to_string(),
                description: "Selling expenses".to_string(),
                embedding: None,
            },
            SatAccount {
                code: "601.48".to_string(),
                name: "Peajes".to_string(),
                description: "Tolls and road fees".to_string(),
                embedding: None,
            },
            SatAccount {
                code: "602".to_string(),
                name: "Gastos de Logistica".to_string(),
                description: "Logistics expenses".to_string(),
                embedding: None,
            },
            SatAccount {
                code: "602.10".to_string(),
                name: "Almacenamiento".to_string(),
                description: "Storage fees".to_string(),
                embedding: None,
            },
        ])
    }

    #[test]
    fn subfamilies_share_family_digit() {
        let catalog = sample_catalog();
        let subs = catalog.subfamilies_of_family("600");
        let codes: Vec<_> = subs.iter().map(|a| a.code.as_str()).collect();
        assert!(codes.contains(&"601"));
        assert!(codes.contains(&"602"));
    }

    #[test]
    fn leaves_in_subfamily_prefix_match() {
        let catalog = sample_catalog();
        let leaves = catalog.leaves_in_subfamily("601");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].code, "601.48");
    }

    #[test]
    fn name_for_never_invents() {
        let catalog = sample_catalog();
        assert_eq!(catalog.name_for("601.48").unwrap(), "Peajes");
        assert!(catalog.name_for("999.99").is_err());
    }

    #[test]
    fn hierarchical_invariant_holds() {
        let catalog = sample_catalog();
        assert!(catalog.check_hierarchical_invariant().is_ok());
    }

    #[test]
    fn product_service_cache_memoizes() {
        let catalog = sample_catalog();
        let mut calls = 0;
        let first = catalog.product_service_name("80141628", || {
            calls += 1;
            "Peajes de carreteras".to_string()
        });
        let second = catalog.product_service_name("80141628", || {
            calls += 1;
            "Peajes de carreteras".to_string()
        });
        assert_eq!(first, second);
        assert_eq!(calls, 1);
    }
}
