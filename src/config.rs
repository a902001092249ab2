//! Process-wide configuration loaded from the environment, following the
//! teacher's direct `std::env::var("GEMINI_API_KEY")` convention (see its
//! `demos/*.rs`), consolidated here since this crate has more than one
//! knob to thread through.

use crate::llm::client::ModelRoster;

const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CHEAP_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_STRONG_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_EMBEDDING_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when no key is configured; the pipeline then runs in
    /// no-LLM fallback mode (spec.md §6 "Environment").
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub roster: ModelRoster,
    pub embedding_base_url: Option<String>,
    #[cfg(feature = "storage")]
    pub database_url: Option<String>,
    #[cfg(feature = "storage")]
    pub redis_url: Option<String>,
}

impl AppConfig {
    /// Reads `CLASSIFIER_LLM_API_KEY`, `CLASSIFIER_LLM_BASE_URL`,
    /// `CLASSIFIER_CHEAP_MODEL`, `CLASSIFIER_STRONG_MODEL`,
    /// `CLASSIFIER_EMBEDDING_URL`, and (with `storage`)
    /// `CLASSIFIER_DATABASE_URL` / `CLASSIFIER_REDIS_URL`.
    pub fn from_env() -> Self {
        Self {
            llm_api_key: std::env::var("CLASSIFIER_LLM_API_KEY").ok(),
            llm_base_url: std::env::var("CLASSIFIER_LLM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string()),
            roster: ModelRoster {
                cheap_model: std::env::var("CLASSIFIER_CHEAP_MODEL")
                    .unwrap_or_else(|_| DEFAULT_CHEAP_MODEL.to_string()),
                strong_model: std::env::var("CLASSIFIER_STRONG_MODEL")
                    .unwrap_or_else(|_| DEFAULT_STRONG_MODEL.to_string()),
            },
            embedding_base_url: std::env::var("CLASSIFIER_EMBEDDING_URL")
                .ok()
                .or_else(|| Some(DEFAULT_EMBEDDING_BASE_URL.to_string())),
            #[cfg(feature = "storage")]
            database_url: std::env::var("CLASSIFIER_DATABASE_URL").ok(),
            #[cfg(feature = "storage")]
            redis_url: std::env::var("CLASSIFIER_REDIS_URL").ok(),
        }
    }

    pub fn has_llm(&self) -> bool {
        self.llm_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_present_without_env_vars() {
        let config = AppConfig {
            llm_api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            roster: ModelRoster {
                cheap_model: DEFAULT_CHEAP_MODEL.to_string(),
                strong_model: DEFAULT_STRONG_MODEL.to_string(),
            },
            embedding_base_url: Some(DEFAULT_EMBEDDING_BASE_URL.to_string()),
            #[cfg(feature = "storage")]
            database_url: None,
            #[cfg(feature = "storage")]
            redis_url: None,
        };
        assert!(!config.has_llm());
        assert_eq!(config.roster.cheap_model, DEFAULT_CHEAP_MODEL);
    }
}
