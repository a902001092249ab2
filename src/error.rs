use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("no candidate accounts found for subfamily {subfamily} (family {family})")]
    NoCandidates { family: String, subfamily: String },

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm response was not valid JSON or failed schema validation: {0}")]
    InvalidLlmResponse(String),

    #[error(
        "hierarchical consistency violation: account {account} does not belong to family {family}"
    )]
    HierarchicalViolation { account: String, family: String },

    #[error("unknown sat account code: {0}")]
    UnknownAccount(String),

    #[error("tenant could not be resolved: {0}")]
    UnknownTenant(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "storage")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "storage")]
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClassificationError>;
