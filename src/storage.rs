//! `storage`-feature-gated Postgres/Redis implementations of the
//! in-memory traits defined in `learning.rs`/`context.rs`. Disabled by
//! default so the crate builds dependency-free for callers who only need
//! the classification logic with externally-supplied data.

#![cfg(feature = "storage")]

use async_trait::async_trait;
use sqlx::PgPool;

use crate::context::{Correction, ExampleCache, FamilyExample};
use crate::error::Result;
use crate::learning::LearningStore;
use crate::schema::{LearningRow, ValidationType};

pub struct PostgresLearningStore {
    pool: PgPool,
}

impl PostgresLearningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_BY_TENANT: &str = r#"
    SELECT tenant_id, provider_rfc, provider_name, concept, embedding,
           sat_account_code, sat_account_name, family_code,
           validation_type, validated_by, session_id, original_prediction,
           original_confidence, created_at
    FROM classification_learning_history
    WHERE tenant_id = $1
    ORDER BY created_at ASC
"#;

const INSERT_ROW: &str = r#"
    INSERT INTO classification_learning_history
        (tenant_id, provider_rfc, provider_name, concept, embedding,
         sat_account_code, sat_account_name, family_code,
         validation_type, validated_by, session_id,
         original_prediction, original_confidence, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

#[async_trait]
impl LearningStore for PostgresLearningStore {
    async fn rows_for_tenant(&self, tenant_id: i64) -> Result<Vec<LearningRow>> {
        let rows = sqlx::query_as::<_, LearningRowRecord>(SELECT_BY_TENANT)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(LearningRow::from).collect())
    }

    async fn append(&self, row: LearningRow) -> Result<()> {
        let validation_type = format!("{:?}", row.validation_type).to_lowercase();
        sqlx::query(INSERT_ROW)
            .bind(row.tenant_id)
            .bind(row.provider_rfc)
            .bind(row.provider_name)
            .bind(row.concept)
            .bind(row.embedding)
            .bind(row.sat_account_code)
            .bind(row.sat_account_name)
            .bind(row.family_code)
            .bind(validation_type)
            .bind(row.validated_by)
            .bind(row.session_id)
            .bind(row.original_prediction)
            .bind(row.original_confidence)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct LearningRowRecord {
    tenant_id: i64,
    provider_rfc: String,
    provider_name: String,
    concept: String,
    embedding: Vec<f32>,
    sat_account_code: String,
    sat_account_name: String,
    family_code: String,
    validation_type: String,
    validated_by: String,
    session_id: Option<String>,
    original_prediction: Option<String>,
    original_confidence: Option<f64>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<LearningRowRecord> for LearningRow {
    fn from(record: LearningRowRecord) -> Self {
        let validation_type = match record.validation_type.as_str() {
            "human" => ValidationType::Human,
            "corrected" => ValidationType::Corrected,
            _ => ValidationType::Auto,
        };
        Self {
            tenant_id: record.tenant_id,
            provider_rfc: record.provider_rfc,
            provider_name: record.provider_name,
            concept: record.concept,
            embedding: record.embedding,
            sat_account_code: record.sat_account_code,
            sat_account_name: record.sat_account_name,
            family_code: record.family_code,
            validation_type,
            validated_by: record.validated_by,
            session_id: record.session_id,
            original_prediction: record.original_prediction,
            original_confidence: record.original_confidence,
            created_at: record.created_at,
        }
    }
}

/// Reads `ai_correction_memory` for the RAG-style similar-corrections
/// lookup the context provider exposes (kept a distinct table/read path
/// from the learning history, per DESIGN.md's resolved open question).
pub struct PostgresCorrectionMemory {
    pool: PgPool,
}

impl PostgresCorrectionMemory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn corrections_for(
        &self,
        tenant_id: i64,
        provider_rfc: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Correction>> {
        let rows = sqlx::query_as::<_, CorrectionRecord>(
            r#"
            SELECT provider_rfc, concept, sat_account_code, sat_account_name
            FROM ai_correction_memory
            WHERE tenant_id = $1 AND ($2::text IS NULL OR provider_rfc = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(provider_rfc)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Correction {
                provider_rfc: r.provider_rfc,
                concept: r.concept,
                sat_account_code: r.sat_account_code,
                sat_account_name: r.sat_account_name,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct CorrectionRecord {
    provider_rfc: String,
    concept: String,
    sat_account_code: String,
    sat_account_name: String,
}

/// Redis-backed few-shot example cache (spec.md §4.C, 3600s TTL).
pub struct RedisExampleCache {
    connection: redis::aio::ConnectionManager,
}

impl RedisExampleCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl ExampleCache for RedisExampleCache {
    async fn get(&self, key: &str) -> Option<Vec<FamilyExample>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .ok()?;
        let raw = raw?;
        serde_json::from_str::<Vec<SerializableFamilyExample>>(&raw)
            .ok()
            .map(|v| v.into_iter().map(Into::into).collect())
    }

    async fn set(&self, key: &str, value: Vec<FamilyExample>) {
        let mut conn = self.connection.clone();
        let serializable: Vec<SerializableFamilyExample> =
            value.into_iter().map(Into::into).collect();
        if let Ok(raw) = serde_json::to_string(&serializable) {
            let _: Result<(), _> = redis::cmd("SETEX")
                .arg(key)
                .arg(crate::context::FEW_SHOT_CACHE_TTL_SECS)
                .arg(raw)
                .query_async::<_, ()>(&mut conn)
                .await;
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializableFamilyExample {
    description: String,
    family_code: String,
    family_name: String,
}

impl From<FamilyExample> for SerializableFamilyExample {
    fn from(e: FamilyExample) -> Self {
        Self {
            description: e.description,
            family_code: e.family_code,
            family_name: e.family_name,
        }
    }
}

impl From<SerializableFamilyExample> for FamilyExample {
    fn from(e: SerializableFamilyExample) -> Self {
        Self {
            description: e.description,
            family_code: e.family_code,
            family_name: e.family_name,
        }
    }
}
