//! Progress events threaded out of the pipeline (spec.md §9, optional
//! observability channel), mirroring the teacher's `ExtractionEvent`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    LearningLookup,
    ModelSelected { phase: String, model: String, reason: String },
    FamilyClassification,
    SubfamilyClassification,
    CandidateRetrieval,
    AccountSelection,
    Success,
    Failed { reason: String },
}

/// Which class of model a phase should use. Mirrors spec.md §6's "cheap
/// model" / "strong model" split without hard-coding a vendor's naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    Cheap,
    Strong,
}
