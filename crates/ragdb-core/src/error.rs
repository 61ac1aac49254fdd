use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ingestion stage at which a document ingestion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Preprocess,
    Chunk,
    Dedup,
    Embed,
    Commit,
    Persist,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preprocess => "preprocess",
            Self::Chunk => "chunk",
            Self::Dedup => "dedup",
            Self::Embed => "embed",
            Self::Commit => "commit",
            Self::Persist => "persist",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Embedding failure: {message}")]
    EmbeddingFailure { message: String, retryable: bool },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Ingestion of document '{document_id}' failed at stage {stage}: {source}")]
    Ingestion {
        document_id: String,
        stage: IngestStage,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn embedding(message: impl Into<String>, retryable: bool) -> Self {
        Self::EmbeddingFailure { message: message.into(), retryable }
    }

    /// Wrap `self` with the document and stage that were being processed.
    /// Already-wrapped errors are returned unchanged.
    pub fn at_stage(self, document_id: &str, stage: IngestStage) -> Self {
        match self {
            e @ Self::Ingestion { .. } => e,
            other => Self::Ingestion { document_id: document_id.to_string(), stage, source: Box::new(other) },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingFailure { retryable, .. } => *retryable,
            Self::Ingestion { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Ingestion { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The stage recorded by [`Error::at_stage`], if any.
    pub fn stage(&self) -> Option<IngestStage> {
        match self {
            Self::Ingestion { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
