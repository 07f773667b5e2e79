//! Narrow interfaces to the systems the agents depend on
//!
//! Each trait has a reference implementation so the core runs end to end
//! without external services:
//!
//! | Trait | Reference | Other |
//! |---|---|---|
//! | [`TextUnderstanding`] | [`TemplateModel`] | [`OllamaModel`] |
//! | [`TabularData`] | [`InMemoryTabular`] | |
//! | [`StructuredStorage`] | [`InMemoryStorage`] | [`FsStorage`] |
//! | [`DocumentExtraction`] | [`PlainTextExtractor`] | |

pub mod document;
pub mod model;
pub mod ollama;
pub mod prompts;
pub mod storage;
pub mod tabular;

pub use document::{DocumentExtraction, ExtractedDocument, PlainTextExtractor};
pub use model::{Inference, InferTarget, TemplateModel, TextUnderstanding};
pub use ollama::{OllamaConfig, OllamaModel};
pub use storage::{FsStorage, InMemoryStorage, StructuredStorage};
pub use tabular::{ColumnSummary, InMemoryTabular, NumericSummary, TabularData};

use dpo_types::ErrorClass;
use std::sync::Arc;

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The service could not be reached or refused to answer
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// The service answered with something unusable
    #[error("{service} returned malformed output: {message}")]
    Malformed { service: String, message: String },

    /// Tabular data source failure
    #[error("data access failed: {0}")]
    DataAccess(String),

    /// Document could not be read or parsed
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Structured storage failure
    #[error("storage failed: {0}")]
    Storage(String),
}

impl CollaboratorError {
    /// Service could not be reached
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Service answered with unusable output
    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable class reported on the task error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable { .. } | Self::Malformed { .. } => ErrorClass::PlannerUnavailable,
            Self::DataAccess(_) => ErrorClass::DataAccess,
            Self::Extraction(_) => ErrorClass::Extraction,
            Self::Storage(_) => ErrorClass::Storage,
        }
    }

    /// Whether a fallback collaborator should be tried instead
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Malformed { .. })
    }

    /// Whether the harness should retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

/// Handles to every collaborator, shared by the agents
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn TextUnderstanding>,
    /// Named datasets
    pub tabular: Arc<dyn TabularData>,
    /// Result sink
    pub storage: Arc<dyn StructuredStorage>,
    /// Document extraction
    pub documents: Arc<dyn DocumentExtraction>,
}

impl Collaborators {
    /// Reference implementations only, no external services
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            model: Arc::new(TemplateModel),
            tabular: Arc::new(InMemoryTabular::new()),
            storage: Arc::new(InMemoryStorage::new()),
            documents: Arc::new(PlainTextExtractor::new()),
        }
    }

    /// Swap the text-understanding service
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn TextUnderstanding>) -> Self {
        self.model = model;
        self
    }

    /// Swap the dataset source
    #[must_use]
    pub fn with_tabular(mut self, tabular: Arc<dyn TabularData>) -> Self {
        self.tabular = tabular;
        self
    }

    /// Swap the result sink
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StructuredStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Swap the document extractor
    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentExtraction>) -> Self {
        self.documents = documents;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("model", &self.model.name())
            .field("datasets", &self.tabular.datasets())
            .finish_non_exhaustive()
    }
}
