//! Candidate code snippets

use serde::{Deserialize, Serialize};

/// Source text proposed for execution, plus the modules it says it needs
///
/// Snippets are transient: they are validated, executed and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    /// Program text
    pub source: String,
    /// Modules the producer claims to import; the policy checks the source regardless
    #[serde(default)]
    pub declared_imports: Vec<String>,
}

impl CodeSnippet {
    /// Snippet with no declared imports
    #[inline]
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            declared_imports: Vec::new(),
        }
    }

    /// Declare the modules the snippet imports
    #[inline]
    #[must_use]
    pub fn with_imports<S: Into<String>>(mut self, imports: impl IntoIterator<Item = S>) -> Self {
        self.declared_imports = imports.into_iter().map(Into::into).collect();
        self
    }
}
