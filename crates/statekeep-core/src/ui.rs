//! Operator-facing output and input seams

use crate::error::InputError;
use async_trait::async_trait;

/// Sink for messages shown to the operator
pub trait Ui: Send + Sync {
    /// Normal output
    fn output(&self, message: &str);

    /// Error output
    fn error(&self, message: &str);
}

/// A question put to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOpts {
    /// Stable identifier, usable for scripted answers
    pub id: String,
    /// Short question
    pub query: String,
    /// Longer explanation shown before the question
    pub description: String,
}

impl InputOpts {
    /// Create a prompt
    #[must_use]
    pub fn new(id: impl Into<String>, query: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            description: description.into(),
        }
    }
}

/// Source of operator answers
#[async_trait]
pub trait Input: Send + Sync {
    /// Ask a question and return the raw answer
    async fn input(&self, opts: &InputOpts) -> Result<String, InputError>;
}
