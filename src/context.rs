//! Per-operation context threaded through every tracker call.

use tracing::Span;

/// Identifies one invocation for log correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    correlation_id: String,
    operation: String,
}

impl OpContext {
    /// New context with a fresh correlation id.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().simple().to_string(),
            operation: operation.into(),
        }
    }

    /// Context with a caller-supplied correlation id, e.g. one propagated
    /// from an executor that wants its own id in our logs.
    pub fn with_correlation_id(operation: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation: operation.into(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the correlation id and operation name.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "op",
            cid = %self.short_id(),
            op = %self.operation,
        )
    }

    fn short_id(&self) -> &str {
        self.correlation_id
            .get(..8)
            .unwrap_or(&self.correlation_id)
    }
}
