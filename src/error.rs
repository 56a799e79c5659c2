use std::sync::Arc;
use thiserror::Error;

/// Shared, type-erased error returned by a bulk operation.
pub type BulkError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error context for configuration problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key that caused the error (e.g., "max_items")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Error settled into an aggregated call, or returned by configuration.
///
/// The type is `Clone` because a single batch failure is handed to every
/// call of that batch.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The wrapped bulk operation failed. Every call of the batch sees the
    /// same underlying error.
    #[error("bulk operation failed: {0}")]
    Bulk(#[source] BulkError),

    #[error("bulk operation returned {actual} results for a batch of {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("operation cancelled")]
    Cancelled,

    /// The settlement handle was dropped before a value was sent, e.g. the
    /// runtime shut down while the batch was in flight.
    #[error("call abandoned before settlement")]
    Abandoned,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Wrap an arbitrary bulk-operation error.
    pub fn bulk<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Bulk(Arc::from(err.into()))
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when the failure came from the bulk operation itself, either as a
    /// raised error or as a result vector of the wrong length.
    pub fn is_bulk_failure(&self) -> bool {
        matches!(self, Error::Bulk(_) | Error::LengthMismatch { .. })
    }

    /// The error raised by the bulk operation, if this is a bulk failure.
    pub fn bulk_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Error::Bulk(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
