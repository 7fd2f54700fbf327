use crate::transport::TransportError;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "retry.multiplier", "descriptor.url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_queue", "config_loader")
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

/// Coarse classification of a failure, used by the retry controller and the
/// circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// No response was received.
    Network,
    /// HTTP 4xx other than 429.
    Client,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// Rejected locally by an open circuit breaker.
    CircuitOpen,
    /// A single member of a batch failed.
    BatchItem,
    /// Token refresh failed.
    Authentication,
    Cancelled,
    /// Configuration, validation and other local failures.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Client => "client_error",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Server => "server_error",
            ErrorClass::CircuitOpen => "circuit_open",
            ErrorClass::BatchItem => "batch_item",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the gateway client.
///
/// `Clone` so that one outcome can be fanned out to every caller joined on a
/// deduplicated request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Network transport error: {0}")]
    Transport(Arc<TransportError>),

    #[error("Remote error: HTTP {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
        body: Option<serde_json::Value>,
    },

    #[error("Circuit breaker open: next attempt allowed in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("Batch item {id} failed: HTTP {status}: {message}")]
    BatchItem {
        id: String,
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

// Helper function to format error context for display
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

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } | Error::BatchItem { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Transport(_) => ErrorClass::Network,
            Error::Remote { status: 429, .. } => ErrorClass::RateLimited,
            Error::Remote { status, .. } if *status >= 500 => ErrorClass::Server,
            Error::Remote { .. } => ErrorClass::Client,
            Error::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Error::BatchItem { .. } => ErrorClass::BatchItem,
            Error::Authentication { .. } => ErrorClass::Authentication,
            Error::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Internal,
        }
    }

    /// Network failures, 5xx and 429 may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Network | ErrorClass::Server | ErrorClass::RateLimited
        )
    }

    /// Failures that count against backend health in the circuit breaker.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self.class(), ErrorClass::Network | ErrorClass::Server)
    }

    /// Server-supplied backpressure hint, only honoured for 429 responses.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::Remote {
                status: 429,
                retry_after_ms: Some(ms),
                ..
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }
}
