//! Error types for the Eco tutor.
//!
//! This module defines the error hierarchy for every tutor operation,
//! including configuration loading, request validation, access control,
//! LLM interactions, and store persistence.

use std::path::PathBuf;

/// A specialized `Result` type for tutor operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving tutoring sessions.
///
/// Error variants are organized by subsystem. Configuration variants carry an
/// actionable suggestion for the operator; request-level variants carry only
/// what is safe to show to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your eco.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Catalog Errors
    // ========================================================================
    /// Catalog file was not found at the specified path.
    #[error("Catalog not found: '{path}'\n\nSuggestion: Check the 'catalog' field in eco.json or the --catalog flag")]
    CatalogNotFound {
        /// Path where the catalog was expected.
        path: PathBuf,
    },

    /// An article in the catalog exceeds the content size limit.
    #[error("Article '{title}' exceeds size limit (200KB): content is {size_kb}KB\n\nSuggestion: Trim the article to its abstract and main sections")]
    ArticleTooLarge {
        /// Title of the oversized article.
        title: String,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Request input failed validation. Nothing was mutated.
    #[error("Validation error: {field} {message}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The requested entity does not exist.
    #[error("{entity} not found")]
    NotFound {
        /// Kind of entity ("Chat session", "Assignment", ...).
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The assignment still has chat sessions and cannot be deleted.
    #[error("Cannot delete assignment with student activity.")]
    AssignmentInUse {
        /// Number of students with a session on it.
        student_count: usize,
    },

    /// The caller may not access this resource.
    #[error("Access denied")]
    AccessDenied,

    /// The request carried no usable identity.
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    // ========================================================================
    // LLM Errors
    // ========================================================================
    /// LLM API returned an error (authentication, rate limiting, etc.).
    #[error("LLM API error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    LlmApiError {
        /// The kind of API error (e.g., rate limit, authentication, server).
        kind: LlmErrorKind,
        /// Detailed error message from the API.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    /// The AI turn generator did not answer in time.
    #[error("AI response timed out after {timeout_secs}s")]
    AiTimeout {
        /// The timeout duration in seconds.
        timeout_secs: u64,
    },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// State snapshot contains malformed JSON that cannot be recovered.
    #[error("Corrupted state file '{path}': {message}\n\nSuggestion: Remove the state file to start fresh, or restore from backup")]
    StoreCorrupted {
        /// Path to the corrupted state file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task running a student turn panicked or was cancelled.
    #[error("Turn task failed: {0}")]
    TurnTask(String),
}

/// Categories of LLM API errors for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The provider answered but the payload was unusable.
    InvalidResponse,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key named by gemini.apiKeyEnv",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the LLM service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::InvalidResponse => "Check that gemini.model names a text generation model",
            Self::Other => "Check the LLM provider's status page",
        }
    }

    /// Classifies an HTTP status code returned by the provider.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `CatalogNotFound` error.
    #[must_use]
    pub fn catalog_not_found(path: impl Into<PathBuf>) -> Self {
        Self::CatalogNotFound { path: path.into() }
    }

    /// Creates a new `ArticleTooLarge` error.
    #[must_use]
    pub fn article_too_large(title: impl Into<String>, size_kb: u64) -> Self {
        Self::ArticleTooLarge {
            title: title.into(),
            size_kb,
        }
    }

    /// Creates a new `Validation` error for a request field.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated(reason.into())
    }

    /// Creates a new `LlmApiError` with automatic suggestion based on error kind.
    #[must_use]
    pub fn llm_api_error(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::LlmApiError {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `AiTimeout` error.
    #[must_use]
    pub const fn ai_timeout(timeout_secs: u64) -> Self {
        Self::AiTimeout { timeout_secs }
    }

    /// Creates a new `StoreCorrupted` error.
    #[must_use]
    pub fn store_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LlmApiError {
                kind: LlmErrorKind::RateLimit | LlmErrorKind::Server | LlmErrorKind::Network,
                ..
            } | Self::AiTimeout { .. }
        )
    }

    /// Returns `true` if this error comes from the AI turn generator.
    ///
    /// These are recovered locally by the session controller and never
    /// reach a student as a failed request.
    #[must_use]
    pub const fn is_ai_failure(&self) -> bool {
        matches!(self, Self::LlmApiError { .. } | Self::AiTimeout { .. })
    }

    /// Returns `true` if this error is fatal at startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::CatalogNotFound { .. }
                | Self::ArticleTooLarge { .. }
                | Self::StoreCorrupted { .. }
        )
    }
}
