//! Application-wide error types.

use thiserror::Error;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// The field has no storage platform binding.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Identifiers would produce an unsafe object key.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider was reached but refused the operation.
    #[error("Permission denied by provider: {0}")]
    ProviderPermissionDenied(String),

    /// The provider could not be reached.
    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// A signed URL could not be produced.
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotConfigured(_) | Self::NotFound(_) => 404,
            Self::InvalidPath(_) | Self::Validation(_) => 400,
            Self::ProviderPermissionDenied(_) => 403,
            Self::ProviderUnreachable(_) => 503,
            Self::SigningFailure(_) | Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ProviderPermissionDenied(_) => "PROVIDER_PERMISSION_DENIED",
            Self::ProviderUnreachable(_) => "PROVIDER_UNREACHABLE",
            Self::SigningFailure(_) => "SIGNING_FAILURE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnreachable(_))
    }
}
