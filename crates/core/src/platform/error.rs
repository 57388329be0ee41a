//! Storage platform error types.

use thiserror::Error;

/// Failures talking to a provider's REST API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The service could not be reached.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete in time.
    #[error("provider call timed out")]
    Timeout,

    /// The service answered with an error status.
    #[error("provider returned {status}{}: {message}", code_suffix(.code))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Provider error code, when the response carried one.
        code: Option<String>,
        /// Provider error text.
        message: String,
    },

    /// Credentials could not be loaded or exchanged for a token.
    #[error("provider credentials rejected: {0}")]
    Credentials(String),

    /// The response could not be understood.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Provider error codes that mean the credentials themselves were rejected.
const AUTH_FAILURE_CODES: &[&str] = &["AuthenticationFailed", "authError", "unauthorized"];

impl ProviderError {
    /// Create a status error.
    #[must_use]
    pub fn status(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            code,
            message: message.into(),
        }
    }

    /// Whether the provider refused the caller's identity.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Credentials(_) => true,
            Self::Status { status, code, .. } => {
                *status == 401
                    || code
                        .as_deref()
                        .is_some_and(|c| AUTH_FAILURE_CODES.contains(&c))
            }
            _ => false,
        }
    }

    /// Whether the provider accepted the identity but refused the operation.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Status { status: 403, .. }) && !self.is_auth_failure()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Errors raised by a storage platform adapter.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The bucket or container name is not accepted by the provider.
    #[error("invalid container name '{name}': {reason}")]
    InvalidContainer {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A signed URL could not be produced.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The adapter is missing required settings.
    #[error("platform configuration error: {0}")]
    Configuration(String),
}

impl PlatformError {
    /// Create a signing error.
    #[must_use]
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::Signing(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid container error.
    #[must_use]
    pub fn invalid_container(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidContainer {
            name: name.into(),
            reason,
        }
    }
}

impl From<opendal::Error> for PlatformError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::PermissionDenied => Self::Provider(ProviderError::status(
                403,
                None,
                err.to_string(),
            )),
            opendal::ErrorKind::ConfigInvalid | opendal::ErrorKind::Unsupported => {
                Self::Configuration(err.to_string())
            }
            _ => Self::Signing(err.to_string()),
        }
    }
}
