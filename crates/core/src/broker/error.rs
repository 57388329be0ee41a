//! Broker error taxonomy.

use fieldvault_shared::{AppError, Platform};
use thiserror::Error;

use crate::path::PathError;
use crate::platform::{PlatformError, ProviderError};

/// Why a signed URL could not be issued.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The field has no binding, or its platform is not enabled.
    #[error("field '{field}' is not bound to a configured storage platform")]
    NotConfigured {
        /// Field name.
        field: String,
    },

    /// The provider could not be reached or rejected the credentials.
    #[error("{platform} storage unreachable: {message}")]
    ProviderUnreachable {
        /// Platform that failed.
        platform: Platform,
        /// Failure detail.
        message: String,
        /// Whether retrying later may succeed.
        retryable: bool,
    },

    /// The provider accepted the credentials but refused the operation.
    #[error("{platform} storage denied the operation: {message}")]
    ProviderPermissionDenied {
        /// Platform that refused.
        platform: Platform,
        /// Provider error text.
        message: String,
    },

    /// Identifiers would produce an unsafe object key.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The URL could not be signed.
    #[error("signing failure: {0}")]
    SigningFailure(String),

    /// The broker or an adapter is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Create a not configured error.
    #[must_use]
    pub fn not_configured(field: impl Into<String>) -> Self {
        Self::NotConfigured {
            field: field.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// A provider call that did not finish in time.
    #[must_use]
    pub fn timed_out(platform: Platform, endpoint: &str) -> Self {
        Self::ProviderUnreachable {
            platform,
            message: format!("request to {endpoint} timed out"),
            retryable: true,
        }
    }

    /// Translate an adapter failure.
    #[must_use]
    pub fn from_platform(platform: Platform, err: PlatformError) -> Self {
        match err {
            PlatformError::Provider(e) if e.is_permission_denied() => {
                Self::ProviderPermissionDenied {
                    platform,
                    message: e.to_string(),
                }
            }
            PlatformError::Provider(e) => {
                let retryable = match &e {
                    ProviderError::Timeout | ProviderError::Unreachable(_) => true,
                    ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
                    ProviderError::Credentials(_) | ProviderError::InvalidResponse(_) => false,
                };
                Self::ProviderUnreachable {
                    platform,
                    message: e.to_string(),
                    retryable,
                }
            }
            PlatformError::Signing(msg) => Self::SigningFailure(msg),
            err @ (PlatformError::InvalidContainer { .. } | PlatformError::Configuration(_)) => {
                Self::Configuration(err.to_string())
            }
        }
    }

    /// Whether the caller may retry the request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnreachable {
                retryable: true,
                ..
            }
        )
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::NotConfigured { .. } => Self::NotConfigured(message),
            BrokerError::ProviderUnreachable { .. } => Self::ProviderUnreachable(message),
            BrokerError::ProviderPermissionDenied { .. } => Self::ProviderPermissionDenied(message),
            BrokerError::InvalidPath(_) => Self::InvalidPath(message),
            BrokerError::SigningFailure(_) => Self::SigningFailure(message),
            BrokerError::Configuration(_) => Self::Configuration(message),
        }
    }
}
