//! Record link errors.

use fieldvault_shared::AppError;
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors saving stored files or listing their links.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Issuing a link or validating a field failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Links were requested without naming a record.
    #[error("record id is required")]
    MissingRecordId,

    /// The record store failed.
    #[error("record store error: {0}")]
    Store(String),
}

impl RecordError {
    /// Create a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        let message = err.to_string();
        match err {
            RecordError::Broker(e) => e.into(),
            RecordError::MissingRecordId => Self::Validation(message),
            RecordError::Store(_) => Self::Internal(message),
        }
    }
}
