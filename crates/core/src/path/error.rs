//! Object key error types.

use thiserror::Error;

/// Reasons an object key cannot be built or accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// An identifier would produce an unsafe key segment.
    #[error("invalid {kind} '{value}': {reason}")]
    InvalidSegment {
        /// Which identifier was rejected.
        kind: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A longitudinal project needs an event to place the file.
    #[error("an event is required for longitudinal projects")]
    MissingEvent,

    /// The event id is not part of the project.
    #[error("unknown event id {0}")]
    UnknownEvent(u64),

    /// Repeat instances start at 1.
    #[error("instance id must be positive")]
    InvalidInstance,

    /// A stored object key is empty or unsafe.
    #[error("invalid stored path '{path}': {reason}")]
    InvalidStoredPath {
        /// The rejected key.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl PathError {
    /// Create an invalid segment error.
    #[must_use]
    pub fn invalid_segment(
        kind: &'static str,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidSegment {
            kind,
            value: value.into(),
            reason,
        }
    }

    /// Create an invalid stored path error.
    #[must_use]
    pub fn invalid_stored_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidStoredPath {
            path: path.into(),
            reason,
        }
    }
}
