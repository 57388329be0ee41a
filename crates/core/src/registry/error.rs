//! Field registry error types.

use fieldvault_shared::Platform;
use thiserror::Error;

/// Configuration errors detected while building the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A field is claimed by more than one storage annotation.
    #[error("field '{field}' is bound to both {first} and {second}")]
    DuplicateBinding {
        /// Field name.
        field: String,
        /// Platform registered first.
        first: Platform,
        /// Platform that attempted to claim the field again.
        second: Platform,
    },

    /// A storage annotation has no bucket or container.
    #[error("field '{field}' has an empty {platform} storage annotation")]
    EmptyAnnotation {
        /// Field name.
        field: String,
        /// Platform named by the annotation.
        platform: Platform,
    },

    /// The annotation value is not a usable bucket or container name.
    #[error("field '{field}' names invalid {platform} bucket or container '{value}': {reason}")]
    InvalidContainer {
        /// Field name.
        field: String,
        /// Platform named by the annotation.
        platform: Platform,
        /// Offending annotation value.
        value: String,
        /// Naming rule the value breaks.
        reason: &'static str,
    },
}

impl RegistryError {
    /// Create a duplicate binding error.
    #[must_use]
    pub fn duplicate(field: impl Into<String>, first: Platform, second: Platform) -> Self {
        Self::DuplicateBinding {
            field: field.into(),
            first,
            second,
        }
    }
}
