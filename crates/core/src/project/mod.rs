//! The host project's data dictionary.
//!
//! Field annotations decide storage bindings; instruments, events and
//! repeating setups decide the object key layout.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data dictionary loading errors.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The metadata file could not be read.
    #[error("failed to read project metadata {path}: {message}")]
    Io {
        /// File that failed to load.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// The metadata document is malformed.
    #[error("invalid project metadata: {0}")]
    Parse(String),
}

/// A single field of the data dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Field name, unique in the project.
    pub name: String,
    /// Instrument (form) the field belongs to.
    pub form: String,
    /// Free-text annotation holding action tags.
    #[serde(default)]
    pub annotation: String,
}

/// A named event of a longitudinal project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Numeric event id.
    pub id: u64,
    /// Unique event name, e.g. `baseline_arm_1`.
    pub unique_name: String,
}

/// A repeating instrument, or a whole repeating event when `form` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatingSetup {
    /// Event in which the repetition applies.
    pub event_id: u64,
    /// Repeating instrument; `None` means every instrument of the event repeats.
    #[serde(default)]
    pub form: Option<String>,
}

/// Project data dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Whether the study uses multiple named events.
    #[serde(default)]
    pub longitudinal: bool,
    /// All fields.
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
    /// Events, in display order.
    #[serde(default)]
    pub events: Vec<EventDefinition>,
    /// Repeating instruments and events.
    #[serde(default)]
    pub repeating: Vec<RepeatingSetup>,
}

impl ProjectMetadata {
    /// Parse metadata from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ProjectError::Parse` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ProjectError> {
        serde_json::from_str(json).map_err(|e| ProjectError::Parse(e.to_string()))
    }

    /// Load metadata from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProjectError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Instrument that owns `field`.
    #[must_use]
    pub fn instrument_of(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.form.as_str())
    }

    /// Unique name of an event.
    #[must_use]
    pub fn event_name(&self, event_id: u64) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.id == event_id)
            .map(|e| e.unique_name.as_str())
    }

    /// First event of the project, used when a request names none.
    #[must_use]
    pub fn first_event_id(&self) -> Option<u64> {
        self.events.first().map(|e| e.id)
    }

    /// Whether `form` repeats in `event_id`.
    ///
    /// Without an event, the form counts as repeating if it repeats in any event.
    #[must_use]
    pub fn is_repeating(&self, event_id: Option<u64>, form: &str) -> bool {
        self.repeating.iter().any(|r| {
            let event_matches = event_id.is_none_or(|id| id == r.event_id);
            let form_matches = r.form.as_deref().is_none_or(|f| f == form);
            event_matches && form_matches
        })
    }

    /// Whether the instrument owning `field` repeats in `event_id`.
    #[must_use]
    pub fn is_field_repeating(&self, event_id: Option<u64>, field: &str) -> bool {
        self.instrument_of(field)
            .is_some_and(|form| self.is_repeating(event_id, form))
    }
}
