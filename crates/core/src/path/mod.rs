//! Object key construction.
//!
//! Keys are laid out so that files of the same field never collide across
//! records, events, or repeat instances, while simple projects get the
//! shortest layout:
//!
//! ```text
//! longitudinal:  {prefix}/{record}/{field}/{event_name}/{instance}/{file}
//! repeating:     {prefix}/{record}/{field}/{instance}/{file}
//! otherwise:     {prefix}/{record}/{field}/{file}
//! ```
//!
//! The file name is percent-encoded. Every other segment is validated and
//! rejected when unsafe, never rewritten.

mod error;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::project::ProjectMetadata;

pub use error::PathError;

/// Key of a stored object within its bucket or container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the owned key.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Inputs for a single object key.
#[derive(Debug, Clone, Copy)]
pub struct PathRequest<'a> {
    /// Upload prefix of the field's binding.
    pub prefix: &'a str,
    /// Form field name.
    pub field_name: &'a str,
    /// Original file name, unencoded.
    pub file_name: &'a str,
    /// Record id; `None` or empty for records not saved yet.
    pub record_id: Option<&'a str>,
    /// Event id.
    pub event_id: Option<u64>,
    /// Repeat instance.
    pub instance_id: Option<u32>,
}

/// Builds object keys according to the project's design.
#[derive(Debug, Clone)]
pub struct PathResolver {
    metadata: Arc<ProjectMetadata>,
}

impl PathResolver {
    /// Instance used when a request names none.
    pub const DEFAULT_INSTANCE: u32 = 1;

    /// Create a resolver for a project.
    #[must_use]
    pub fn new(metadata: Arc<ProjectMetadata>) -> Self {
        Self { metadata }
    }

    /// The project metadata this resolver lays keys out for.
    #[must_use]
    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    /// Build the object key for an upload.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] if any identifier is unsafe or the event
    /// cannot be resolved.
    pub fn build_path(&self, req: &PathRequest<'_>) -> Result<ObjectKey, PathError> {
        self.build_path_at(req, Utc::now())
    }

    /// Build the object key, using `now` for records without an id.
    ///
    /// # Errors
    ///
    /// See [`PathResolver::build_path`].
    pub fn build_path_at(
        &self,
        req: &PathRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<ObjectKey, PathError> {
        let record_id = match req.record_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let fallback = now.timestamp().to_string();
                warn!(
                    field = req.field_name,
                    record_id = %fallback,
                    "No record id supplied, using current timestamp"
                );
                fallback
            }
        };

        validate_segment("record id", &record_id)?;
        validate_segment("field name", req.field_name)?;
        let file_name = encode_file_name(req.file_name)?;

        let mut segments = prefix_segments(req.prefix)?;
        segments.push(record_id);
        segments.push(req.field_name.to_string());

        if self.metadata.longitudinal {
            let event_id = req.event_id.ok_or(PathError::MissingEvent)?;
            let event_name = self
                .metadata
                .event_name(event_id)
                .ok_or(PathError::UnknownEvent(event_id))?;
            validate_segment("event name", event_name)?;
            segments.push(event_name.to_string());
            segments.push(instance_segment(req.instance_id)?);
        } else {
            if let Some(event_id) = req.event_id
                && self.metadata.event_name(event_id).is_none()
            {
                return Err(PathError::UnknownEvent(event_id));
            }
            if self.is_repeating(req) {
                segments.push(instance_segment(req.instance_id)?);
            }
        }

        segments.push(file_name);
        Ok(ObjectKey(segments.join("/")))
    }

    fn is_repeating(&self, req: &PathRequest<'_>) -> bool {
        let event_id = req.event_id.or_else(|| self.metadata.first_event_id());
        self.metadata.is_field_repeating(event_id, req.field_name)
    }
}

/// Percent-encode a file name, keeping only RFC 3986 unreserved characters.
///
/// # Errors
///
/// Returns `PathError::InvalidSegment` for empty, `.` or `..` names.
pub fn encode_file_name(file_name: &str) -> Result<String, PathError> {
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        return Err(PathError::invalid_segment(
            "file name",
            file_name,
            "must name a file",
        ));
    }
    Ok(urlencoding::encode(file_name).into_owned())
}

/// Check a previously stored object key before signing a download for it.
///
/// # Errors
///
/// Returns `PathError::InvalidStoredPath` for empty keys, keys with control
/// characters or backslashes, and keys with empty, `.` or `..` segments.
pub fn validate_stored_key(path: &str) -> Result<(), PathError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::invalid_stored_path(path, "empty path"));
    }
    if trimmed.chars().any(|c| c.is_control() || c == '\\') {
        return Err(PathError::invalid_stored_path(
            path,
            "contains control characters or backslashes",
        ));
    }
    if trimmed
        .split('/')
        .any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(PathError::invalid_stored_path(
            path,
            "contains empty or relative segments",
        ));
    }
    Ok(())
}

fn validate_segment(kind: &'static str, value: &str) -> Result<(), PathError> {
    if value.is_empty() {
        return Err(PathError::invalid_segment(kind, value, "must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(PathError::invalid_segment(kind, value, "relative segment"));
    }
    if value
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%'))
    {
        return Err(PathError::invalid_segment(
            kind,
            value,
            "contains a reserved character",
        ));
    }
    Ok(())
}

fn prefix_segments(prefix: &str) -> Result<Vec<String>, PathError> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Ok(Vec::new());
    }
    prefix
        .split('/')
        .map(|segment| validate_segment("prefix", segment).map(|()| segment.to_string()))
        .collect()
}

fn instance_segment(instance_id: Option<u32>) -> Result<String, PathError> {
    match instance_id.unwrap_or(PathResolver::DEFAULT_INSTANCE) {
        0 => Err(PathError::InvalidInstance),
        n => Ok(n.to_string()),
    }
}
