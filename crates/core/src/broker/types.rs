//! Broker request and response types.

use fieldvault_shared::Platform;
use serde::{Deserialize, Serialize};

use crate::platform::SignedUrl;

/// Default content type for uploads that name none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What the signed URL allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// PUT a new object.
    Upload,
    /// GET a stored object.
    Download,
}

impl Action {
    /// Lower-case action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking, and for which record, event and repeat instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Acting user.
    pub actor: Option<String>,
    /// Record id; `None` for records not saved yet.
    pub record_id: Option<String>,
    /// Event id.
    pub event_id: Option<u64>,
    /// Repeat instance.
    pub instance_id: Option<u32>,
}

impl RequestContext {
    /// Set the acting user.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the record id.
    #[must_use]
    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Set the event id.
    #[must_use]
    pub fn with_event(mut self, event_id: u64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Set the repeat instance.
    #[must_use]
    pub fn with_instance(mut self, instance_id: u32) -> Self {
        self.instance_id = Some(instance_id);
        self
    }
}

/// A request for one signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Upload or download.
    pub action: Action,
    /// Field the file belongs to.
    pub field_name: String,
    /// Original file name for uploads; the stored object key for downloads.
    pub file_name: String,
    /// Upload content type.
    pub content_type: Option<String>,
}

impl IssueRequest {
    /// Request an upload URL.
    #[must_use]
    pub fn upload(field_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            action: Action::Upload,
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: None,
        }
    }

    /// Request a download URL for a stored object key.
    #[must_use]
    pub fn download(field_name: impl Into<String>, stored_path: impl Into<String>) -> Self {
        Self {
            action: Action::Download,
            field_name: field_name.into(),
            file_name: stored_path.into(),
            content_type: None,
        }
    }

    /// Set the upload content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A signed URL and where it points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedUrl {
    /// The signed URL with its method, headers and expiry.
    #[serde(flatten)]
    pub signed: SignedUrl,
    /// Object key within the bucket or container.
    pub path: String,
    /// Platform that signed the URL.
    pub platform: Platform,
    /// Bucket or container.
    pub container: String,
}

/// Outcome level of a connection test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connected.
    Success,
    /// Not tested, e.g. the platform is disabled.
    Warning,
    /// Could not connect.
    Danger,
}

/// Result of testing a platform connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    /// Outcome level.
    pub status: ConnectionStatus,
    /// Human readable detail.
    pub message: String,
}
