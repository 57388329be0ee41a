//! Storage platform adapters.
//!
//! Each adapter signs URLs for one provider and manages its buckets or
//! containers through a [`ContainerClient`]. The broker only sees the
//! [`StoragePlatform`] trait.

pub mod azure;
mod client;
mod error;
pub mod google;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldvault_shared::Platform;
use serde::Serialize;

pub use client::{ContainerClient, CreateOutcome, ensure_container_with, test_connection_with};
pub use error::{PlatformError, ProviderError};

/// HTTP method a signed URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Download.
    Get,
    /// Upload.
    Put,
}

impl HttpMethod {
    /// Method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presigned URL plus the headers the browser must send with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    /// The signed URL.
    pub url: String,
    /// HTTP method to use.
    pub method: HttpMethod,
    /// Headers required by the signature.
    pub headers: BTreeMap<String, String>,
    /// When the provider stops accepting the URL.
    pub expires_at: DateTime<Utc>,
}

/// Provider responses that mean "reachable, but not allowed to list".
///
/// A response matches when its status is listed and it either has no error
/// code or a listed one.
#[derive(Debug, Clone, Copy)]
pub struct ListDeniedPolicy {
    /// HTTP statuses returned for a refused list.
    pub statuses: &'static [u16],
    /// Provider error codes returned for a refused list.
    pub codes: &'static [&'static str],
}

impl ListDeniedPolicy {
    /// Whether `err` is a list refusal under this policy.
    #[must_use]
    pub fn matches(&self, err: &ProviderError) -> bool {
        match err {
            ProviderError::Status { status, code, .. } => {
                self.statuses.contains(status)
                    && code.as_deref().is_none_or(|c| self.codes.contains(&c))
            }
            _ => false,
        }
    }
}

/// A storage provider able to sign upload and download URLs.
#[async_trait]
pub trait StoragePlatform: Send + Sync {
    /// Which platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Service endpoint used by this server.
    fn endpoint(&self) -> String;

    /// Check connectivity and credentials.
    ///
    /// Being refused the container list still counts as connected.
    async fn test_connection(&self) -> Result<bool, PlatformError>;

    /// Create the bucket or container if it does not exist.
    async fn ensure_container(&self, container: &str) -> Result<(), PlatformError>;

    /// Sign a PUT URL for `path`, creating the container first if needed.
    async fn create_upload(
        &self,
        container: &str,
        path: &str,
        content_type: &str,
    ) -> Result<SignedUrl, PlatformError>;

    /// Sign a GET URL for a stored object. Never calls the provider.
    async fn download_link(&self, container: &str, path: &str)
    -> Result<SignedUrl, PlatformError>;

    /// Configured upload prefix for a container, empty if none.
    fn container_prefix(&self, container: &str) -> String;
}

/// Expiry instant `ttl` after `now`.
pub(crate) fn expires_after(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    now + chrono::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 1000))
}

/// Replace the server-side endpoint with the browser-reachable one.
pub(crate) fn rewrite_endpoint(url: &str, server: &str, browser: &str) -> String {
    let server = server.trim_end_matches('/');
    let browser = browser.trim_end_matches('/');
    if server.is_empty() || browser.is_empty() {
        return url.to_string();
    }
    url.strip_prefix(server)
        .map_or_else(|| url.to_string(), |rest| format!("{browser}{rest}"))
}

/// Percent-encode each segment of an object key for use in a URL path.
pub(crate) fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
