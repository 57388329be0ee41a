//! Google Cloud Storage adapter.
//!
//! URLs are V4 presigned through OpenDAL's GCS service with the configured
//! service-account key. Buckets are listed and created through the JSON API.
//! In sandbox mode without a key (e.g. fake-gcs-server) URLs are plain
//! path-style object URLs on the emulator.

mod client;
mod credentials;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use dashmap::DashMap;
use fieldvault_shared::{ModuleSettings, Platform, SecretString, SigningConfig};
use opendal::{Operator, services};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{
    ContainerClient, HttpMethod, ListDeniedPolicy, PlatformError, SignedUrl, StoragePlatform,
    encode_key_path, ensure_container_with, expires_after, test_connection_with,
};

pub use client::GcsBucketClient;
pub use credentials::{STORAGE_SCOPE, ServiceAccountKey, TokenSource};

/// Production Cloud Storage endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// fake-gcs-server's default endpoint.
pub const EMULATOR_ENDPOINT: &str = "http://127.0.0.1:4443";

/// Google answers a refused bucket list with 403 and one of these reasons.
pub const LIST_DENIED: ListDeniedPolicy = ListDeniedPolicy {
    statuses: &[403],
    codes: &["forbidden", "insufficientPermissions", "accessDenied"],
};

/// Connection settings for one project.
#[derive(Debug, Clone, Default)]
pub struct GoogleSettings {
    /// Cloud project that owns the buckets.
    pub project_id: String,
    /// Service-account key JSON.
    pub api_token: SecretString,
    /// Whether to run against an emulator.
    pub sandbox: bool,
    /// Emulator endpoint.
    pub sandbox_endpoint: String,
    /// Upload prefix per bucket.
    pub bucket_prefixes: HashMap<String, String>,
}

impl GoogleSettings {
    /// Settings from the module configuration.
    #[must_use]
    pub fn from_module(module: &ModuleSettings) -> Self {
        let mut settings = Self {
            project_id: module.google_project_id.clone(),
            api_token: module.google_api_token.clone(),
            sandbox: module.google_sandbox,
            sandbox_endpoint: module.google_sandbox_endpoint.clone(),
            bucket_prefixes: module.google_bucket_prefixes.clone(),
        };
        if settings.sandbox && settings.sandbox_endpoint.is_empty() {
            settings.sandbox_endpoint = EMULATOR_ENDPOINT.to_string();
        }
        settings
    }

    /// Storage endpoint in use.
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.sandbox {
            self.sandbox_endpoint.trim_end_matches('/').to_string()
        } else {
            DEFAULT_ENDPOINT.to_string()
        }
    }
}

/// Google Cloud Storage adapter.
pub struct GooglePlatform {
    settings: GoogleSettings,
    /// Base64 key JSON, as OpenDAL expects it.
    credential: Option<SecretString>,
    client: Arc<dyn ContainerClient>,
    operators: DashMap<String, Operator>,
    upload_ttl: Duration,
    download_ttl: Duration,
}

impl GooglePlatform {
    /// Create the adapter and its REST client.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the key is missing outside
    /// sandbox mode, malformed, or no project id is known.
    pub fn new(settings: GoogleSettings, signing: &SigningConfig) -> Result<Self, PlatformError> {
        let key = if settings.api_token.is_empty() {
            if !settings.sandbox {
                return Err(PlatformError::configuration(
                    "google-api-token is required outside sandbox mode",
                ));
            }
            None
        } else {
            Some(ServiceAccountKey::from_json(&settings.api_token)?)
        };

        let project_id = if settings.project_id.is_empty() {
            key.as_ref()
                .and_then(|k| k.project_id.clone())
                .unwrap_or_default()
        } else {
            settings.project_id.clone()
        };
        if project_id.is_empty() {
            return Err(PlatformError::configuration("google-project-id is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(signing.request_timeout())
            .build()
            .map_err(|e| PlatformError::configuration(e.to_string()))?;
        let tokens = key
            .filter(|_| !settings.sandbox)
            .map(|k| Arc::new(TokenSource::new(k, http)));

        let client = Arc::new(GcsBucketClient::new(
            settings.endpoint(),
            project_id,
            tokens,
            signing.request_timeout(),
        )?);

        let credential = (!settings.api_token.is_empty())
            .then(|| SecretString::new(STANDARD.encode(settings.api_token.expose())));

        Ok(Self {
            settings,
            credential,
            client,
            operators: DashMap::new(),
            upload_ttl: signing.upload_ttl(),
            download_ttl: signing.download_ttl(),
        })
    }

    /// Replace the bucket client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ContainerClient>) -> Self {
        self.client = client;
        self
    }

    /// The adapter's settings.
    #[must_use]
    pub fn settings(&self) -> &GoogleSettings {
        &self.settings
    }

    /// Operator for `bucket`, built on first use.
    fn operator(&self, bucket: &str) -> Result<Operator, PlatformError> {
        if let Some(operator) = self.operators.get(bucket) {
            return Ok(operator.clone());
        }

        let endpoint = self.settings.endpoint();
        let mut builder = services::Gcs::default()
            .bucket(bucket)
            .endpoint(&endpoint)
            .root("/");
        if let Some(credential) = &self.credential {
            builder = builder.credential(credential.expose());
        }

        let operator = Operator::new(builder)?.finish();
        debug!(bucket = %bucket, "Built GCS operator");
        Ok(self
            .operators
            .entry(bucket.to_string())
            .or_insert(operator)
            .clone())
    }

    /// Plain emulator URL, used when no key is configured in sandbox mode.
    fn emulator_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/{bucket}/{}",
            self.settings.endpoint(),
            encode_key_path(path)
        )
    }

    fn unsigned(&self) -> bool {
        self.credential.is_none()
    }
}

#[async_trait]
impl StoragePlatform for GooglePlatform {
    fn platform(&self) -> Platform {
        Platform::Google
    }

    fn endpoint(&self) -> String {
        self.settings.endpoint()
    }

    async fn test_connection(&self) -> Result<bool, PlatformError> {
        Ok(test_connection_with(self.client.as_ref(), &LIST_DENIED).await?)
    }

    async fn ensure_container(&self, container: &str) -> Result<(), PlatformError> {
        ensure_container_with(self.client.as_ref(), &LIST_DENIED, container).await?;
        Ok(())
    }

    async fn create_upload(
        &self,
        container: &str,
        path: &str,
        content_type: &str,
    ) -> Result<SignedUrl, PlatformError> {
        self.ensure_container(container).await?;
        let path = path.trim_start_matches('/');
        let expires_at = expires_after(Utc::now(), self.upload_ttl);

        let mut headers = BTreeMap::new();
        let url = if self.unsigned() {
            self.emulator_url(container, path)
        } else {
            let presigned = self
                .operator(container)?
                .presign_write_with(path, self.upload_ttl)
                .content_type(content_type)
                .await?;
            for (name, value) in presigned.header() {
                if *name == CONTENT_TYPE {
                    continue;
                }
                if let Ok(value) = value.to_str() {
                    headers.insert(name.as_str().to_string(), value.to_string());
                }
            }
            presigned.uri().to_string()
        };
        headers.insert("Content-Type".to_string(), content_type.to_string());

        debug!(bucket = %container, path = %path, "Signed Google upload URL");
        Ok(SignedUrl {
            url,
            method: HttpMethod::Put,
            headers,
            expires_at,
        })
    }

    async fn download_link(
        &self,
        container: &str,
        path: &str,
    ) -> Result<SignedUrl, PlatformError> {
        let path = path.trim_start_matches('/');
        let expires_at = expires_after(Utc::now(), self.download_ttl);

        let url = if self.unsigned() {
            self.emulator_url(container, path)
        } else {
            self.operator(container)?
                .presign_read(path, self.download_ttl)
                .await?
                .uri()
                .to_string()
        };

        Ok(SignedUrl {
            url,
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            expires_at,
        })
    }

    fn container_prefix(&self, container: &str) -> String {
        self.settings
            .bucket_prefixes
            .get(container)
            .cloned()
            .unwrap_or_default()
    }
}
