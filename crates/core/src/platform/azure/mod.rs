//! Azure Blob Storage adapter.
//!
//! Upload URLs carry a service SAS with `racwd` permissions and come with an
//! `Authorization` header signed over the request headers. Download URLs
//! carry a read-only SAS. Local testing runs against Azurite:
//!
//! ```text
//! docker run -p 10000:10000 mcr.microsoft.com/azure-storage/azurite \
//!     azurite-blob --blobHost 0.0.0.0 --blobPort 10000
//! ```

mod client;
mod signer;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldvault_shared::{ModuleSettings, Platform, SecretString, SigningConfig};
use reqwest::Url;
use tracing::debug;

use super::{
    ContainerClient, HttpMethod, ListDeniedPolicy, PlatformError, SignedUrl, StoragePlatform,
    encode_key_path, ensure_container_with, expires_after, rewrite_endpoint,
    test_connection_with,
};

pub use client::AzureBlobClient;
pub use signer::{
    BlobSas, STORAGE_VERSION, SharedKeyCredential, format_http_date, format_sas_time,
    shared_key_string_to_sign,
};

/// Azurite's well-known development account.
pub const DEV_STORE_ACCOUNT: &str = "devstoreaccount1";

/// Azurite's well-known development account key.
pub const DEV_STORE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Azurite's default blob endpoint.
pub const EMULATOR_ENDPOINT: &str = "http://127.0.0.1:10000";

/// Permissions granted to upload URLs.
const UPLOAD_PERMISSIONS: &str = "racwd";

/// Permissions granted to download URLs.
const DOWNLOAD_PERMISSIONS: &str = "r";

/// SAS start times are backdated to tolerate clock skew.
const CLOCK_SKEW_MINUTES: i64 = 5;

/// Azure answers a refused container list with 403 and one of these codes.
pub const LIST_DENIED: ListDeniedPolicy = ListDeniedPolicy {
    statuses: &[403],
    codes: &[
        "AuthorizationPermissionMismatch",
        "AuthorizationFailure",
        "InsufficientAccountPermissions",
    ],
};

/// Connection settings for one storage account.
#[derive(Debug, Clone, Default)]
pub struct AzureSettings {
    /// Storage account name.
    pub account_name: String,
    /// Base64 account key.
    pub account_key: SecretString,
    /// Whether to run against the emulator.
    pub sandbox: bool,
    /// Emulator endpoint as reached by this server.
    pub sandbox_endpoint: String,
    /// Emulator endpoint as reached by the browser.
    pub browser_endpoint: String,
    /// Upload prefix per container.
    pub container_prefixes: HashMap<String, String>,
}

impl AzureSettings {
    /// Settings from the module configuration, with emulator defaults filled
    /// in for sandbox mode.
    #[must_use]
    pub fn from_module(module: &ModuleSettings) -> Self {
        let mut settings = Self {
            account_name: module.azure_account_name.clone(),
            account_key: module.azure_account_key.clone(),
            sandbox: module.azure_sandbox,
            sandbox_endpoint: module.azure_sandbox_endpoint.clone(),
            browser_endpoint: module.azure_browser_endpoint.clone(),
            container_prefixes: module.azure_container_prefixes.clone(),
        };

        if settings.sandbox {
            if settings.account_name.is_empty() {
                settings.account_name = DEV_STORE_ACCOUNT.to_string();
            }
            if settings.account_key.is_empty() {
                settings.account_key = SecretString::new(DEV_STORE_KEY);
            }
            if settings.sandbox_endpoint.is_empty() {
                settings.sandbox_endpoint = EMULATOR_ENDPOINT.to_string();
            }
        }
        settings
    }

    /// Blob service endpoint. Path-style in sandbox mode.
    #[must_use]
    pub fn blob_endpoint(&self) -> String {
        if self.sandbox {
            format!(
                "{}/{}",
                self.sandbox_endpoint.trim_end_matches('/'),
                self.account_name
            )
        } else {
            format!("https://{}.blob.core.windows.net", self.account_name)
        }
    }
}

/// Lower-case and validate a container name.
///
/// Container names are 3-63 characters of lowercase letters, digits and
/// hyphens, start and end with a letter or digit, and never contain `--`.
///
/// # Errors
///
/// Returns `PlatformError::InvalidContainer` if the name cannot be used.
pub fn normalize_container_name(name: &str) -> Result<String, PlatformError> {
    let name = name.trim().to_ascii_lowercase();

    if !(3..=63).contains(&name.len()) {
        return Err(PlatformError::invalid_container(
            name,
            "must be 3 to 63 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PlatformError::invalid_container(
            name,
            "only letters, digits and hyphens are allowed",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(PlatformError::invalid_container(
            name,
            "hyphens must separate letters or digits",
        ));
    }
    Ok(name)
}

/// Azure Blob Storage adapter.
pub struct AzurePlatform {
    settings: AzureSettings,
    credential: Arc<SharedKeyCredential>,
    client: Arc<dyn ContainerClient>,
    upload_ttl: Duration,
    download_ttl: Duration,
}

impl AzurePlatform {
    /// Create the adapter and its REST client.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the credentials are unusable.
    pub fn new(settings: AzureSettings, signing: &SigningConfig) -> Result<Self, PlatformError> {
        let credential = Arc::new(SharedKeyCredential::new(
            &settings.account_name,
            &settings.account_key,
        )?);
        let client = Arc::new(AzureBlobClient::new(
            settings.blob_endpoint(),
            Arc::clone(&credential),
            signing.request_timeout(),
        )?);

        Ok(Self {
            settings,
            credential,
            client,
            upload_ttl: signing.upload_ttl(),
            download_ttl: signing.download_ttl(),
        })
    }

    /// Replace the container client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ContainerClient>) -> Self {
        self.client = client;
        self
    }

    /// The adapter's settings.
    #[must_use]
    pub fn settings(&self) -> &AzureSettings {
        &self.settings
    }

    /// Sign an upload URL and its headers as of `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`PlatformError`] if the container name is invalid or
    /// signing fails.
    pub fn sign_upload(
        &self,
        container: &str,
        path: &str,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, PlatformError> {
        let container = normalize_container_name(container)?;
        let blob = path.trim_start_matches('/');
        let expires_at = expires_after(now, self.upload_ttl);
        let url = self.blob_url(&container, blob, UPLOAD_PERMISSIONS, now, expires_at)?;

        let mut headers = BTreeMap::new();
        headers.insert("x-ms-date".to_string(), format_http_date(now));
        headers.insert("x-ms-version".to_string(), STORAGE_VERSION.to_string());
        headers.insert("x-ms-blob-type".to_string(), "BlockBlob".to_string());
        headers.insert("Content-Type".to_string(), content_type.to_string());
        let authorization = self.credential.authorization("PUT", &url, &headers)?;
        headers.insert("Authorization".to_string(), authorization);

        Ok(SignedUrl {
            url: self.browser_url(url.as_str()),
            method: HttpMethod::Put,
            headers,
            expires_at,
        })
    }

    /// Sign a read-only URL for a stored blob as of `now`.
    ///
    /// `path` is the stored key exactly as it was uploaded.
    ///
    /// # Errors
    ///
    /// Returns a [`PlatformError`] if the container name is invalid or
    /// signing fails.
    pub fn sign_download(
        &self,
        container: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, PlatformError> {
        let container = normalize_container_name(container)?;
        let blob = path.trim_start_matches('/');
        let expires_at = expires_after(now, self.download_ttl);
        let url = self.blob_url(&container, blob, DOWNLOAD_PERMISSIONS, now, expires_at)?;

        Ok(SignedUrl {
            url: self.browser_url(url.as_str()),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            expires_at,
        })
    }

    fn blob_url(
        &self,
        container: &str,
        blob: &str,
        permissions: &str,
        now: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<Url, PlatformError> {
        let sas = self.credential.blob_sas(&BlobSas {
            container,
            blob,
            permissions,
            start: now - chrono::Duration::minutes(CLOCK_SKEW_MINUTES),
            expiry,
        })?;
        let raw = format!(
            "{}/{container}/{}?{sas}",
            self.settings.blob_endpoint(),
            encode_key_path(blob)
        );
        Url::parse(&raw).map_err(|e| PlatformError::signing(format!("invalid blob url: {e}")))
    }

    fn browser_url(&self, url: &str) -> String {
        if self.settings.sandbox {
            rewrite_endpoint(
                url,
                &self.settings.sandbox_endpoint,
                &self.settings.browser_endpoint,
            )
        } else {
            url.to_string()
        }
    }
}

#[async_trait]
impl StoragePlatform for AzurePlatform {
    fn platform(&self) -> Platform {
        Platform::Azure
    }

    fn endpoint(&self) -> String {
        self.settings.blob_endpoint()
    }

    async fn test_connection(&self) -> Result<bool, PlatformError> {
        Ok(test_connection_with(self.client.as_ref(), &LIST_DENIED).await?)
    }

    async fn ensure_container(&self, container: &str) -> Result<(), PlatformError> {
        let container = normalize_container_name(container)?;
        ensure_container_with(self.client.as_ref(), &LIST_DENIED, &container).await?;
        Ok(())
    }

    async fn create_upload(
        &self,
        container: &str,
        path: &str,
        content_type: &str,
    ) -> Result<SignedUrl, PlatformError> {
        self.ensure_container(container).await?;
        let signed = self.sign_upload(container, path, content_type, Utc::now())?;
        debug!(container = %container, path = %path, "Signed Azure upload URL");
        Ok(signed)
    }

    async fn download_link(
        &self,
        container: &str,
        path: &str,
    ) -> Result<SignedUrl, PlatformError> {
        self.sign_download(container, path, Utc::now())
    }

    fn container_prefix(&self, container: &str) -> String {
        let prefixes = &self.settings.container_prefixes;
        prefixes
            .get(container)
            .or_else(|| prefixes.get(&container.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::InMemoryContainerClient;
    use chrono::TimeZone;
    use rstest::rstest;

    fn sandbox_settings() -> AzureSettings {
        AzureSettings::from_module(&ModuleSettings {
            azure_enabled: true,
            azure_sandbox: true,
            azure_sandbox_endpoint: "http://azurite:10000".to_string(),
            azure_browser_endpoint: "http://localhost:10000".to_string(),
            ..ModuleSettings::default()
        })
    }

    fn production_settings() -> AzureSettings {
        AzureSettings {
            account_name: "studyaccount".to_string(),
            account_key: SecretString::new("SmVmZQ=="),
            ..AzureSettings::default()
        }
    }

    fn platform(settings: AzureSettings, client: Arc<InMemoryContainerClient>) -> AzurePlatform {
        AzurePlatform::new(settings, &SigningConfig::default())
            .unwrap()
            .with_client(client)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn query(url: &str) -> BTreeMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_sandbox_defaults() {
        let settings = AzureSettings::from_module(&ModuleSettings {
            azure_sandbox: true,
            ..ModuleSettings::default()
        });
        assert_eq!(settings.account_name, DEV_STORE_ACCOUNT);
        assert_eq!(settings.account_key.expose(), DEV_STORE_KEY);
        assert_eq!(settings.blob_endpoint(), "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn test_production_endpoint() {
        assert_eq!(
            production_settings().blob_endpoint(),
            "https://studyaccount.blob.core.windows.net"
        );
    }

    #[test]
    fn test_container_names_are_lower_cased() {
        assert_eq!(normalize_container_name("MyContainer").unwrap(), "mycontainer");
        assert_eq!(
            normalize_container_name("MyContainer").unwrap(),
            normalize_container_name("mycontainer").unwrap()
        );
        assert!(normalize_container_name("ab").is_err());
        assert!(normalize_container_name("my_container").is_err());
        assert!(normalize_container_name("-leading").is_err());
        assert!(normalize_container_name("double--hyphen").is_err());
    }

    #[tokio::test]
    async fn test_mixed_case_names_reach_same_container() {
        let client = Arc::new(InMemoryContainerClient::new());
        let azure = platform(production_settings(), Arc::clone(&client));

        azure.ensure_container("MyContainer").await.unwrap();
        azure.ensure_container("mycontainer").await.unwrap();

        assert_eq!(client.containers(), vec!["mycontainer".to_string()]);
    }

    #[test]
    fn test_sign_upload() {
        let azure = platform(production_settings(), Arc::new(InMemoryContainerClient::new()));
        let signed = azure
            .sign_upload("Consents", "uploads/42/consent_pdf/my%20form.pdf", "application/pdf", now())
            .unwrap();

        assert_eq!(signed.method, HttpMethod::Put);
        assert!(signed.url.starts_with(
            "https://studyaccount.blob.core.windows.net/consents/uploads/42/consent_pdf/my%2520form.pdf?"
        ));
        let params = query(&signed.url);
        assert_eq!(params["sp"], "racwd");
        assert_eq!(params["sr"], "b");
        assert_eq!(params["st"], "2024-05-01T11:55:00Z");
        assert_eq!(params["se"], "2024-05-01T13:00:00Z");
        assert_eq!(signed.expires_at, now() + chrono::Duration::hours(1));

        assert_eq!(signed.headers["x-ms-blob-type"], "BlockBlob");
        assert_eq!(signed.headers["x-ms-version"], STORAGE_VERSION);
        assert_eq!(signed.headers["x-ms-date"], "Wed, 01 May 2024 12:00:00 GMT");
        assert_eq!(signed.headers["Content-Type"], "application/pdf");
        assert!(signed.headers["Authorization"].starts_with("SharedKey studyaccount:"));
    }

    #[test]
    fn test_sign_download_is_read_only() {
        let azure = platform(production_settings(), Arc::new(InMemoryContainerClient::new()));
        let signed = azure
            .sign_download("consents", "uploads/42/consent_pdf/form.pdf", now())
            .unwrap();

        assert_eq!(signed.method, HttpMethod::Get);
        assert!(signed.headers.is_empty());
        assert!(signed.url.starts_with(
            "https://studyaccount.blob.core.windows.net/consents/uploads/42/consent_pdf/form.pdf?"
        ));
        assert_eq!(query(&signed.url)["sp"], "r");
        assert_eq!(signed.expires_at, now() + chrono::Duration::minutes(10));
    }

    #[test]
    fn test_sandbox_urls_use_browser_endpoint() {
        let azure = platform(sandbox_settings(), Arc::new(InMemoryContainerClient::new()));

        let upload = azure
            .sign_upload("consents", "42/consent_pdf/form.pdf", "application/pdf", now())
            .unwrap();
        assert!(upload
            .url
            .starts_with("http://localhost:10000/devstoreaccount1/consents/42/consent_pdf/form.pdf?"));

        let download = azure
            .sign_download("consents", "42/consent_pdf/form.pdf", now())
            .unwrap();
        assert!(download
            .url
            .starts_with("http://localhost:10000/devstoreaccount1/consents/"));
    }

    #[tokio::test]
    async fn test_download_link_makes_no_provider_call() {
        let client = Arc::new(InMemoryContainerClient::new());
        let azure = platform(production_settings(), Arc::clone(&client));

        azure
            .download_link("consents", "42/consent_pdf/form.pdf")
            .await
            .unwrap();
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_upload_creates_missing_container() {
        let client = Arc::new(InMemoryContainerClient::new());
        let azure = platform(production_settings(), Arc::clone(&client));

        let signed = azure
            .create_upload("Consents", "42/consent_pdf/form.pdf", "application/pdf")
            .await
            .unwrap();

        assert_eq!(signed.method, HttpMethod::Put);
        assert_eq!(client.containers(), vec!["consents".to_string()]);
    }

    #[test]
    fn test_container_prefix() {
        let mut settings = production_settings();
        settings
            .container_prefixes
            .insert("consents".to_string(), "site-a".to_string());
        let azure = platform(settings, Arc::new(InMemoryContainerClient::new()));

        assert_eq!(azure.container_prefix("consents"), "site-a");
        assert_eq!(azure.container_prefix("Consents"), "site-a");
        assert_eq!(azure.container_prefix("other"), "");
    }

    #[rstest]
    #[case::prefix_equals_container("consents/42/consent_pdf/form.pdf")]
    #[case::record_equals_container("uploads/consents/consent_pdf/form.pdf")]
    #[case::plain("42/consent_pdf/form.pdf")]
    fn test_download_signs_uploaded_key(#[case] key: &str) {
        let azure = platform(production_settings(), Arc::new(InMemoryContainerClient::new()));

        let upload = azure
            .sign_upload("consents", key, "application/pdf", now())
            .unwrap();
        let download = azure.sign_download("consents", key, now()).unwrap();

        let blob = |url: &str| Url::parse(url).unwrap().path().to_string();
        assert_eq!(blob(&upload.url), blob(&download.url));
        assert_eq!(blob(&download.url), format!("/consents/{key}"));
    }
}
