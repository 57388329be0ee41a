//! Application configuration management.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::types::SecretString;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage module settings as exposed by the host.
    #[serde(default)]
    pub module: ModuleSettings,
    /// URL signing configuration.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Host project configuration.
    #[serde(default)]
    pub project: ProjectConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Per-project storage settings.
///
/// Key names match the options the host's module configuration page exposes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModuleSettings {
    /// Enable Azure Blob Storage.
    pub azure_enabled: bool,
    /// Azure storage account name.
    pub azure_account_name: String,
    /// Azure storage account key (base64).
    pub azure_account_key: SecretString,
    /// Run against a local Azurite emulator.
    pub azure_sandbox: bool,
    /// Emulator endpoint as reached by this server.
    pub azure_sandbox_endpoint: String,
    /// Emulator endpoint as reached by the browser.
    pub azure_browser_endpoint: String,
    /// Upload prefix per container.
    pub azure_container_prefixes: HashMap<String, String>,
    /// Enable Google Cloud Storage.
    pub google_enabled: bool,
    /// Google Cloud project id.
    pub google_project_id: String,
    /// Service account key, as JSON.
    pub google_api_token: SecretString,
    /// Run against a local GCS emulator.
    pub google_sandbox: bool,
    /// Emulator endpoint.
    pub google_sandbox_endpoint: String,
    /// Upload prefix per bucket.
    pub google_bucket_prefixes: HashMap<String, String>,
    /// Do not show download links for uploaded files.
    pub disable_file_link: bool,
    /// Do not save the record automatically after an upload.
    pub disable_auto_save: bool,
}

/// URL signing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SigningConfig {
    /// Lifetime of upload URLs in seconds.
    #[serde(default = "default_upload_ttl")]
    pub upload_ttl_secs: u64,
    /// Lifetime of download URLs in seconds.
    #[serde(default = "default_download_ttl")]
    pub download_ttl_secs: u64,
    /// Upper bound for a single provider call in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_upload_ttl() -> u64 {
    3600 // 1 hour
}

fn default_download_ttl() -> u64 {
    600 // 10 minutes
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            upload_ttl_secs: default_upload_ttl(),
            download_ttl_secs: default_download_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SigningConfig {
    /// Longest accepted upload URL lifetime: 6 hours.
    pub const MAX_UPLOAD_TTL: u64 = 6 * 3600;
    /// Longest accepted download URL lifetime: 1 hour.
    pub const MAX_DOWNLOAD_TTL: u64 = 3600;

    /// Upload URL lifetime.
    #[must_use]
    pub fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_ttl_secs)
    }

    /// Download URL lifetime.
    #[must_use]
    pub fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.download_ttl_secs)
    }

    /// Provider call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Checks that every lifetime is non-zero and within its bound.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` describing the first bad value.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.upload_ttl_secs == 0 || self.upload_ttl_secs > Self::MAX_UPLOAD_TTL {
            return Err(AppError::Configuration(format!(
                "upload-ttl-secs must be between 1 and {}",
                Self::MAX_UPLOAD_TTL
            )));
        }
        if self.download_ttl_secs == 0 || self.download_ttl_secs > Self::MAX_DOWNLOAD_TTL {
            return Err(AppError::Configuration(format!(
                "download-ttl-secs must be between 1 and {}",
                Self::MAX_DOWNLOAD_TTL
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "request-timeout-secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Host project configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    /// Host project identifier.
    #[serde(default = "default_project_id")]
    pub project_id: String,
    /// Path to the project's data dictionary (JSON).
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            metadata_path: default_metadata_path(),
        }
    }
}

fn default_project_id() -> String {
    "default".to_string()
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("config/project.json")
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("FIELDVAULT")
                    .separator("__")
                    .convert_case(config::Case::Kebab),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parses configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid configuration.
    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
