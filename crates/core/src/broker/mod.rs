//! Signed URL issuance.
//!
//! The broker resolves a field's binding, builds or validates the object
//! key, delegates signing to the binding's platform adapter and reports the
//! issuance to the audit sink. Provider calls are bounded by the configured
//! request timeout; an elapsed timeout is a retryable `ProviderUnreachable`.

mod error;
mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldvault_shared::{AppConfig, Platform};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink};
use crate::path::{PathRequest, PathResolver, validate_stored_key};
use crate::platform::azure::{AzurePlatform, AzureSettings};
use crate::platform::google::{GooglePlatform, GoogleSettings};
use crate::platform::{PlatformError, StoragePlatform};
use crate::project::ProjectMetadata;
use crate::registry::{FieldBinding, FieldRegistry};

pub use error::BrokerError;
pub use types::{
    Action, ConnectionReport, ConnectionStatus, DEFAULT_CONTENT_TYPE, IssueRequest, IssuedUrl,
    RequestContext,
};

/// Issues signed upload and download URLs for bound fields.
pub struct SignedUrlBroker {
    registry: FieldRegistry,
    resolver: PathResolver,
    platforms: HashMap<Platform, Arc<dyn StoragePlatform>>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl std::fmt::Debug for SignedUrlBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut platforms: Vec<_> = self.platforms.keys().collect();
        platforms.sort();
        f.debug_struct("SignedUrlBroker")
            .field("fields", &self.registry.len())
            .field("platforms", &platforms)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SignedUrlBroker {
    /// Create a broker over the given adapters.
    ///
    /// Only fields annotated for a platform with an adapter are bound.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Configuration` if the field bindings are
    /// inconsistent.
    pub fn new(
        metadata: Arc<ProjectMetadata>,
        adapters: Vec<Arc<dyn StoragePlatform>>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let platforms: HashMap<Platform, Arc<dyn StoragePlatform>> = adapters
            .into_iter()
            .map(|adapter| (adapter.platform(), adapter))
            .collect();

        let mut enabled: Vec<Platform> = platforms.keys().copied().collect();
        enabled.sort();

        let registry = FieldRegistry::build(&metadata, &enabled, |platform, container| {
            platforms
                .get(&platform)
                .map(|adapter| adapter.container_prefix(container))
                .unwrap_or_default()
        })
        .map_err(|e| BrokerError::configuration(e.to_string()))?;

        info!(
            fields = registry.len(),
            platforms = ?enabled,
            "Field registry built"
        );

        Ok(Self {
            registry,
            resolver: PathResolver::new(metadata),
            platforms,
            audit,
            timeout,
        })
    }

    /// Build the broker and its adapters from configuration.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Configuration` if signing limits are invalid,
    /// an enabled platform lacks credentials, or the field bindings are
    /// inconsistent.
    pub fn from_config(
        config: &AppConfig,
        metadata: ProjectMetadata,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, BrokerError> {
        config
            .signing
            .validate()
            .map_err(|e| BrokerError::configuration(e.to_string()))?;

        let mut adapters: Vec<Arc<dyn StoragePlatform>> = Vec::new();

        if config.module.azure_enabled {
            let settings = AzureSettings::from_module(&config.module);
            let adapter = AzurePlatform::new(settings, &config.signing)
                .map_err(|e| BrokerError::from_platform(Platform::Azure, e))?;
            adapters.push(Arc::new(adapter));
        }

        if config.module.google_enabled {
            let settings = GoogleSettings::from_module(&config.module);
            let adapter = GooglePlatform::new(settings, &config.signing)
                .map_err(|e| BrokerError::from_platform(Platform::Google, e))?;
            adapters.push(Arc::new(adapter));
        }

        if adapters.is_empty() {
            warn!("No storage platform enabled, every field is unbound");
        }

        Self::new(
            Arc::new(metadata),
            adapters,
            audit,
            config.signing.request_timeout(),
        )
    }

    /// The field bindings.
    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// The project data dictionary.
    #[must_use]
    pub fn metadata(&self) -> &ProjectMetadata {
        self.resolver.metadata()
    }

    /// Adapter for `platform`, if enabled.
    #[must_use]
    pub fn platform(&self, platform: Platform) -> Option<&Arc<dyn StoragePlatform>> {
        self.platforms.get(&platform)
    }

    /// Issue one signed URL.
    ///
    /// Uploads get a freshly built object key; downloads take the stored key
    /// verbatim after validating it.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` for unbound fields without contacting any
    /// provider, `InvalidPath` for unsafe identifiers, and the translated
    /// provider failure otherwise.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        req: &IssueRequest,
    ) -> Result<IssuedUrl, BrokerError> {
        let (binding, adapter) = self.resolve(&req.field_name)?;

        let (signed, path) = match req.action {
            Action::Upload => {
                let content_type = req
                    .content_type
                    .as_deref()
                    .filter(|ct| !ct.trim().is_empty())
                    .unwrap_or(DEFAULT_CONTENT_TYPE);

                let key = self.resolver.build_path(&PathRequest {
                    prefix: &binding.upload_prefix,
                    field_name: &binding.field_name,
                    file_name: &req.file_name,
                    record_id: ctx.record_id.as_deref(),
                    event_id: ctx.event_id,
                    instance_id: ctx.instance_id,
                })?;

                let signed = self
                    .bounded(
                        adapter.as_ref(),
                        adapter.create_upload(&binding.container, key.as_str(), content_type),
                    )
                    .await?;
                (signed, key.into_string())
            }
            Action::Download => {
                validate_stored_key(&req.file_name)?;
                let signed = self
                    .bounded(
                        adapter.as_ref(),
                        adapter.download_link(&binding.container, &req.file_name),
                    )
                    .await?;
                (signed, req.file_name.clone())
            }
        };

        debug!(
            field = %binding.field_name,
            platform = %binding.platform,
            action = %req.action,
            path = %path,
            "Signed URL created"
        );

        let entry = AuditEntry {
            id: Uuid::now_v7(),
            actor: ctx.actor.clone(),
            field_name: binding.field_name.clone(),
            file_name: req.file_name.clone(),
            object_key: path.clone(),
            action: req.action,
            platform: binding.platform,
            record_id: ctx.record_id.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.audit.record(&entry).await {
            warn!(error = %e, field = %binding.field_name, "Audit sink failed, URL still issued");
        }

        Ok(IssuedUrl {
            signed,
            path,
            platform: binding.platform,
            container: binding.container.clone(),
        })
    }

    /// Check connectivity to `platform`.
    pub async fn test_connection(&self, platform: Platform) -> ConnectionReport {
        let Some(adapter) = self.platforms.get(&platform) else {
            return ConnectionReport {
                status: ConnectionStatus::Warning,
                message: format!("{platform} storage is not enabled"),
            };
        };

        let endpoint = adapter.endpoint();
        match self
            .bounded(adapter.as_ref(), adapter.test_connection())
            .await
        {
            Ok(true) => ConnectionReport {
                status: ConnectionStatus::Success,
                message: format!("Connected to {platform} storage at {endpoint}"),
            },
            Ok(false) => ConnectionReport {
                status: ConnectionStatus::Danger,
                message: format!("Could not connect to {platform} storage at {endpoint}"),
            },
            Err(e) => {
                warn!(platform = %platform, error = %e, "Connection test failed");
                ConnectionReport {
                    status: ConnectionStatus::Danger,
                    message: format!("Could not connect to {platform} storage at {endpoint}: {e}"),
                }
            }
        }
    }

    fn resolve(
        &self,
        field_name: &str,
    ) -> Result<(&FieldBinding, &Arc<dyn StoragePlatform>), BrokerError> {
        let binding = self
            .registry
            .resolve(field_name)
            .ok_or_else(|| BrokerError::not_configured(field_name))?;
        let adapter = self
            .platforms
            .get(&binding.platform)
            .ok_or_else(|| BrokerError::not_configured(field_name))?;
        Ok((binding, adapter))
    }

    async fn bounded<T>(
        &self,
        adapter: &dyn StoragePlatform,
        call: impl Future<Output = Result<T, PlatformError>>,
    ) -> Result<T, BrokerError> {
        let platform = adapter.platform();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| BrokerError::from_platform(platform, e)),
            Err(_) => {
                let endpoint = adapter.endpoint();
                warn!(platform = %platform, endpoint = %endpoint, "Provider call timed out");
                Err(BrokerError::timed_out(platform, &endpoint))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditError, MemoryAuditSink};
    use crate::path::PathError;
    use crate::platform::HttpMethod;
    use crate::platform::testing::FakePlatform;
    use crate::project::{EventDefinition, FieldMetadata};
    use async_trait::async_trait;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".to_string()))
        }
    }

    fn metadata(longitudinal: bool) -> Arc<ProjectMetadata> {
        Arc::new(ProjectMetadata {
            longitudinal,
            fields: vec![
                FieldMetadata {
                    name: "photo_field".to_string(),
                    form: "uploads".to_string(),
                    annotation: "@GOOGLE-STORAGE=study-bucket".to_string(),
                },
                FieldMetadata {
                    name: "consent_form".to_string(),
                    form: "consent".to_string(),
                    annotation: "@AZURE-STORAGE=consents".to_string(),
                },
                FieldMetadata {
                    name: "notes".to_string(),
                    form: "uploads".to_string(),
                    annotation: String::new(),
                },
            ],
            events: vec![EventDefinition {
                id: 7,
                unique_name: "baseline_arm_1".to_string(),
            }],
            repeating: Vec::new(),
        })
    }

    fn google() -> Arc<FakePlatform> {
        let mut fake = FakePlatform::new(Platform::Google);
        fake.prefix = "study-bucket-prefix".to_string();
        Arc::new(fake)
    }

    fn broker(
        metadata: Arc<ProjectMetadata>,
        adapter: Arc<FakePlatform>,
        audit: Arc<dyn AuditSink>,
    ) -> SignedUrlBroker {
        let adapters: Vec<Arc<dyn StoragePlatform>> = vec![adapter];
        SignedUrlBroker::new(metadata, adapters, audit, Duration::from_secs(5)).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
            .with_actor("alice")
            .with_record("42")
    }

    #[tokio::test]
    async fn test_unbound_field_is_not_configured_without_provider_calls() {
        let adapter = google();
        let broker = broker(metadata(false), adapter.clone(), Arc::new(MemoryAuditSink::new()));

        for field in ["notes", "missing_field"] {
            let err = broker
                .issue(&ctx(), &IssueRequest::upload(field, "scan.pdf"))
                .await
                .unwrap_err();
            assert!(matches!(err, BrokerError::NotConfigured { .. }));
        }
        assert_eq!(adapter.provider_calls(), 0);
    }

    #[tokio::test]
    async fn test_field_of_disabled_platform_is_not_configured() {
        let broker = broker(metadata(false), google(), Arc::new(MemoryAuditSink::new()));

        assert!(broker.registry().resolve("consent_form").is_none());
        let err = broker
            .issue(&ctx(), &IssueRequest::download("consent_form", "consents/42/x.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_google_upload_scenario() {
        let audit = Arc::new(MemoryAuditSink::new());
        let broker = broker(metadata(false), google(), audit.clone());

        let issued = broker
            .issue(
                &ctx(),
                &IssueRequest::upload("photo_field", "scan.pdf").with_content_type("application/pdf"),
            )
            .await
            .unwrap();

        assert_eq!(issued.path, "study-bucket-prefix/42/photo_field/scan.pdf");
        assert_eq!(issued.platform, Platform::Google);
        assert_eq!(issued.container, "study-bucket");
        assert_eq!(issued.signed.method, HttpMethod::Put);
        assert_eq!(
            issued.signed.headers.get("Content-Type").map(String::as_str),
            Some("application/pdf")
        );
        let ttl = (issued.signed.expires_at - Utc::now()).num_seconds();
        assert!((3590..=3600).contains(&ttl), "ttl was {ttl}");

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor.as_deref(), Some("alice"));
        assert_eq!(entries[0].action, Action::Upload);
        assert_eq!(entries[0].file_name, "scan.pdf");
        assert_eq!(entries[0].object_key, issued.path);
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_octet_stream() {
        let broker = broker(metadata(false), google(), Arc::new(MemoryAuditSink::new()));

        let issued = broker
            .issue(&ctx(), &IssueRequest::upload("photo_field", "scan.pdf"))
            .await
            .unwrap();

        assert_eq!(
            issued.signed.headers.get("Content-Type").map(String::as_str),
            Some(DEFAULT_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_longitudinal_upload_path() {
        let broker = broker(metadata(true), google(), Arc::new(MemoryAuditSink::new()));

        let issued = broker
            .issue(
                &ctx().with_event(7).with_instance(3),
                &IssueRequest::upload("photo_field", "scan.pdf"),
            )
            .await
            .unwrap();

        assert_eq!(
            issued.path,
            "study-bucket-prefix/42/photo_field/baseline_arm_1/3/scan.pdf"
        );
    }

    #[tokio::test]
    async fn test_upload_path_round_trips_to_download() {
        let adapter = google();
        let broker = broker(metadata(false), adapter.clone(), Arc::new(MemoryAuditSink::new()));

        let upload = broker
            .issue(&ctx(), &IssueRequest::upload("photo_field", "lab results.pdf"))
            .await
            .unwrap();
        let calls_after_upload = adapter.provider_calls();

        let download = broker
            .issue(&ctx(), &IssueRequest::download("photo_field", upload.path.clone()))
            .await
            .unwrap();

        assert_eq!(download.signed.method, HttpMethod::Get);
        assert_eq!(download.path, upload.path);
        assert_eq!(download.container, upload.container);
        let base = |url: &str| url.split('?').next().unwrap_or_default().to_string();
        assert_eq!(base(&download.signed.url), base(&upload.signed.url));
        assert_eq!(adapter.provider_calls(), calls_after_upload);
    }

    #[tokio::test]
    async fn test_download_rejects_unsafe_stored_path() {
        let broker = broker(metadata(false), google(), Arc::new(MemoryAuditSink::new()));

        let err = broker
            .issue(&ctx(), &IssueRequest::download("photo_field", "../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::InvalidPath(PathError::InvalidStoredPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsafe_record_id_is_invalid_path() {
        let adapter = google();
        let broker = broker(metadata(false), adapter.clone(), Arc::new(MemoryAuditSink::new()));

        let err = broker
            .issue(
                &RequestContext::default().with_record("../42"),
                &IssueRequest::upload("photo_field", "scan.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidPath(_)));
        assert_eq!(adapter.provider_calls(), 0);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_block_issuance() {
        let broker = broker(metadata(false), google(), Arc::new(FailingSink));

        let issued = broker
            .issue(&ctx(), &IssueRequest::upload("photo_field", "scan.pdf"))
            .await;
        assert!(issued.is_ok());
    }

    #[tokio::test]
    async fn test_slow_provider_is_retryable_unreachable() {
        let mut fake = FakePlatform::new(Platform::Google);
        fake.delay = Some(Duration::from_millis(500));
        let adapters: Vec<Arc<dyn StoragePlatform>> = vec![Arc::new(fake)];
        let broker = SignedUrlBroker::new(
            metadata(false),
            adapters,
            Arc::new(MemoryAuditSink::new()),
            Duration::from_millis(20),
        )
        .unwrap();

        let err = broker
            .issue(&ctx(), &IssueRequest::upload("photo_field", "scan.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ProviderUnreachable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_provider_refusal_is_permission_denied() {
        let mut fake = FakePlatform::new(Platform::Google);
        fake.fail_with = Some(|| {
            crate::platform::ProviderError::status(403, Some("forbidden".into()), "no create")
                .into()
        });
        let audit = Arc::new(MemoryAuditSink::new());
        let broker = broker(metadata(false), Arc::new(fake), audit.clone());

        let err = broker
            .issue(&ctx(), &IssueRequest::upload("photo_field", "scan.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ProviderPermissionDenied { .. }));
        assert!(audit.entries().is_empty());
    }

    #[tokio::test]
    async fn test_connection_reports() {
        let broker = broker(metadata(false), google(), Arc::new(MemoryAuditSink::new()));

        let ok = broker.test_connection(Platform::Google).await;
        assert_eq!(ok.status, ConnectionStatus::Success);
        assert!(ok.message.contains("https://storage.test"));

        let disabled = broker.test_connection(Platform::Azure).await;
        assert_eq!(disabled.status, ConnectionStatus::Warning);
    }

    #[tokio::test]
    async fn test_connection_failure_names_endpoint() {
        let mut fake = FakePlatform::new(Platform::Google);
        fake.fail_with =
            Some(|| crate::platform::ProviderError::Unreachable("refused".into()).into());
        let broker = broker(metadata(false), Arc::new(fake), Arc::new(MemoryAuditSink::new()));

        let report = broker.test_connection(Platform::Google).await;
        assert_eq!(report.status, ConnectionStatus::Danger);
        assert!(report.message.contains("https://storage.test"));
    }

    #[test]
    fn test_duplicate_binding_is_configuration_error() {
        let metadata = Arc::new(ProjectMetadata {
            fields: vec![FieldMetadata {
                name: "photo_field".to_string(),
                form: "uploads".to_string(),
                annotation: "@GOOGLE-STORAGE=study-bucket\n@AZURE-STORAGE=consents".to_string(),
            }],
            ..ProjectMetadata::default()
        });
        let adapters: Vec<Arc<dyn StoragePlatform>> = vec![
            Arc::new(FakePlatform::new(Platform::Google)),
            Arc::new(FakePlatform::new(Platform::Azure)),
        ];

        let err = SignedUrlBroker::new(
            metadata,
            adapters,
            Arc::new(MemoryAuditSink::new()),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
    }
}
