//! Fieldvault API Server
//!
//! Main entry point for the signed URL broker service.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldvault_api::{AppState, create_router};
use fieldvault_core::audit::TracingAuditSink;
use fieldvault_core::broker::SignedUrlBroker;
use fieldvault_core::project::ProjectMetadata;
use fieldvault_core::record::{InMemoryRecordRepository, RecordLinkService};
use fieldvault_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    // Load the project's data dictionary
    let metadata = ProjectMetadata::from_json_file(&config.project.metadata_path)
        .with_context(|| {
            format!(
                "failed to load project metadata from {}",
                config.project.metadata_path.display()
            )
        })?;
    info!(
        project_id = %config.project.project_id,
        fields = metadata.fields.len(),
        longitudinal = metadata.longitudinal,
        "Project metadata loaded"
    );

    // Build the broker and its platform adapters
    let broker = SignedUrlBroker::from_config(&config, metadata, Arc::new(TracingAuditSink))?;
    info!(
        azure = config.module.azure_enabled,
        google = config.module.google_enabled,
        upload_ttl_secs = config.signing.upload_ttl_secs,
        download_ttl_secs = config.signing.download_ttl_secs,
        "Signed URL broker configured"
    );

    // Record store; swap in the host's repository here
    let broker = Arc::new(broker);
    let records = RecordLinkService::new(
        broker.clone(),
        Arc::new(InMemoryRecordRepository::new()),
        config.module.disable_file_link,
    );
    warn!("Using the in-process record store, saved file keys do not survive a restart");

    // Create application state
    let state = AppState::new(broker, Arc::new(records), config.module.disable_auto_save);

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
