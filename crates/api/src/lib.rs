//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST API routes for signed URL issuance and record links
//! - The acting user extractor
//! - The JSON error envelope

pub mod error;
pub mod middleware;
pub mod routes;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use fieldvault_core::broker::{RequestContext, SignedUrlBroker};
use fieldvault_core::record::{
    InMemoryRecordRepository, LinkSet, RecordError, RecordLinkService, RecordRepository,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Record operations behind the record routes.
///
/// Implemented for every [`RecordLinkService`], so the host's record store
/// is chosen where the state is built.
#[async_trait]
pub trait RecordLinks: Send + Sync {
    /// Whether download links are hidden.
    fn links_disabled(&self) -> bool;

    /// Save uploaded keys into a record and return its links.
    async fn save_files(
        &self,
        ctx: &RequestContext,
        files_path: BTreeMap<String, String>,
    ) -> Result<LinkSet, RecordError>;

    /// Signed download links for every stored file of a record.
    async fn download_links(&self, ctx: &RequestContext) -> Result<LinkSet, RecordError>;
}

#[async_trait]
impl<R: RecordRepository + 'static> RecordLinks for RecordLinkService<R> {
    fn links_disabled(&self) -> bool {
        RecordLinkService::links_disabled(self)
    }

    async fn save_files(
        &self,
        ctx: &RequestContext,
        files_path: BTreeMap<String, String>,
    ) -> Result<LinkSet, RecordError> {
        RecordLinkService::save_files(self, ctx, files_path).await
    }

    async fn download_links(&self, ctx: &RequestContext) -> Result<LinkSet, RecordError> {
        RecordLinkService::download_links(self, ctx).await
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Signed URL broker.
    pub broker: Arc<SignedUrlBroker>,
    /// Saves stored keys into records and lists their links.
    pub records: Arc<dyn RecordLinks>,
    /// Whether the host page should skip saving the record after an upload.
    pub disable_auto_save: bool,
}

impl AppState {
    /// Create state around a broker and the host's record store.
    #[must_use]
    pub fn new(
        broker: Arc<SignedUrlBroker>,
        records: Arc<dyn RecordLinks>,
        disable_auto_save: bool,
    ) -> Self {
        Self {
            broker,
            records,
            disable_auto_save,
        }
    }

    /// Create state with a process-local record store.
    ///
    /// Saved keys are lost when the process exits.
    #[must_use]
    pub fn in_memory(
        broker: Arc<SignedUrlBroker>,
        disable_file_link: bool,
        disable_auto_save: bool,
    ) -> Self {
        let records = RecordLinkService::new(
            broker.clone(),
            Arc::new(InMemoryRecordRepository::new()),
            disable_file_link,
        );
        Self::new(broker, Arc::new(records), disable_auto_save)
    }
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
