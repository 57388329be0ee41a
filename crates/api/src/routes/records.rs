//! Record file keys and their download links.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use fieldvault_core::broker::RequestContext;
use fieldvault_core::record::LinkSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::{Actor, ApiJson, ApiQuery};

/// Creates the record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/records", post(save_files))
        .route("/records/{record_id}/links", get(record_links))
}

/// Request body for saving uploaded keys into a record.
#[derive(Debug, Deserialize)]
pub struct SaveFilesRequest {
    /// Record id; a new one is reserved when absent.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Event id.
    #[serde(default)]
    pub event_id: Option<u64>,
    /// Repeat instance.
    #[serde(default)]
    pub instance_id: Option<u32>,
    /// `field -> "key1,key2"`.
    pub files_path: BTreeMap<String, String>,
}

/// Query parameters for listing links.
#[derive(Debug, Default, Deserialize)]
pub struct LinksQuery {
    /// Event id.
    #[serde(default)]
    pub event_id: Option<u64>,
    /// Repeat instance.
    #[serde(default)]
    pub instance_id: Option<u32>,
}

/// Record links response.
#[derive(Debug, Serialize)]
pub struct LinksResponse {
    /// Always `success`.
    pub status: &'static str,
    /// The record's links.
    #[serde(flatten)]
    pub set: LinkSet,
}

impl From<LinkSet> for LinksResponse {
    fn from(set: LinkSet) -> Self {
        Self {
            status: "success",
            set,
        }
    }
}

/// POST `/records`
async fn save_files(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(payload): ApiJson<SaveFilesRequest>,
) -> Result<Json<LinksResponse>, ApiError> {
    let ctx = RequestContext {
        actor,
        record_id: payload.record_id,
        event_id: payload.event_id,
        instance_id: payload.instance_id,
    };

    let set = state.records.save_files(&ctx, payload.files_path).await?;
    info!(record_id = %set.record_id, "Record files saved");

    Ok(Json(set.into()))
}

/// GET `/records/{record_id}/links`
async fn record_links(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(record_id): Path<String>,
    ApiQuery(query): ApiQuery<LinksQuery>,
) -> Result<Json<LinksResponse>, ApiError> {
    let ctx = RequestContext {
        actor,
        record_id: Some(record_id),
        event_id: query.event_id,
        instance_id: query.instance_id,
    };

    Ok(Json(state.records.download_links(&ctx).await?.into()))
}
