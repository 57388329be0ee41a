//! Bootstrap configuration for the host page's upload widget.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use fieldvault_shared::Platform;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::ApiQuery;

/// Creates the client configuration routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/client-config", get(client_config))
}

/// Query parameters of the page being rendered.
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigQuery {
    /// Record id.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Event id; defaults to the project's first event.
    #[serde(default)]
    pub event_id: Option<u64>,
    /// Repeat instance.
    #[serde(default)]
    pub instance_id: Option<u32>,
}

/// Where a field's files go.
#[derive(Debug, Serialize)]
pub struct FieldTarget {
    /// Storage platform.
    pub platform: Platform,
    /// Bucket or container.
    pub bucket: String,
}

/// Client configuration response.
#[derive(Debug, Serialize)]
pub struct ClientConfig {
    /// Storage-backed fields.
    pub fields: BTreeMap<String, FieldTarget>,
    /// Record id.
    pub record_id: Option<String>,
    /// Event id.
    pub event_id: Option<u64>,
    /// Repeat instance.
    pub instance_id: Option<u32>,
    /// Whether download links are hidden.
    pub disable_file_link: bool,
    /// Whether the record is left unsaved after an upload.
    pub disable_auto_save: bool,
}

/// GET `/client-config`
async fn client_config(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ClientConfigQuery>,
) -> Result<Json<ClientConfig>, ApiError> {
    let fields = state
        .broker
        .registry()
        .bindings()
        .into_iter()
        .map(|b| {
            (
                b.field_name.clone(),
                FieldTarget {
                    platform: b.platform,
                    bucket: b.container.clone(),
                },
            )
        })
        .collect();

    Ok(Json(ClientConfig {
        fields,
        record_id: query.record_id.filter(|id| !id.is_empty()),
        event_id: query
            .event_id
            .or_else(|| state.broker.metadata().first_event_id()),
        instance_id: query.instance_id,
        disable_file_link: state.records.links_disabled(),
        disable_auto_save: state.disable_auto_save,
    }))
}
