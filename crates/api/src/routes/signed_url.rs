//! Signed URL issuance.
//!
//! `GET /signed-url` takes the request in the query string, as the host's
//! upload widget sends it; `POST /signed-url` takes the same fields as JSON.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use chrono::SecondsFormat;
use fieldvault_core::broker::{Action, IssueRequest, IssuedUrl, RequestContext};
use fieldvault_core::platform::HttpMethod;
use fieldvault_shared::Platform;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::{Actor, ApiJson, ApiQuery};

/// Creates the signed URL routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/signed-url", get(issue_from_query).post(issue_from_json))
}

/// Signed URL request.
#[derive(Debug, Deserialize)]
pub struct SignedUrlRequest {
    /// `upload` or `download`.
    pub action: Action,
    /// Field the file belongs to.
    pub field_name: String,
    /// Original file name for uploads; stored object key for downloads.
    pub file_name: String,
    /// Upload content type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Record id, absent for records not saved yet.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Event id.
    #[serde(default)]
    pub event_id: Option<u64>,
    /// Repeat instance.
    #[serde(default)]
    pub instance_id: Option<u32>,
}

/// Signed URL response.
#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    /// Always `success`.
    pub status: &'static str,
    /// The signed URL.
    pub url: String,
    /// HTTP method to use with the URL.
    pub method: HttpMethod,
    /// Headers the browser must send.
    pub headers: BTreeMap<String, String>,
    /// Expiry (RFC 3339).
    pub expires_at: String,
    /// Object key.
    pub path: String,
    /// Platform that signed the URL.
    pub platform: Platform,
}

impl From<IssuedUrl> for SignedUrlResponse {
    fn from(issued: IssuedUrl) -> Self {
        Self {
            status: "success",
            url: issued.signed.url,
            method: issued.signed.method,
            headers: issued.signed.headers,
            expires_at: issued
                .signed
                .expires_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            path: issued.path,
            platform: issued.platform,
        }
    }
}

async fn issue_from_query(
    State(state): State<AppState>,
    actor: Actor,
    ApiQuery(request): ApiQuery<SignedUrlRequest>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    issue(&state, actor, request).await
}

async fn issue_from_json(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(request): ApiJson<SignedUrlRequest>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    issue(&state, actor, request).await
}

async fn issue(
    state: &AppState,
    Actor(actor): Actor,
    request: SignedUrlRequest,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let ctx = RequestContext {
        actor,
        record_id: request.record_id,
        event_id: request.event_id,
        instance_id: request.instance_id,
    };
    let issue_request = IssueRequest {
        action: request.action,
        field_name: request.field_name,
        file_name: request.file_name,
        content_type: request.content_type,
    };

    let issued = state.broker.issue(&ctx, &issue_request).await?;
    info!(
        field = %issue_request.field_name,
        action = %issue_request.action,
        platform = %issued.platform,
        "Signed URL issued"
    );

    Ok(Json(issued.into()))
}
