//! Platform connection test.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use fieldvault_core::broker::ConnectionReport;
use fieldvault_shared::{AppError, Platform};

use crate::AppState;
use crate::error::ApiError;

/// Creates the connection test routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/platforms/{platform}/test-connection", get(test_connection))
}

/// GET `/platforms/{platform}/test-connection`
async fn test_connection(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<ConnectionReport>, ApiError> {
    let platform = Platform::parse(&platform)
        .ok_or_else(|| AppError::Validation(format!("unknown platform '{platform}'")))?;

    Ok(Json(state.broker.test_connection(platform).await))
}
