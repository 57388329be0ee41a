//! API route definitions.

use axum::Router;

use crate::AppState;

pub mod client_config;
pub mod connection;
pub mod health;
pub mod records;
pub mod signed_url;

/// Creates the API router with all routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(signed_url::routes())
        .merge(connection::routes())
        .merge(records::routes())
        .merge(client_config::routes())
}
