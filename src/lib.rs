//! Real-time collaborative document sessions for the portal.
//!
//! The server side (`ws`, `handlers`, `routes`) coordinates document
//! rooms over WebSocket: presence rosters, whole-document content
//! relay, and cursor broadcast. The client side (`client`) is the
//! embeddable session used by editor frontends: transport channel with
//! reconnection, echo-suppressed replication, throttled cursor
//! broadcast, and debounced autosave.

pub mod auth;
pub mod client;
pub mod clients;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::routes::api::create_api_routes;
use crate::ws::handler::collab_ws_handler;
use crate::ws::registry::RoomRegistry;

/// Shared server state: the room registry is the only server-side
/// shared mutable state, and it is mutated only through
/// join/leave/disconnect events.
#[derive(Default)]
pub struct AppState {
    pub registry: RoomRegistry,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Assemble the full application router: REST API, the collaboration
/// WebSocket endpoint, and Swagger UI.
pub fn build_app(state: Arc<AppState>) -> Router {
    let api_routes = create_api_routes(state.clone());

    Router::new()
        // Collaboration WebSocket endpoint
        .route("/ws", get(collab_ws_handler))
        .with_state(state)
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
