//! Hindsight backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod openapi;
pub mod query;
pub mod state;
pub mod stdio;
pub mod storage;

use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app(state: AppState) -> Router {
    let mcp_router = Router::new()
        .route(
            "/mcp",
            post(api::mcp::mcp_post)
                .get(api::mcp::mcp_get)
                .delete(api::mcp::mcp_delete),
        )
        .route("/mcp/call", post(api::mcp::mcp_post))
        .route("/sse", get(api::sse::events_stream));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(api::MCP_SESSION_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(api::MCP_SESSION_ID_HEADER)]);

    Router::new()
        .route("/health", get(api::health::get_health))
        .merge(mcp_router)
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
