//! Management API routes

pub mod health;
pub mod mcps;
pub mod vmcps;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the management-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::status))
        .route("/api/mcp-servers", get(mcps::list).post(mcps::create))
        .route(
            "/api/mcp-servers/:name",
            get(mcps::get).delete(mcps::remove),
        )
        .route("/api/mcp-servers/:name/connection", put(mcps::set_connection))
        .route("/api/mcp-servers/:name/capabilities", get(mcps::capabilities))
        .route(
            "/api/mcp-servers/:name/capabilities/refresh",
            post(mcps::refresh),
        )
        .route("/api/mcp-servers/:name/test", post(mcps::test))
        .route("/api/mcp-servers/:name/tools/execute", post(mcps::execute_tool))
        .route("/api/vmcps", get(vmcps::list).post(vmcps::create))
        .route("/api/vmcps/:id", get(vmcps::get).delete(vmcps::remove))
        .route("/api/vmcps/:id/start", post(vmcps::start))
        .route("/api/vmcps/:id/stop", post(vmcps::stop))
        .route("/api/vmcps/:id/health", get(vmcps::health))
        .route("/api/vmcps/:id/capabilities", get(vmcps::capabilities))
        .route("/api/vmcps/:id/dependents", get(vmcps::dependents))
        .with_state(state)
}
