//! HTTP layer: router composition.
//!
//! `/ws` is the game endpoint; `/health` reports liveness and the current
//! round for probes and dashboards.

pub mod handlers;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;
use crate::ws::ws_handler;

/// Builds the complete router with the WebSocket and system endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .merge(handlers::system::routes())
}
