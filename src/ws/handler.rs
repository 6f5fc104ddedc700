//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::session::run_session;
use crate::app_state::AppState;

/// Which browser origins may open a WebSocket.
///
/// Requests without an `Origin` header come from non-browser clients and
/// are always let through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Any origin.
    #[default]
    Any,
    /// Only the listed origins, compared case-insensitively.
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// Builds a policy from a list of origins. An empty list allows any.
    #[must_use]
    pub fn from_list(origins: &[String]) -> Self {
        if origins.is_empty() {
            Self::Any
        } else {
            Self::AllowList(
                origins
                    .iter()
                    .map(|origin| origin.trim_end_matches('/').to_ascii_lowercase())
                    .collect(),
            )
        }
    }

    /// Returns whether `origin` may connect.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::AllowList(allowed) => {
                let origin = origin.trim_end_matches('/');
                allowed.iter().any(|a| a.eq_ignore_ascii_case(origin))
            }
        }
    }
}

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|origin| state.origins.allows(origin));
        if !allowed {
            tracing::warn!(origin = ?origin, "websocket upgrade refused");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    ws.max_message_size(state.session.max_message_bytes)
        .on_upgrade(move |socket| run_session(socket, state))
}
