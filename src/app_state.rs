//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::hub::Hub;
use crate::service::{BetLedger, IdentityVerifier};
use crate::ws::{OriginPolicy, SessionSettings};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the Hub actor.
    pub hub: Hub,
    /// Bet ledger used by session dispatch.
    pub ledger: Arc<dyn BetLedger>,
    /// Handshake credential verifier.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Per-connection deadlines.
    pub session: SessionSettings,
    /// Allowed WebSocket origins.
    pub origins: OriginPolicy,
}
