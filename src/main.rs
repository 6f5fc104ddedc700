//! crash-gateway server entry point.
//!
//! Builds the engine (ledger, identity verifier, Hub, round ticker) and
//! serves the WebSocket and health endpoints with Axum.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crash_gateway::api;
use crash_gateway::app_state::AppState;
use crash_gateway::config::EngineConfig;
use crash_gateway::hub::{Hub, spawn_ticker};
use crash_gateway::service::{
    AcceptAnyCredential, BetLedger, IdentityVerifier, InMemoryBetLedger, JwtVerifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = EngineConfig::from_env().context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting crash-gateway");

    // Build collaborators
    let ledger: Arc<dyn BetLedger> = Arc::new(InMemoryBetLedger::new(config.ledger));
    let verifier: Arc<dyn IdentityVerifier> = match config.jwt_secret.as_deref() {
        Some(secret) => Arc::new(JwtVerifier::new(secret, config.jwt_issuer.as_deref())),
        None => {
            tracing::warn!("AUTH_JWT_SECRET is not set; any non-empty credential will be accepted");
            Arc::new(AcceptAnyCredential)
        }
    };

    // Start the Hub and the round clock
    let round = config.round_config();
    tracing::info!(
        tick_ms = config.tick_interval.as_millis(),
        waiting_ticks = round.waiting_ticks,
        running_ticks = round.running_ticks,
        increment = round.multiplier_increment,
        "round timing"
    );
    let hub = Hub::spawn(config.hub_config(), Arc::clone(&ledger));
    let shutdown = CancellationToken::new();
    let ticker = spawn_ticker(hub.clone(), config.tick_interval, shutdown.clone());

    // Build application state
    let app_state = AppState {
        hub,
        ledger,
        verifier,
        session: config.session_settings(),
        origins: config.origin_policy(),
    };

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("could not bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = ticker.await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "could not listen for ctrl-c");
            }
        }
        () = shutdown.cancelled() => {}
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
