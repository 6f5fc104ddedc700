//! Per-connection session: handshake, dispatch and the read loop.
//!
//! A connection runs two loops. The read loop (here) decodes inbound
//! frames and dispatches them; the write loop ([`super::writer`]) owns the
//! socket's sending half and the liveness ping. They share nothing but the
//! outbound queue, which the Hub feeds, and a [`CancellationToken`] that
//! either side cancels when it exits.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::{Sink, Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::writer::write_loop;
use crate::app_state::AppState;
use crate::domain::{BetId, SessionId};
use crate::error::EngineError;
use crate::hub::SessionHandle;
use crate::protocol::messages::{
    BetRequest, CashoutRequest, HandshakeRequest, HandshakeResponse, SystemNotification,
};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::service::Identity;

/// Deadlines and limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Close the connection after this long without a pong.
    pub read_timeout: Duration,
    /// Ping period. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Deadline for a single socket write.
    pub write_timeout: Duration,
    /// Largest inbound message accepted by the transport.
    pub max_message_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 4_096,
        }
    }
}

/// Server-side state of one connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    identity: Option<Identity>,
    connected_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl Session {
    /// Creates an anonymous session.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            identity: None,
            connected_at: now,
            last_active: now,
        }
    }

    /// Returns the session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the bound identity, if the handshake succeeded.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Returns when the connection was accepted.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns when the last inbound frame arrived.
    #[must_use]
    pub const fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// Handles one inbound frame. Failures are reported to this client
    /// as a `SystemNotification`; the connection stays open.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HubUnavailable`] when the Hub has stopped, in
    /// which case the session should close.
    pub async fn handle_frame(&mut self, bytes: &[u8], state: &AppState) -> Result<(), EngineError> {
        self.touch();
        match self.dispatch(bytes, state).await {
            Ok(()) => Ok(()),
            Err(EngineError::HubUnavailable) => Err(EngineError::HubUnavailable),
            Err(err) => {
                tracing::debug!(session_id = %self.id, code = err.error_code(), error = %err, "request rejected");
                let notice = SystemNotification::error(err.error_code(), err.to_string());
                state.hub.send_to(self.id, ServerMessage::Notification(notice)).await
            }
        }
    }

    async fn dispatch(&mut self, bytes: &[u8], state: &AppState) -> Result<(), EngineError> {
        match ClientMessage::decode(bytes)? {
            ClientMessage::Handshake(request) => self.handshake(&request, state).await,
            ClientMessage::PlaceBet(request) => self.place_bet(&request, state).await,
            ClientMessage::Cashout(request) => self.cashout(&request, state).await,
        }
    }

    async fn handshake(&mut self, request: &HandshakeRequest, state: &AppState) -> Result<(), EngineError> {
        let response = match state.verifier.verify(&request.credential) {
            Ok(identity) => {
                tracing::info!(
                    session_id = %self.id,
                    user_id = %identity.user_id,
                    name = %identity.name,
                    protocol_version = %request.protocol_version,
                    "handshake accepted"
                );
                let response = HandshakeResponse::success(identity.user_id);
                self.identity = Some(identity);
                response
            }
            Err(err) => {
                tracing::info!(session_id = %self.id, error = %err, "handshake rejected");
                HandshakeResponse::error(err.to_string())
            }
        };
        state.hub.send_to(self.id, ServerMessage::Handshake(response)).await
    }

    async fn place_bet(&self, request: &BetRequest, state: &AppState) -> Result<(), EngineError> {
        let identity = self.identity.as_ref().ok_or(EngineError::Unauthenticated)?;
        if !(request.amount.is_finite() && request.amount > 0.0) {
            return Err(EngineError::Validation("bet amount must be positive".to_string()));
        }

        let bet = state
            .hub
            .place_bet(identity.user_id, request.amount, request.threshold())
            .await?;
        tracing::info!(
            session_id = %self.id,
            user_id = %bet.user_id,
            bet_id = %bet.id,
            amount = bet.amount,
            "bet placed"
        );
        Ok(())
    }

    async fn cashout(&self, request: &CashoutRequest, state: &AppState) -> Result<(), EngineError> {
        let identity = self.identity.as_ref().ok_or(EngineError::Unauthenticated)?;
        let raw = request.bet_id.trim();
        if raw.is_empty() {
            return Err(EngineError::Validation("bet id is required".to_string()));
        }
        let bet_id: BetId = raw
            .parse()
            .map_err(|_| EngineError::Validation(format!("invalid bet id: {raw}")))?;

        state.hub.cashout(identity.user_id, bet_id).await.map(|_| ())
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves one upgraded connection until either loop exits.
pub async fn run_session(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, state).await;
}

/// Registers a session, runs its read and write loops over the given
/// transport halves and unregisters it once the read loop ends.
pub async fn serve_connection<W, R, E>(sink: W, stream: R, state: AppState)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut session = Session::new();
    let id = session.id();
    let (handle, outbound) = SessionHandle::new(id, state.hub.config().queue_capacity);
    if let Err(err) = state.hub.register(handle).await {
        tracing::error!(session_id = %id, error = %err, "could not register session");
        return;
    }

    let closed = CancellationToken::new();
    let writer = tokio::spawn(write_loop(sink, outbound, state.session, closed.clone()));

    read_loop(&mut session, stream, &state, &closed).await;

    if let Err(err) = state.hub.unregister(id).await {
        tracing::warn!(session_id = %id, error = %err, "could not unregister session");
    }
    closed.cancel();
    if let Err(err) = writer.await {
        tracing::warn!(session_id = %id, error = %err, "write loop panicked");
    }
    let now = Utc::now();
    tracing::debug!(
        session_id = %id,
        connected_for_secs = (now - session.connected_at()).num_seconds(),
        idle_secs = (now - session.last_active()).num_seconds(),
        "session closed"
    );
}

async fn read_loop<R, E>(session: &mut Session, mut stream: R, state: &AppState, closed: &CancellationToken)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let id = session.id();
    let mut deadline = Instant::now() + state.session.read_timeout;

    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                tracing::info!(
                    session_id = %id,
                    last_active = %session.last_active(),
                    "read deadline expired"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(session_id = %id, error = %err, "read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };
        session.touch();

        let handled = match message {
            Message::Binary(bytes) => session.handle_frame(&bytes, state).await,
            Message::Text(text) => session.handle_frame(text.as_bytes(), state).await,
            Message::Pong(_) => {
                deadline = Instant::now() + state.session.read_timeout;
                Ok(())
            }
            Message::Ping(_) => Ok(()),
            Message::Close(_) => break,
        };
        if let Err(err) = handled {
            tracing::warn!(session_id = %id, error = %err, "closing session");
            break;
        }
    }
}
