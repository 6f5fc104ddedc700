//! Typed payloads for every message type, and the two closed message sets.
//!
//! [`ClientMessage`] covers what a client may send; [`ServerMessage`]
//! covers what the server emits. Adding or removing a message type is a
//! compile-time-checked change to these enums.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::frame::{self, EncodedFrame, MessageType, ProtocolError};
use crate::domain::{BetId, LeaderboardEntry, RoundId, RoundState, RoundStatus, Settlement, UserId};

/// `GameStatusUpdate` (0x01): round snapshot sent every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatusUpdate {
    /// Current round.
    pub round_id: RoundId,
    /// Current phase.
    pub status: RoundStatus,
    /// Current multiplier.
    pub multiplier: f64,
    /// Live session count.
    pub player_count: usize,
    /// Seconds until the next transition.
    pub countdown: f64,
    /// Server clock at the time of the snapshot.
    pub server_time: DateTime<Utc>,
}

impl GameStatusUpdate {
    /// Builds a status payload from a round snapshot, converting the tick
    /// countdown to seconds.
    #[must_use]
    pub fn from_state(state: &RoundState, tick_period: Duration) -> Self {
        Self {
            round_id: state.round_id,
            status: state.status,
            multiplier: state.multiplier,
            player_count: state.player_count,
            countdown: tick_period.as_secs_f64() * f64::from(state.countdown),
            server_time: state.updated_at,
        }
    }
}

/// `PlayerBet` (0x02) broadcast: a bet was accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetPlaced {
    /// New bet.
    pub bet_id: BetId,
    /// Player who placed it.
    pub user_id: UserId,
    /// Stake.
    pub amount: f64,
    /// Auto-cash-out threshold, if any.
    pub auto_cashout: Option<f64>,
    /// Acceptance time.
    pub timestamp: DateTime<Utc>,
}

/// `GameStart` (0x03): the round entered the running phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    /// Round that started.
    pub round_id: RoundId,
    /// Live session count.
    pub player_count: usize,
    /// Sum of stakes placed for this round.
    pub total_bet_amount: f64,
    /// Start time.
    pub start_time: DateTime<Utc>,
}

/// `GameEnd` (0x04): the round finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEnd {
    /// Round that ended.
    pub round_id: RoundId,
    /// Multiplier reached at the end.
    pub final_multiplier: f64,
    /// Number of bets cashed out during the round.
    pub winners_count: u32,
    /// Sum of payouts during the round.
    pub total_payout: f64,
    /// End time.
    pub end_time: DateTime<Utc>,
}

/// `PlayerCashout` (0x05) broadcast: a bet was settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutSettled {
    /// Settled bet.
    pub bet_id: BetId,
    /// Bet owner.
    pub user_id: UserId,
    /// Multiplier applied.
    pub multiplier: f64,
    /// Amount paid out.
    pub payout: f64,
    /// Settlement time.
    pub timestamp: DateTime<Utc>,
}

impl From<&Settlement> for CashoutSettled {
    fn from(settlement: &Settlement) -> Self {
        Self {
            bet_id: settlement.bet_id,
            user_id: settlement.user_id,
            multiplier: settlement.multiplier,
            payout: settlement.payout,
            timestamp: Utc::now(),
        }
    }
}

/// `LeaderboardUpdate` (0x06): ranked winnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdate {
    /// Entries ordered by rank.
    pub entries: Vec<LeaderboardEntry>,
    /// Time the ranking was computed.
    pub updated_at: DateTime<Utc>,
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational notice.
    Info,
    /// A request from this client was rejected.
    Error,
}

/// `SystemNotification` (0x07).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotification {
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Numeric error code, for errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl SystemNotification {
    /// Builds an error notification.
    #[must_use]
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            code: Some(code),
            timestamp: Utc::now(),
        }
    }

    /// Builds an informational notification.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            code: None,
            timestamp: Utc::now(),
        }
    }
}

/// `HandshakeRequest` (0x08).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Bearer credential.
    #[serde(default, alias = "token")]
    pub credential: String,
    /// Client protocol version.
    #[serde(default, alias = "version")]
    pub protocol_version: String,
}

/// Handshake outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeStatus {
    /// Identity bound to the session.
    Success,
    /// Credential missing or rejected.
    Error,
}

/// `HandshakeResponse` (0x09).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Outcome.
    pub status: HandshakeStatus,
    /// Bound user, on success.
    pub user_id: Option<UserId>,
    /// Failure reason, on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server clock.
    pub server_time: DateTime<Utc>,
}

impl HandshakeResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(user_id: UserId) -> Self {
        Self {
            status: HandshakeStatus::Success,
            user_id: Some(user_id),
            message: None,
            server_time: Utc::now(),
        }
    }

    /// Builds a failed response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HandshakeStatus::Error,
            user_id: None,
            message: Some(message.into()),
            server_time: Utc::now(),
        }
    }
}

/// `PlayerBet` (0x02) request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    /// Stake.
    pub amount: f64,
    /// Auto-cash-out threshold. Absent, null or non-positive means none.
    #[serde(default, alias = "auto_cashout")]
    pub auto_cashout: Option<f64>,
}

impl BetRequest {
    /// Returns the threshold, treating non-positive values as "none".
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.auto_cashout.filter(|t| *t > 0.0)
    }
}

/// `PlayerCashout` (0x05) request from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    /// Bet to settle.
    #[serde(default, alias = "bet_id")]
    pub bet_id: String,
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Identity handshake.
    Handshake(HandshakeRequest),
    /// Place a bet.
    PlaceBet(BetRequest),
    /// Cash out a bet.
    Cashout(CashoutRequest),
}

impl ClientMessage {
    /// Decodes a client frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the frame is malformed, its payload
    /// does not parse, or its type is one only the server sends.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, payload) = frame::decode(bytes)?;
        match kind {
            MessageType::HandshakeRequest => parse(kind, payload).map(Self::Handshake),
            MessageType::PlayerBet => parse(kind, payload).map(Self::PlaceBet),
            MessageType::PlayerCashout => parse(kind, payload).map(Self::Cashout),
            other => Err(ProtocolError::UnexpectedType(other)),
        }
    }

    /// Returns the wire type of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::Handshake(_) => MessageType::HandshakeRequest,
            Self::PlaceBet(_) => MessageType::PlayerBet,
            Self::Cashout(_) => MessageType::PlayerCashout,
        }
    }

    /// Encodes this message as a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Handshake(p) => frame::encode(self.kind(), p),
            Self::PlaceBet(p) => frame::encode(self.kind(), p),
            Self::Cashout(p) => frame::encode(self.kind(), p),
        }
    }
}

fn parse<T: DeserializeOwned>(kind: MessageType, payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Messages the server emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Round snapshot.
    GameStatus(GameStatusUpdate),
    /// Bet accepted.
    BetPlaced(BetPlaced),
    /// Round started.
    GameStart(GameStart),
    /// Round ended.
    GameEnd(GameEnd),
    /// Bet settled.
    CashoutSettled(CashoutSettled),
    /// Leaderboard.
    Leaderboard(LeaderboardUpdate),
    /// Notice to a client.
    Notification(SystemNotification),
    /// Handshake outcome.
    Handshake(HandshakeResponse),
}

impl ServerMessage {
    /// Returns the wire type of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::GameStatus(_) => MessageType::GameStatusUpdate,
            Self::BetPlaced(_) => MessageType::PlayerBet,
            Self::GameStart(_) => MessageType::GameStart,
            Self::GameEnd(_) => MessageType::GameEnd,
            Self::CashoutSettled(_) => MessageType::PlayerCashout,
            Self::Leaderboard(_) => MessageType::LeaderboardUpdate,
            Self::Notification(_) => MessageType::SystemNotification,
            Self::Handshake(_) => MessageType::HandshakeResponse,
        }
    }

    /// Encodes this message as a shareable frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<EncodedFrame, ProtocolError> {
        let kind = self.kind();
        let bytes = match self {
            Self::GameStatus(p) => frame::encode(kind, p),
            Self::BetPlaced(p) => frame::encode(kind, p),
            Self::GameStart(p) => frame::encode(kind, p),
            Self::GameEnd(p) => frame::encode(kind, p),
            Self::CashoutSettled(p) => frame::encode(kind, p),
            Self::Leaderboard(p) => frame::encode(kind, p),
            Self::Notification(p) => frame::encode(kind, p),
            Self::Handshake(p) => frame::encode(kind, p),
        }?;
        Ok(Arc::from(bytes))
    }
}
