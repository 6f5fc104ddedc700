//! The Hub control loop.
//!
//! One task owns the live session set and the [`RoundMachine`]. Every
//! mutation arrives as a [`Command`] and is applied in arrival order, so
//! neither structure needs a lock. After each mutation the round state is
//! copied into a `watch` channel for concurrent readers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

use super::settlement::{RoundBook, settle_auto_cashouts};
use super::{HubConfig, SessionHandle};
use crate::domain::{
    Bet, BetId, RoundEvent, RoundId, RoundMachine, RoundState, RoundStatus, SessionId, Settlement, TickOutcome,
    UserId,
};
use crate::error::EngineError;
use crate::protocol::messages::{BetPlaced, CashoutSettled, GameEnd, GameStart, GameStatusUpdate, LeaderboardUpdate};
use crate::protocol::{EncodedFrame, ServerMessage};
use crate::service::BetLedger;

/// Requests processed by the control loop.
#[derive(Debug)]
pub(super) enum Command {
    Register {
        handle: SessionHandle,
        reply: oneshot::Sender<usize>,
    },
    Unregister {
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        frame: EncodedFrame,
        reply: oneshot::Sender<usize>,
    },
    PlaceBet {
        user_id: UserId,
        amount: f64,
        auto_cashout: Option<f64>,
        reply: oneshot::Sender<Result<Bet, EngineError>>,
    },
    Cashout {
        user_id: UserId,
        bet_id: BetId,
        reply: oneshot::Sender<Result<Settlement, EngineError>>,
    },
    SendTo {
        id: SessionId,
        frame: EncodedFrame,
    },
    Tick {
        reply: oneshot::Sender<TickOutcome>,
    },
}

pub(super) struct HubActor {
    config: HubConfig,
    ledger: Arc<dyn BetLedger>,
    sessions: HashMap<SessionId, SessionHandle>,
    machine: RoundMachine,
    book: RoundBook,
    state_tx: watch::Sender<RoundState>,
}

impl HubActor {
    pub(super) fn new(
        config: HubConfig,
        ledger: Arc<dyn BetLedger>,
        machine: RoundMachine,
        state_tx: watch::Sender<RoundState>,
    ) -> Self {
        Self {
            config,
            ledger,
            sessions: HashMap::new(),
            machine,
            book: RoundBook::default(),
            state_tx,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register { handle, reply } => {
                    let _ = reply.send(self.register(handle));
                }
                Command::Unregister { id, reply } => {
                    let _ = reply.send(self.unregister(id));
                }
                Command::Broadcast { frame, reply } => {
                    let _ = reply.send(self.fan_out(&frame));
                }
                Command::PlaceBet {
                    user_id,
                    amount,
                    auto_cashout,
                    reply,
                } => {
                    let _ = reply.send(self.place_bet(user_id, amount, auto_cashout).await);
                }
                Command::Cashout { user_id, bet_id, reply } => {
                    let _ = reply.send(self.cashout(user_id, bet_id).await);
                }
                Command::SendTo { id, frame } => self.send_to(id, frame),
                Command::Tick { reply } => {
                    let outcome = self.tick().await;
                    let _ = reply.send(outcome);
                }
            }
        }
        tracing::info!(sessions = self.sessions.len(), "hub stopped");
    }

    fn register(&mut self, handle: SessionHandle) -> usize {
        let id = handle.id;
        self.sessions.insert(id, handle);
        self.sync_player_count();
        tracing::info!(session_id = %id, players = self.sessions.len(), "session registered");

        match self.status_frame(self.machine.state()) {
            Some(frame) => self.send_to(id, frame),
            None => tracing::error!(session_id = %id, "could not encode initial status"),
        }
        self.sessions.len()
    }

    fn unregister(&mut self, id: SessionId) -> bool {
        // Dropping the handle closes the outbound queue.
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            self.sync_player_count();
            tracing::info!(session_id = %id, players = self.sessions.len(), "session unregistered");
        }
        removed
    }

    fn send_to(&mut self, id: SessionId, frame: EncodedFrame) {
        let Some(handle) = self.sessions.get(&id) else {
            return;
        };
        if let Err(err) = handle.queue.try_send(frame) {
            self.evict(id, &err);
            self.sync_player_count();
        }
    }

    /// Enqueues `frame` on every session and drops the ones that cannot
    /// take it. Returns the number of sessions that received it.
    fn fan_out(&mut self, frame: &EncodedFrame) -> usize {
        let mut dropped = Vec::new();
        for (id, handle) in &self.sessions {
            if let Err(err) = handle.queue.try_send(Arc::clone(frame)) {
                dropped.push((*id, err));
            }
        }
        if dropped.is_empty() {
            return self.sessions.len();
        }
        for (id, err) in &dropped {
            self.evict(*id, err);
        }
        self.sync_player_count();
        self.sessions.len()
    }

    fn evict(&mut self, id: SessionId, err: &TrySendError<EncodedFrame>) {
        if self.sessions.remove(&id).is_none() {
            return;
        }
        match err {
            TrySendError::Full(_) => tracing::warn!(
                session_id = %id,
                capacity = self.config.queue_capacity,
                "outbound queue full, dropping session"
            ),
            TrySendError::Closed(_) => {
                tracing::debug!(session_id = %id, "outbound queue closed, dropping session");
            }
        }
    }

    fn publish(&mut self, message: ServerMessage) -> Result<usize, EngineError> {
        let frame = message.encode()?;
        self.book.record(&message);
        Ok(self.fan_out(&frame))
    }

    /// Opens a bet for the waiting round and announces it. The phase check,
    /// the ledger call and the round's totals happen in one step, so a tick
    /// cannot slip in between them.
    async fn place_bet(
        &mut self,
        user_id: UserId,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<Bet, EngineError> {
        if self.machine.state().status != RoundStatus::Waiting {
            return Err(EngineError::Validation(
                "bets are only accepted while the round is waiting".to_string(),
            ));
        }
        let bet = self.ledger.open_bet(user_id, amount, auto_cashout).await?;
        self.broadcast_message(ServerMessage::BetPlaced(BetPlaced {
            bet_id: bet.id,
            user_id: bet.user_id,
            amount: bet.amount,
            auto_cashout: bet.auto_cashout,
            timestamp: bet.created_at,
        }));
        Ok(bet)
    }

    /// Settles an owner's bet at the live multiplier and books it against
    /// the running round.
    async fn cashout(&mut self, user_id: UserId, bet_id: BetId) -> Result<Settlement, EngineError> {
        let round = self.machine.state();
        if round.status != RoundStatus::Running {
            return Err(EngineError::Validation(
                "cash-out is only accepted while the round is running".to_string(),
            ));
        }
        let (round_id, multiplier) = (round.round_id, round.multiplier);

        let bet = self.ledger.bet(bet_id).await?;
        if bet.user_id != user_id {
            return Err(EngineError::Validation("bet belongs to another player".to_string()));
        }
        let settlement = self.ledger.settle_cashout(bet_id, multiplier).await?;
        tracing::info!(
            %round_id,
            %bet_id,
            user_id = %settlement.user_id,
            multiplier,
            payout = settlement.payout,
            "cash-out settled"
        );
        self.broadcast_message(ServerMessage::CashoutSettled(CashoutSettled::from(&settlement)));
        Ok(settlement)
    }

    fn broadcast_message(&mut self, message: ServerMessage) {
        let kind = message.kind();
        if let Err(err) = self.publish(message) {
            tracing::error!(%kind, error = %err, "could not broadcast message");
        }
    }

    async fn tick(&mut self) -> TickOutcome {
        let outcome = self.machine.tick(Utc::now());

        for event in &outcome.events {
            match *event {
                RoundEvent::Started { round_id, at } => {
                    tracing::info!(
                        %round_id,
                        players = self.sessions.len(),
                        staked = self.book.total_staked,
                        "round started"
                    );
                    self.broadcast_message(ServerMessage::GameStart(GameStart {
                        round_id,
                        player_count: self.sessions.len(),
                        total_bet_amount: self.book.total_staked,
                        start_time: at,
                    }));
                }
                RoundEvent::MultiplierRaised { multiplier, .. } => {
                    let settled = settle_auto_cashouts(self.ledger.as_ref(), multiplier).await;
                    for settlement in settled {
                        self.broadcast_message(ServerMessage::CashoutSettled((&settlement).into()));
                    }
                }
                RoundEvent::Ended {
                    round_id,
                    final_multiplier,
                    at,
                } => self.end_round(round_id, final_multiplier, at).await,
            }
        }

        let mut status = outcome.status.clone();
        status.player_count = self.sessions.len();
        if let Some(frame) = self.status_frame(&status) {
            self.fan_out(&frame);
        }
        self.state_tx.send_replace(self.machine.state().clone());
        outcome
    }

    async fn end_round(&mut self, round_id: RoundId, final_multiplier: f64, at: DateTime<Utc>) {
        let crashed = match self.ledger.open_bets().await {
            Ok(open) => {
                let ids: Vec<BetId> = open.iter().map(|bet| bet.id).collect();
                match self.ledger.mark_crashed(&ids).await {
                    Ok(count) => count,
                    Err(err) => {
                        tracing::warn!(%round_id, error = %err, "could not mark bets crashed");
                        0
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%round_id, error = %err, "could not list open bets at round end");
                0
            }
        };

        let book = std::mem::take(&mut self.book);
        tracing::info!(
            %round_id,
            final_multiplier,
            winners = book.winners,
            crashed,
            "round ended"
        );
        self.broadcast_message(ServerMessage::GameEnd(GameEnd {
            round_id,
            final_multiplier,
            winners_count: book.winners,
            total_payout: book.total_payout,
            end_time: at,
        }));

        match self.ledger.leaderboard(self.config.leaderboard_size).await {
            Ok(entries) if !entries.is_empty() => {
                self.broadcast_message(ServerMessage::Leaderboard(LeaderboardUpdate {
                    entries,
                    updated_at: at,
                }));
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "could not load leaderboard"),
        }
    }

    fn status_frame(&self, state: &RoundState) -> Option<EncodedFrame> {
        let message = ServerMessage::GameStatus(GameStatusUpdate::from_state(state, self.config.tick_period));
        message
            .encode()
            .inspect_err(|err| tracing::error!(error = %err, "could not encode status"))
            .ok()
    }

    fn sync_player_count(&mut self) {
        self.machine.set_player_count(self.sessions.len());
        self.state_tx.send_replace(self.machine.state().clone());
    }
}

impl std::fmt::Debug for HubActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubActor")
            .field("sessions", &self.sessions.len())
            .field("round", self.machine.state())
            .finish_non_exhaustive()
    }
}
