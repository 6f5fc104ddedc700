//! Connection registry and round driver.
//!
//! [`Hub`] is a cheap, cloneable handle to a single actor task that owns
//! both the live session set and the round state machine. Registration,
//! removal, fan-out, round ticks, bets and manual cash-outs are all
//! serialized through that task, so a bet or cash-out is checked against
//! the phase and counted in the round it was accepted in.
//! Readers get a copy of the round state from a `watch` channel and never
//! touch the live struct.
//!
//! Each session's outbound queue is bounded. The registry holds the only
//! sender for it, so removing a session from the registry is what closes
//! its queue, and that can only happen once. A session whose queue is full
//! when a frame is fanned out is dropped rather than waited on.

mod actor;
pub mod settlement;
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};

use self::actor::{Command, HubActor};
use crate::domain::{Bet, BetId, RoundConfig, RoundMachine, RoundState, SessionId, Settlement, TickOutcome, UserId};
use crate::error::EngineError;
use crate::protocol::{EncodedFrame, ServerMessage};
use crate::service::BetLedger;

pub use settlement::{RoundBook, settle_auto_cashouts};
pub use ticker::spawn_ticker;

const COMMAND_CAPACITY: usize = 1_024;

/// Hub settings, fixed for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubConfig {
    /// Round timing in ticks.
    pub round: RoundConfig,
    /// Wall-clock length of one tick.
    pub tick_period: Duration,
    /// Bound of every session's outbound queue.
    pub queue_capacity: usize,
    /// Entries carried by a `LeaderboardUpdate`.
    pub leaderboard_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            tick_period: Duration::from_millis(100),
            queue_capacity: 256,
            leaderboard_size: 10,
        }
    }
}

/// The registry's end of a session: its id and its outbound queue.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    queue: mpsc::Sender<EncodedFrame>,
}

impl SessionHandle {
    /// Creates a handle with a bounded queue and returns the receiving
    /// end for the session's write loop.
    #[must_use]
    pub fn new(id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<EncodedFrame>) {
        let (queue, outbound) = mpsc::channel(capacity.max(1));
        (Self { id, queue }, outbound)
    }

    /// Returns the session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }
}

/// Handle to the Hub actor.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RoundState>,
    config: HubConfig,
}

impl Hub {
    /// Starts the actor on the current runtime. The actor stops once every
    /// handle has been dropped.
    #[must_use]
    pub fn spawn(config: HubConfig, ledger: Arc<dyn BetLedger>) -> Self {
        let machine = RoundMachine::new(config.round, Utc::now());
        let (state_tx, state) = watch::channel(machine.state().clone());
        let (commands, inbox) = mpsc::channel(COMMAND_CAPACITY);
        let actor = HubActor::new(config, ledger, machine, state_tx);
        tokio::spawn(actor.run(inbox));
        Self {
            commands,
            state,
            config,
        }
    }

    /// Returns the settings the hub runs with.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Adds a session and sends it the current round status. Returns the
    /// live count after registration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HubUnavailable`] if the actor has stopped.
    pub async fn register(&self, handle: SessionHandle) -> Result<usize, EngineError> {
        self.request(|reply| Command::Register { handle, reply }).await
    }

    /// Removes a session and closes its queue. Returns `false` when the
    /// session was already gone, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HubUnavailable`] if the actor has stopped.
    pub async fn unregister(&self, id: SessionId) -> Result<bool, EngineError> {
        self.request(|reply| Command::Unregister { id, reply }).await
    }

    /// Enqueues an encoded frame on every live session. Returns the number
    /// of sessions that accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HubUnavailable`] if the actor has stopped.
    pub async fn broadcast(&self, frame: EncodedFrame) -> Result<usize, EngineError> {
        self.request(|reply| Command::Broadcast { frame, reply }).await
    }

    /// Opens a bet through the ledger while the round is waiting and
    /// broadcasts it as a `PlayerBet`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] outside the waiting phase or for
    /// a stake the ledger refuses, [`EngineError::Settlement`] when the
    /// ledger fails and [`EngineError::HubUnavailable`] if the actor has
    /// stopped.
    pub async fn place_bet(
        &self,
        user_id: UserId,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<Bet, EngineError> {
        self.request(|reply| Command::PlaceBet {
            user_id,
            amount,
            auto_cashout,
            reply,
        })
        .await?
    }

    /// Cashes out `user_id`'s bet at the current multiplier and broadcasts
    /// it as a `PlayerCashout`. The payout counts toward the running round.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] outside the running phase or for
    /// another player's bet, [`EngineError::Settlement`] for an unknown or
    /// already settled bet and [`EngineError::HubUnavailable`] if the actor
    /// has stopped.
    pub async fn cashout(&self, user_id: UserId, bet_id: BetId) -> Result<Settlement, EngineError> {
        self.request(|reply| Command::Cashout { user_id, bet_id, reply }).await?
    }

    /// Queues a message for a single session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] if the message cannot be encoded
    /// and [`EngineError::HubUnavailable`] if the actor has stopped.
    pub async fn send_to(&self, id: SessionId, message: ServerMessage) -> Result<(), EngineError> {
        let frame = message.encode()?;
        self.commands
            .send(Command::SendTo { id, frame })
            .await
            .map_err(|_| EngineError::HubUnavailable)
    }

    /// Advances the round by one tick, settling and broadcasting whatever
    /// the tick produced.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::HubUnavailable`] if the actor has stopped.
    pub async fn tick(&self) -> Result<TickOutcome, EngineError> {
        self.request(|reply| Command::Tick { reply }).await
    }

    /// Returns a copy of the current round state.
    #[must_use]
    pub fn snapshot(&self) -> RoundState {
        self.state.borrow().clone()
    }

    /// Returns the number of registered sessions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.borrow().player_count
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::HubUnavailable)?;
        response.await.map_err(|_| EngineError::HubUnavailable)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::domain::{RoundStatus, UserId};
    use crate::protocol::messages::SystemNotification;
    use crate::protocol::{MessageType, decode};
    use crate::service::InMemoryBetLedger;

    fn hub_with(round: RoundConfig) -> Hub {
        Hub::spawn(
            HubConfig {
                round,
                ..HubConfig::default()
            },
            Arc::new(InMemoryBetLedger::default()),
        )
    }

    fn hub() -> Hub {
        hub_with(RoundConfig::default())
    }

    fn frame(text: &str) -> EncodedFrame {
        let Ok(frame) = ServerMessage::Notification(SystemNotification::info(text)).encode() else {
            panic!("encode failed");
        };
        frame
    }

    async fn join(hub: &Hub, capacity: usize) -> (SessionId, mpsc::Receiver<EncodedFrame>) {
        let id = SessionId::new();
        let (handle, outbound) = SessionHandle::new(id, capacity);
        let Ok(_) = hub.register(handle).await else {
            panic!("register failed");
        };
        (id, outbound)
    }

    fn kind_of(frame: &EncodedFrame) -> MessageType {
        let Ok((kind, _)) = decode(frame) else {
            panic!("undecodable frame");
        };
        kind
    }

    #[tokio::test]
    async fn live_count_follows_registrations() {
        let hub = hub();
        let (a, _qa) = join(&hub, 8).await;
        assert_eq!(hub.live_count(), 1);
        let (_b, _qb) = join(&hub, 8).await;
        assert_eq!(hub.live_count(), 2);
        let (_c, _qc) = join(&hub, 8).await;
        assert_eq!(hub.live_count(), 3);

        assert!(matches!(hub.unregister(a).await, Ok(true)));
        assert_eq!(hub.live_count(), 2);
        assert_eq!(hub.snapshot().player_count, 2);
    }

    #[tokio::test]
    async fn register_sends_current_status() {
        let hub = hub();
        let (_id, mut outbound) = join(&hub, 8).await;
        let Some(first) = outbound.recv().await else {
            panic!("no initial frame");
        };
        assert_eq!(kind_of(&first), MessageType::GameStatusUpdate);
    }

    #[tokio::test]
    async fn unregister_twice_is_a_noop() {
        let hub = hub();
        let (a, mut outbound) = join(&hub, 8).await;
        let (_b, _qb) = join(&hub, 8).await;

        assert!(matches!(hub.unregister(a).await, Ok(true)));
        assert!(matches!(hub.unregister(a).await, Ok(false)));
        assert_eq!(hub.live_count(), 1);

        // The queue is closed once the initial status is drained.
        assert!(outbound.recv().await.is_some());
        assert!(outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_only_the_slow_session() {
        let hub = hub();
        let (slow, mut slow_rx) = join(&hub, 256).await;
        let (_fast, mut fast_rx) = join(&hub, 256).await;
        let _ = fast_rx.recv().await;

        // The initial status plus 255 broadcasts fill the slow queue.
        for i in 0..255 {
            let Ok(delivered) = hub.broadcast(frame(&format!("n{i}"))).await else {
                panic!("broadcast failed");
            };
            assert_eq!(delivered, 2);
            assert!(fast_rx.recv().await.is_some());
        }
        assert_eq!(hub.live_count(), 2);

        let Ok(delivered) = hub.broadcast(frame("overflow")).await else {
            panic!("broadcast failed");
        };
        assert_eq!(delivered, 1);
        assert_eq!(hub.live_count(), 1);
        assert!(fast_rx.recv().await.is_some());

        let mut pending = 0;
        while slow_rx.recv().await.is_some() {
            pending += 1;
        }
        assert_eq!(pending, 256);
        assert!(matches!(hub.unregister(slow).await, Ok(false)));
        assert_eq!(hub.live_count(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_dropped_on_broadcast() {
        let hub = hub();
        let (_gone, gone_rx) = join(&hub, 8).await;
        let (_here, _here_rx) = join(&hub, 8).await;
        drop(gone_rx);

        let Ok(delivered) = hub.broadcast(frame("hello")).await else {
            panic!("broadcast failed");
        };
        assert_eq!(delivered, 1);
        assert_eq!(hub.live_count(), 1);
    }

    #[tokio::test]
    async fn ticks_broadcast_status_and_round_events() {
        let hub = hub_with(RoundConfig {
            waiting_ticks: 1,
            running_ticks: 2,
            multiplier_increment: 0.5,
        });
        let (_id, mut outbound) = join(&hub, 64).await;
        let _ = outbound.recv().await;

        // Start: GameStart then the running status.
        let Ok(outcome) = hub.tick().await else {
            panic!("tick failed");
        };
        assert_eq!(outcome.status.status, RoundStatus::Running);
        let (Some(start), Some(status)) = (outbound.recv().await, outbound.recv().await) else {
            panic!("missing frames");
        };
        assert_eq!(kind_of(&start), MessageType::GameStart);
        assert_eq!(kind_of(&status), MessageType::GameStatusUpdate);
        assert_eq!(hub.snapshot().status, RoundStatus::Running);

        let _ = hub.tick().await;
        let _ = outbound.recv().await;

        // End: GameEnd then the ended status; the hub is waiting again.
        let Ok(outcome) = hub.tick().await else {
            panic!("tick failed");
        };
        assert_eq!(outcome.status.status, RoundStatus::Ended);
        let (Some(end), Some(status)) = (outbound.recv().await, outbound.recv().await) else {
            panic!("missing frames");
        };
        assert_eq!(kind_of(&end), MessageType::GameEnd);
        assert_eq!(kind_of(&status), MessageType::GameStatusUpdate);
        assert_eq!(hub.snapshot().status, RoundStatus::Waiting);
    }

    #[tokio::test]
    async fn round_end_crashes_open_bets_and_ranks_winners() {
        let ledger = Arc::new(InMemoryBetLedger::default());
        let hub = Hub::spawn(
            HubConfig {
                round: RoundConfig {
                    waiting_ticks: 1,
                    running_ticks: 3,
                    multiplier_increment: 0.5,
                },
                ..HubConfig::default()
            },
            Arc::clone(&ledger) as Arc<dyn BetLedger>,
        );
        let (_id, mut outbound) = join(&hub, 64).await;

        let (Ok(winner), Ok(loser)) = (
            ledger.open_bet(UserId::from_subject("w"), 10.0, Some(1.5)).await,
            ledger.open_bet(UserId::from_subject("l"), 10.0, None).await,
        ) else {
            panic!("open_bet failed");
        };

        for _ in 0..4 {
            let Ok(_) = hub.tick().await else {
                panic!("tick failed");
            };
        }

        let (Ok(winner), Ok(loser)) = (ledger.bet(winner.id).await, ledger.bet(loser.id).await) else {
            panic!("bet lookup failed");
        };
        assert_eq!(winner.status, crate::domain::BetStatus::CashedOut);
        assert_eq!(loser.status, crate::domain::BetStatus::Crashed);

        let mut kinds = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            kinds.push(kind_of(&frame));
        }
        let cashout = kinds.iter().position(|k| *k == MessageType::PlayerCashout);
        let end = kinds.iter().position(|k| *k == MessageType::GameEnd);
        let board = kinds.iter().position(|k| *k == MessageType::LeaderboardUpdate);
        let (Some(cashout), Some(end), Some(board)) = (cashout, end, board) else {
            panic!("missing round frames: {kinds:?}");
        };
        assert!(cashout < end && end < board);
    }

    fn short_rounds(ledger: &Arc<InMemoryBetLedger>) -> Hub {
        Hub::spawn(
            HubConfig {
                round: RoundConfig {
                    waiting_ticks: 1,
                    running_ticks: 3,
                    multiplier_increment: 0.5,
                },
                ..HubConfig::default()
            },
            Arc::clone(ledger) as Arc<dyn BetLedger>,
        )
    }

    async fn ticks(hub: &Hub, n: usize) {
        for _ in 0..n {
            let Ok(_) = hub.tick().await else {
                panic!("tick failed");
            };
        }
    }

    /// `(winnersCount, totalPayout)` of every `GameEnd` queued so far.
    fn round_totals(outbound: &mut mpsc::Receiver<EncodedFrame>) -> Vec<(u64, f64)> {
        let mut totals = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            let Ok((MessageType::GameEnd, payload)) = decode(&frame) else {
                continue;
            };
            let Ok(end) = serde_json::from_slice::<serde_json::Value>(payload) else {
                panic!("GameEnd payload is not JSON");
            };
            let (Some(winners), Some(payout)) = (end["winnersCount"].as_u64(), end["totalPayout"].as_f64()) else {
                panic!("GameEnd totals missing: {end}");
            };
            totals.push((winners, payout));
        }
        totals
    }

    #[tokio::test]
    async fn manual_cashout_counts_toward_its_own_round() {
        let ledger = Arc::new(InMemoryBetLedger::default());
        let hub = short_rounds(&ledger);
        let (_id, mut outbound) = join(&hub, 64).await;
        let user = UserId::from_subject("cashier");

        let Ok(bet) = hub.place_bet(user, 10.0, None).await else {
            panic!("place_bet failed");
        };
        ticks(&hub, 2).await;
        let Ok(settlement) = hub.cashout(user, bet.id).await else {
            panic!("cashout failed");
        };
        assert!((settlement.multiplier - 1.5).abs() < 1e-9);

        // Finish the first round, then play a second one with no bets.
        ticks(&hub, 2).await;
        ticks(&hub, 4).await;

        let totals = round_totals(&mut outbound);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].0, 1);
        assert!((totals[0].1 - 15.0).abs() < 1e-9);
        assert_eq!(totals[1], (0, 0.0));
    }

    #[tokio::test]
    async fn cashout_racing_the_final_tick_stays_in_one_round() {
        let ledger = Arc::new(InMemoryBetLedger::default());
        let hub = short_rounds(&ledger);
        let (_id, mut outbound) = join(&hub, 64).await;
        let user = UserId::from_subject("racer");

        let Ok(bet) = hub.place_bet(user, 10.0, None).await else {
            panic!("place_bet failed");
        };
        // Running with one tick left.
        ticks(&hub, 3).await;

        let (ended, cashed) = tokio::join!(hub.tick(), hub.cashout(user, bet.id));
        assert!(ended.is_ok());
        ticks(&hub, 4).await;

        let totals = round_totals(&mut outbound);
        assert_eq!(totals.len(), 2);
        match cashed {
            Ok(settlement) => {
                assert_eq!(totals[0].0, 1);
                assert!((totals[0].1 - settlement.payout).abs() < 1e-9);
            }
            Err(err) => {
                assert!(matches!(err, EngineError::Validation(_)), "unexpected error: {err}");
                assert_eq!(totals[0], (0, 0.0));
                let Ok(stored) = ledger.bet(bet.id).await else {
                    panic!("bet lookup failed");
                };
                assert_eq!(stored.status, crate::domain::BetStatus::Crashed);
            }
        }
        assert_eq!(totals[1], (0, 0.0));
    }

    #[tokio::test]
    async fn bets_and_cashouts_respect_the_phase() {
        let ledger = Arc::new(InMemoryBetLedger::default());
        let hub = short_rounds(&ledger);
        let (owner, other) = (UserId::from_subject("owner"), UserId::from_subject("other"));

        let Ok(bet) = hub.place_bet(owner, 10.0, None).await else {
            panic!("place_bet failed");
        };
        assert!(matches!(hub.cashout(owner, bet.id).await, Err(EngineError::Validation(_))));

        ticks(&hub, 1).await;
        assert!(matches!(hub.place_bet(owner, 10.0, None).await, Err(EngineError::Validation(_))));
        assert!(matches!(hub.cashout(other, bet.id).await, Err(EngineError::Validation(_))));
        assert!(hub.cashout(owner, bet.id).await.is_ok());
        assert!(matches!(
            hub.cashout(owner, bet.id).await,
            Err(EngineError::Settlement(crate::service::LedgerError::AlreadySettled(_)))
        ));
    }

    #[tokio::test]
    async fn stopped_hub_reports_unavailable() {
        let (commands, inbox) = mpsc::channel(1);
        drop(inbox);
        let (_tx, state) = watch::channel(RoundMachine::new(RoundConfig::default(), Utc::now()).state().clone());
        let hub = Hub {
            commands,
            state,
            config: HubConfig::default(),
        };
        assert!(matches!(hub.tick().await, Err(EngineError::HubUnavailable)));
    }
}
