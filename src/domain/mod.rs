//! Domain layer: identifiers, bets, and the round state machine.
//!
//! Everything here is free of I/O. The round machine is driven by the
//! Hub actor, and bet records are produced by the ledger collaborator.

pub mod bet;
pub mod ids;
pub mod round;

pub use bet::{Bet, BetStatus, LeaderboardEntry, Settlement};
pub use ids::{BetId, RoundId, SessionId, UserId};
pub use round::{RoundConfig, RoundEvent, RoundMachine, RoundState, RoundStatus, TickOutcome};
