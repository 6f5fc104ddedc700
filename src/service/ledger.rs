//! Bet ledger contract.
//!
//! The engine opens, settles and crashes bets exclusively through
//! [`BetLedger`]. Implementations own bet storage and player balances.
//!
//! # Concurrency contract
//!
//! [`BetLedger::settle_cashout`] must move a bet out of
//! [`BetStatus::Open`](crate::domain::BetStatus::Open) atomically: when an
//! automatic and a manual cash-out race for the same bet, exactly one
//! succeeds and the other receives [`LedgerError::AlreadySettled`].

use std::fmt;

use async_trait::async_trait;

use crate::domain::{Bet, BetId, LeaderboardEntry, Settlement, UserId};

/// Errors returned by a [`BetLedger`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// No bet with this id exists.
    #[error("bet not found: {0}")]
    NotFound(BetId),

    /// The bet is no longer open.
    #[error("bet {0} is already settled")]
    AlreadySettled(BetId),

    /// Stake or threshold outside the accepted range.
    #[error("invalid bet: {0}")]
    Invalid(String),

    /// The player cannot cover the stake.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Stake requested.
        required: f64,
        /// Balance available.
        available: f64,
    },

    /// The backing store failed.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Storage and settlement of bets.
#[async_trait]
pub trait BetLedger: Send + Sync + fmt::Debug {
    /// Opens a bet and debits the stake from the player's balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Invalid`] for an out-of-range stake or
    /// threshold and [`LedgerError::InsufficientBalance`] when the player
    /// cannot cover the stake.
    async fn open_bet(
        &self,
        user_id: UserId,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<Bet, LedgerError>;

    /// Settles an open bet at `multiplier` and credits the payout.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown bet and
    /// [`LedgerError::AlreadySettled`] for a bet that is not open.
    async fn settle_cashout(&self, bet_id: BetId, multiplier: f64) -> Result<Settlement, LedgerError>;

    /// Marks the given bets as crashed. Bets that are no longer open are
    /// skipped. Returns the number of bets that crashed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the store fails.
    async fn mark_crashed(&self, bet_ids: &[BetId]) -> Result<usize, LedgerError>;

    /// Returns every open bet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the store fails.
    async fn open_bets(&self) -> Result<Vec<Bet>, LedgerError>;

    /// Returns a single bet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown bet.
    async fn bet(&self, bet_id: BetId) -> Result<Bet, LedgerError>;

    /// Returns up to `limit` players ranked by total winnings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the store fails.
    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, LedgerError>;
}
