//! Bet records as exposed by the bet ledger.
//!
//! The engine never mutates a [`Bet`] directly; it only observes the
//! copies returned by [`crate::service::BetLedger`] calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BetId, UserId};

/// Tolerance used when comparing a live multiplier against a threshold.
pub const MULTIPLIER_EPSILON: f64 = 1e-9;

/// Lifecycle of a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Stake is riding on the current round.
    Open,
    /// Settled at a multiplier before the round ended.
    CashedOut,
    /// Still open when the round ended; the stake is lost.
    Crashed,
}

/// A single stake placed by a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    /// Bet identifier.
    pub id: BetId,
    /// Owning player.
    pub user_id: UserId,
    /// Stake amount.
    pub amount: f64,
    /// Multiplier at which the engine cashes out on the player's behalf.
    pub auto_cashout: Option<f64>,
    /// Current status.
    pub status: BetStatus,
    /// Multiplier the bet was settled at, once cashed out.
    pub cashout_multiplier: Option<f64>,
    /// Amount paid out, once cashed out.
    pub payout: Option<f64>,
    /// Placement timestamp.
    pub created_at: DateTime<Utc>,
}

impl Bet {
    /// Returns `true` if the bet is open and its auto-cash-out threshold
    /// has been reached by `multiplier`.
    #[must_use]
    pub fn auto_cashout_due(&self, multiplier: f64) -> bool {
        self.status == BetStatus::Open
            && self
                .auto_cashout
                .is_some_and(|threshold| threshold <= multiplier + MULTIPLIER_EPSILON)
    }
}

/// Outcome of a successful cash-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    /// Settled bet.
    pub bet_id: BetId,
    /// Owner of the bet.
    pub user_id: UserId,
    /// Original stake.
    pub amount: f64,
    /// Multiplier applied.
    pub multiplier: f64,
    /// Amount credited to the owner.
    pub payout: f64,
}

/// One row of the winnings leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based rank.
    pub rank: u32,
    /// Ranked player.
    pub user_id: UserId,
    /// Sum of all payouts received.
    pub total_winnings: f64,
    /// Highest multiplier the player has cashed out at.
    pub biggest_multiplier: f64,
}

/// Computes `stake × multiplier` rounded to cents.
#[must_use]
pub fn payout_for(stake: f64, multiplier: f64) -> f64 {
    (stake * multiplier * 100.0).round() / 100.0
}
