//! Per-round accounting and automatic cash-out reconciliation.

use crate::domain::Settlement;
use crate::protocol::ServerMessage;
use crate::service::{BetLedger, LedgerError};

/// Running totals for the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundBook {
    /// Sum of stakes announced for the round.
    pub total_staked: f64,
    /// Number of settled cash-outs.
    pub winners: u32,
    /// Sum of payouts.
    pub total_payout: f64,
}

impl RoundBook {
    /// Folds a broadcast message into the totals.
    pub fn record(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::BetPlaced(bet) => self.total_staked += bet.amount,
            ServerMessage::CashoutSettled(cashout) => {
                self.winners = self.winners.saturating_add(1);
                self.total_payout += cashout.payout;
            }
            _ => {}
        }
    }
}

/// Settles every open bet whose auto-cash-out threshold has been reached.
///
/// Each bet is settled on its own: a ledger failure is logged and the bet
/// skipped, never retried in the same call, and never stops the rest. A
/// bet that a manual cash-out already settled is skipped silently.
pub async fn settle_auto_cashouts(ledger: &dyn BetLedger, multiplier: f64) -> Vec<Settlement> {
    let open = match ledger.open_bets().await {
        Ok(open) => open,
        Err(err) => {
            tracing::warn!(error = %err, "could not list open bets for auto cash-out");
            return Vec::new();
        }
    };

    let mut settled = Vec::new();
    for bet in open.iter().filter(|bet| bet.auto_cashout_due(multiplier)) {
        match ledger.settle_cashout(bet.id, multiplier).await {
            Ok(settlement) => {
                tracing::info!(
                    bet_id = %bet.id,
                    user_id = %bet.user_id,
                    multiplier,
                    payout = settlement.payout,
                    "auto cash-out settled"
                );
                settled.push(settlement);
            }
            Err(LedgerError::AlreadySettled(_)) => {
                tracing::debug!(bet_id = %bet.id, "bet already settled before auto cash-out");
            }
            Err(err) => {
                tracing::warn!(bet_id = %bet.id, error = %err, "auto cash-out failed");
            }
        }
    }
    settled
}
