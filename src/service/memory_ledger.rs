//! In-memory [`BetLedger`] implementation.
//!
//! Holds bets and per-player accounts behind a single async mutex, so
//! every ledger call is atomic with respect to every other.
//!
//! Open bets live in their own map, which is all the per-tick scan in
//! [`BetLedger::open_bets`] touches. Settled and crashed bets move to a
//! bounded archive that keeps the most recent ones for lookups.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::ledger::{BetLedger, LedgerError};
use crate::domain::bet::payout_for;
use crate::domain::{Bet, BetId, BetStatus, LeaderboardEntry, Settlement, UserId};

/// Stake and threshold limits enforced by the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerLimits {
    /// Smallest accepted stake.
    pub min_bet: f64,
    /// Largest accepted stake.
    pub max_bet: f64,
    /// Smallest accepted auto-cash-out threshold.
    pub min_auto_cashout: f64,
    /// Largest accepted auto-cash-out threshold.
    pub max_auto_cashout: f64,
    /// Balance granted to a player the ledger has not seen before.
    pub starting_balance: f64,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            min_bet: 1.0,
            max_bet: 1_000.0,
            min_auto_cashout: 1.01,
            max_auto_cashout: 1_000.0,
            starting_balance: 1_000.0,
        }
    }
}

#[derive(Debug)]
struct Account {
    balance: f64,
    total_winnings: f64,
    biggest_multiplier: f64,
}

/// Terminal bets kept for lookups by default.
pub const DEFAULT_ARCHIVE_SIZE: usize = 10_000;

#[derive(Debug, Default)]
struct Book {
    open: HashMap<BetId, Bet>,
    archived: HashMap<BetId, Bet>,
    archive_order: VecDeque<BetId>,
    accounts: HashMap<UserId, Account>,
}

impl Book {
    /// Moves a bet out of play, evicting the oldest archived bets beyond
    /// `capacity`.
    fn archive(&mut self, bet: Bet, capacity: usize) {
        self.archive_order.push_back(bet.id);
        self.archived.insert(bet.id, bet);
        while self.archive_order.len() > capacity {
            if let Some(oldest) = self.archive_order.pop_front() {
                self.archived.remove(&oldest);
            }
        }
    }

    fn account(&mut self, user_id: UserId, starting_balance: f64) -> &mut Account {
        self.accounts.entry(user_id).or_insert_with(|| Account {
            balance: starting_balance,
            total_winnings: 0.0,
            biggest_multiplier: 0.0,
        })
    }
}

/// Process-local bet ledger.
#[derive(Debug)]
pub struct InMemoryBetLedger {
    limits: LedgerLimits,
    archive_size: usize,
    book: Mutex<Book>,
}

impl InMemoryBetLedger {
    /// Creates an empty ledger with the given limits.
    #[must_use]
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            limits,
            archive_size: DEFAULT_ARCHIVE_SIZE,
            book: Mutex::new(Book::default()),
        }
    }

    /// Keeps at most `size` settled or crashed bets for lookups.
    #[must_use]
    pub fn with_archive_size(mut self, size: usize) -> Self {
        self.archive_size = size;
        self
    }

    /// Returns a player's balance, or the starting balance for an unseen
    /// player.
    pub async fn balance(&self, user_id: UserId) -> f64 {
        self.book
            .lock()
            .await
            .accounts
            .get(&user_id)
            .map_or(self.limits.starting_balance, |a| a.balance)
    }

    fn validate(&self, amount: f64, auto_cashout: Option<f64>) -> Result<(), LedgerError> {
        let limits = &self.limits;
        if !amount.is_finite() || amount < limits.min_bet || amount > limits.max_bet {
            return Err(LedgerError::Invalid(format!(
                "stake must be between {} and {}",
                limits.min_bet, limits.max_bet
            )));
        }
        if let Some(threshold) = auto_cashout
            && (!threshold.is_finite()
                || threshold < limits.min_auto_cashout
                || threshold > limits.max_auto_cashout)
        {
            return Err(LedgerError::Invalid(format!(
                "auto cash-out must be between {} and {}",
                limits.min_auto_cashout, limits.max_auto_cashout
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryBetLedger {
    fn default() -> Self {
        Self::new(LedgerLimits::default())
    }
}

#[async_trait]
impl BetLedger for InMemoryBetLedger {
    async fn open_bet(
        &self,
        user_id: UserId,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<Bet, LedgerError> {
        self.validate(amount, auto_cashout)?;

        let mut book = self.book.lock().await;
        let account = book.account(user_id, self.limits.starting_balance);
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;

        let bet = Bet {
            id: BetId::new(),
            user_id,
            amount,
            auto_cashout,
            status: BetStatus::Open,
            cashout_multiplier: None,
            payout: None,
            created_at: Utc::now(),
        };
        book.open.insert(bet.id, bet.clone());
        Ok(bet)
    }

    async fn settle_cashout(&self, bet_id: BetId, multiplier: f64) -> Result<Settlement, LedgerError> {
        let mut book = self.book.lock().await;
        let Some(mut bet) = book.open.remove(&bet_id) else {
            return Err(if book.archived.contains_key(&bet_id) {
                LedgerError::AlreadySettled(bet_id)
            } else {
                LedgerError::NotFound(bet_id)
            });
        };

        let payout = payout_for(bet.amount, multiplier);
        bet.status = BetStatus::CashedOut;
        bet.cashout_multiplier = Some(multiplier);
        bet.payout = Some(payout);
        let settlement = Settlement {
            bet_id,
            user_id: bet.user_id,
            amount: bet.amount,
            multiplier,
            payout,
        };
        book.archive(bet, self.archive_size);

        let account = book.account(settlement.user_id, self.limits.starting_balance);
        account.balance += payout;
        account.total_winnings += payout;
        account.biggest_multiplier = account.biggest_multiplier.max(multiplier);
        Ok(settlement)
    }

    async fn mark_crashed(&self, bet_ids: &[BetId]) -> Result<usize, LedgerError> {
        let mut book = self.book.lock().await;
        let mut crashed = 0;
        for id in bet_ids {
            if let Some(mut bet) = book.open.remove(id) {
                bet.status = BetStatus::Crashed;
                book.archive(bet, self.archive_size);
                crashed += 1;
            }
        }
        Ok(crashed)
    }

    async fn open_bets(&self) -> Result<Vec<Bet>, LedgerError> {
        let book = self.book.lock().await;
        Ok(book.open.values().cloned().collect())
    }

    async fn bet(&self, bet_id: BetId) -> Result<Bet, LedgerError> {
        let book = self.book.lock().await;
        book.open
            .get(&bet_id)
            .or_else(|| book.archived.get(&bet_id))
            .cloned()
            .ok_or(LedgerError::NotFound(bet_id))
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        let book = self.book.lock().await;
        let mut ranked: Vec<_> = book
            .accounts
            .iter()
            .filter(|(_, account)| account.total_winnings > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_winnings.total_cmp(&a.1.total_winnings));

        Ok(ranked
            .into_iter()
            .take(limit)
            .zip(1u32..)
            .map(|((user_id, account), rank)| LeaderboardEntry {
                rank,
                user_id: *user_id,
                total_winnings: account.total_winnings,
                biggest_multiplier: account.biggest_multiplier,
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::from_subject(name)
    }

    #[tokio::test]
    async fn open_bet_debits_balance() {
        let ledger = InMemoryBetLedger::default();
        let alice = user("alice");
        let Ok(bet) = ledger.open_bet(alice, 10.0, None).await else {
            panic!("open_bet failed");
        };
        assert_eq!(bet.status, BetStatus::Open);
        assert!((ledger.balance(alice).await - 990.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn out_of_range_stake_is_rejected() {
        let ledger = InMemoryBetLedger::default();
        assert!(matches!(
            ledger.open_bet(user("a"), 0.5, None).await,
            Err(LedgerError::Invalid(_))
        ));
        assert!(matches!(
            ledger.open_bet(user("a"), f64::NAN, None).await,
            Err(LedgerError::Invalid(_))
        ));
        assert!(matches!(
            ledger.open_bet(user("a"), 10.0, Some(1.0)).await,
            Err(LedgerError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected() {
        let ledger = InMemoryBetLedger::new(LedgerLimits {
            starting_balance: 5.0,
            ..LedgerLimits::default()
        });
        assert!(matches!(
            ledger.open_bet(user("poor"), 10.0, None).await,
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn settle_cashout_pays_once() {
        let ledger = InMemoryBetLedger::default();
        let bob = user("bob");
        let Ok(bet) = ledger.open_bet(bob, 10.0, Some(2.0)).await else {
            panic!("open_bet failed");
        };

        let Ok(settlement) = ledger.settle_cashout(bet.id, 2.01).await else {
            panic!("settle failed");
        };
        assert!((settlement.payout - 20.10).abs() < 1e-9);
        assert!((ledger.balance(bob).await - 1_010.10).abs() < 1e-9);

        assert_eq!(
            ledger.settle_cashout(bet.id, 2.02).await,
            Err(LedgerError::AlreadySettled(bet.id))
        );
        let Ok(stored) = ledger.bet(bet.id).await else {
            panic!("bet lookup failed");
        };
        assert_eq!(stored.status, BetStatus::CashedOut);
        assert_eq!(stored.cashout_multiplier, Some(2.01));
    }

    #[tokio::test]
    async fn unknown_bet_is_not_found() {
        let ledger = InMemoryBetLedger::default();
        let id = BetId::new();
        assert_eq!(ledger.settle_cashout(id, 1.5).await, Err(LedgerError::NotFound(id)));
    }

    #[tokio::test]
    async fn mark_crashed_skips_settled_bets() {
        let ledger = InMemoryBetLedger::default();
        let carol = user("carol");
        let (Ok(a), Ok(b)) = (
            ledger.open_bet(carol, 5.0, None).await,
            ledger.open_bet(carol, 5.0, None).await,
        ) else {
            panic!("open_bet failed");
        };
        let _ = ledger.settle_cashout(a.id, 1.5).await;

        assert_eq!(ledger.mark_crashed(&[a.id, b.id]).await, Ok(1));
        let Ok(crashed) = ledger.bet(b.id).await else {
            panic!("bet lookup failed");
        };
        assert_eq!(crashed.status, BetStatus::Crashed);
        let Ok(open) = ledger.open_bets().await else {
            panic!("open_bets failed");
        };
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_winnings() {
        let ledger = InMemoryBetLedger::default();
        let (small, big) = (user("small"), user("big"));
        let (Ok(a), Ok(b)) = (
            ledger.open_bet(small, 10.0, None).await,
            ledger.open_bet(big, 10.0, None).await,
        ) else {
            panic!("open_bet failed");
        };
        let _ = ledger.settle_cashout(a.id, 1.5).await;
        let _ = ledger.settle_cashout(b.id, 3.0).await;
        let _ = ledger.open_bet(user("loser"), 10.0, None).await;

        let Ok(board) = ledger.leaderboard(10).await else {
            panic!("leaderboard failed");
        };
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, big);
        assert_eq!(board[0].rank, 1);
        assert!((board[0].biggest_multiplier - 3.0).abs() < 1e-9);
        assert_eq!(board[1].user_id, small);
        assert_eq!(board[1].rank, 2);
    }

    #[tokio::test]
    async fn finished_bets_leave_the_open_set() {
        let ledger = InMemoryBetLedger::default();
        for round in 0..50 {
            let mut ids = Vec::new();
            for i in 0..20 {
                let Ok(bet) = ledger.open_bet(user(&format!("p{round}-{i}")), 1.0, None).await else {
                    panic!("open_bet failed");
                };
                ids.push(bet.id);
            }
            let _ = ledger.settle_cashout(ids[0], 1.5).await;
            assert_eq!(ledger.mark_crashed(&ids).await, Ok(19));
        }

        let book = ledger.book.lock().await;
        assert!(book.open.is_empty());
        assert_eq!(book.archived.len(), 1_000);
    }

    #[tokio::test]
    async fn archive_keeps_only_recent_bets() {
        let ledger = InMemoryBetLedger::default().with_archive_size(2);
        let dave = user("dave");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let Ok(bet) = ledger.open_bet(dave, 1.0, None).await else {
                panic!("open_bet failed");
            };
            ids.push(bet.id);
        }
        let Ok(live) = ledger.open_bet(dave, 1.0, None).await else {
            panic!("open_bet failed");
        };
        assert_eq!(ledger.mark_crashed(&ids).await, Ok(3));

        assert_eq!(ledger.bet(ids[0]).await, Err(LedgerError::NotFound(ids[0])));
        assert_eq!(
            ledger.settle_cashout(ids[2], 2.0).await,
            Err(LedgerError::AlreadySettled(ids[2]))
        );
        let Ok(open) = ledger.open_bets().await else {
            panic!("open_bets failed");
        };
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, live.id);
    }
}
