//! Round state machine.
//!
//! [`RoundMachine`] owns the single authoritative [`RoundState`] and
//! advances it one tick at a time. The transition is pure: it takes the
//! current time as an argument, performs no I/O, and reports what
//! happened as a list of [`RoundEvent`]s for the caller to act on
//! (settlement, broadcasting).
//!
//! ```text
//!  Waiting ──countdown hits 0──▶ Running ──countdown hits 0──▶ Ended
//!     ▲                                                          │
//!     └─────────────────── same tick ────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RoundId;

/// Phase of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    /// Counting down to the next start; bets are accepted.
    Waiting,
    /// Multiplier is rising; cash-outs are accepted.
    Running,
    /// Round just finished. Only observed in the snapshot of the ending tick.
    Ended,
}

/// Tick-denominated round timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundConfig {
    /// Ticks spent in the waiting phase.
    pub waiting_ticks: u32,
    /// Ticks spent in the running phase.
    pub running_ticks: u32,
    /// Multiplier growth per running tick.
    pub multiplier_increment: f64,
}

impl Default for RoundConfig {
    /// 10 s waiting, 30 s running at a 100 ms tick, +0.01 per tick.
    fn default() -> Self {
        Self {
            waiting_ticks: 100,
            running_ticks: 300,
            multiplier_increment: 0.01,
        }
    }
}

/// Snapshot of the round, copied out to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    /// Current round identifier.
    pub round_id: RoundId,
    /// Current phase.
    pub status: RoundStatus,
    /// Current multiplier. Non-decreasing while running.
    pub multiplier: f64,
    /// Number of live sessions.
    pub player_count: usize,
    /// Ticks left until the next transition.
    pub countdown: u32,
    /// Time of the last tick.
    pub updated_at: DateTime<Utc>,
}

/// Something the caller must act on after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    /// The round moved from waiting to running.
    Started {
        /// Round that started.
        round_id: RoundId,
        /// Tick time.
        at: DateTime<Utc>,
    },
    /// The multiplier grew; eligible auto-cash-outs should be settled.
    MultiplierRaised {
        /// Round in progress.
        round_id: RoundId,
        /// New multiplier.
        multiplier: f64,
    },
    /// The round ended; remaining open bets have crashed.
    Ended {
        /// Round that ended.
        round_id: RoundId,
        /// Multiplier at the end of the round.
        final_multiplier: f64,
        /// Tick time.
        at: DateTime<Utc>,
    },
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Events in the order they occurred.
    pub events: Vec<RoundEvent>,
    /// Status to broadcast for this tick. Carries `Ended` on the ending
    /// tick even though the machine has already reset to `Waiting`.
    pub status: RoundState,
}

/// The round state machine.
///
/// The multiplier grows by a fixed increment per tick. This linear curve is
/// not verifiable as fair; a pre-committed crash point would replace it.
#[derive(Debug, Clone)]
pub struct RoundMachine {
    config: RoundConfig,
    state: RoundState,
    running_ticks: u32,
}

impl RoundMachine {
    /// Creates a machine in the waiting phase with a full countdown.
    #[must_use]
    pub fn new(config: RoundConfig, now: DateTime<Utc>) -> Self {
        let config = RoundConfig {
            waiting_ticks: config.waiting_ticks.max(1),
            running_ticks: config.running_ticks.max(1),
            ..config
        };
        Self {
            state: RoundState {
                round_id: RoundId::new(),
                status: RoundStatus::Waiting,
                multiplier: 1.0,
                player_count: 0,
                countdown: config.waiting_ticks,
                updated_at: now,
            },
            config,
            running_ticks: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &RoundState {
        &self.state
    }

    /// Returns the timing this machine runs with.
    #[must_use]
    pub const fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Records the number of live sessions.
    pub fn set_player_count(&mut self, count: usize) {
        self.state.player_count = count;
    }

    /// Advances the round by one tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut events = Vec::new();
        self.state.updated_at = now;

        match self.state.status {
            RoundStatus::Waiting => {
                self.state.countdown = self.state.countdown.saturating_sub(1);
                if self.state.countdown == 0 {
                    self.state.status = RoundStatus::Running;
                    self.state.multiplier = 1.0;
                    self.state.countdown = self.config.running_ticks;
                    self.running_ticks = 0;
                    events.push(RoundEvent::Started {
                        round_id: self.state.round_id,
                        at: now,
                    });
                }
            }
            RoundStatus::Running => {
                self.running_ticks = self.running_ticks.saturating_add(1);
                self.state.multiplier = self
                    .config
                    .multiplier_increment
                    .mul_add(f64::from(self.running_ticks), 1.0)
                    .max(self.state.multiplier);
                self.state.countdown = self.state.countdown.saturating_sub(1);
                events.push(RoundEvent::MultiplierRaised {
                    round_id: self.state.round_id,
                    multiplier: self.state.multiplier,
                });

                if self.state.countdown == 0 {
                    self.state.status = RoundStatus::Ended;
                    events.push(RoundEvent::Ended {
                        round_id: self.state.round_id,
                        final_multiplier: self.state.multiplier,
                        at: now,
                    });
                    let ended = self.state.clone();
                    self.reset();
                    return TickOutcome {
                        events,
                        status: ended,
                    };
                }
            }
            RoundStatus::Ended => self.reset(),
        }

        TickOutcome {
            events,
            status: self.state.clone(),
        }
    }

    /// Opens the next round in the waiting phase. The multiplier keeps its
    /// final value until the next start.
    fn reset(&mut self) {
        self.state.round_id = RoundId::new();
        self.state.status = RoundStatus::Waiting;
        self.state.countdown = self.config.waiting_ticks;
        self.running_ticks = 0;
    }
}
