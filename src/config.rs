//! Engine configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Everything is read and validated
//! once at startup; the round timing cannot change while the engine runs.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::RoundConfig;
use crate::hub::HubConfig;
use crate::service::LedgerLimits;
use crate::ws::OriginPolicy;
use crate::ws::session::SessionSettings;

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Values parse but do not make sense together.
    #[error("invalid configuration: {0}")]
    Constraint(String),
}

/// Top-level engine configuration.
///
/// Loaded once at startup via [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Round tick period.
    pub tick_interval: Duration,

    /// Length of the waiting (betting) phase.
    pub waiting_duration: Duration,

    /// Length of the running phase.
    pub running_duration: Duration,

    /// Multiplier growth per running tick.
    pub multiplier_increment: f64,

    /// Bound of each session's outbound queue.
    pub queue_capacity: usize,

    /// Read-inactivity deadline.
    pub read_timeout: Duration,

    /// Liveness ping period.
    pub ping_interval: Duration,

    /// Deadline for a single transport write.
    pub write_timeout: Duration,

    /// Largest accepted inbound message.
    pub max_message_bytes: usize,

    /// Stake and threshold bounds for the in-memory ledger.
    pub ledger: LedgerLimits,

    /// Entries per leaderboard broadcast.
    pub leaderboard_size: usize,

    /// Shared secret enabling JWT verification.
    pub jwt_secret: Option<String>,

    /// Expected JWT issuer.
    pub jwt_issuer: Option<String>,

    /// Origins allowed to open a WebSocket. Empty means any.
    pub allowed_origins: Vec<String>,

    /// Emit JSON logs instead of text.
    pub json_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tick_interval: Duration::from_millis(100),
            waiting_duration: Duration::from_secs(10),
            running_duration: Duration::from_secs(30),
            multiplier_increment: 0.01,
            queue_capacity: 256,
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 4_096,
            ledger: LedgerLimits::default(),
            leaderboard_size: 10,
            jwt_secret: None,
            jwt_issuer: None,
            allowed_origins: Vec::new(),
            json_logs: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for variables that are not set.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set but does
    /// not parse, and [`ConfigError::Constraint`] if the result fails
    /// [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let env = Env(&lookup);

        let config = Self {
            listen_addr: env.parse("LISTEN_ADDR", d.listen_addr)?,
            tick_interval: env.millis("TICK_INTERVAL_MS", d.tick_interval)?,
            waiting_duration: env.secs("WAITING_DURATION_SECS", d.waiting_duration)?,
            running_duration: env.secs("RUNNING_DURATION_SECS", d.running_duration)?,
            multiplier_increment: env.parse("MULTIPLIER_INCREMENT", d.multiplier_increment)?,
            queue_capacity: env.parse("OUTBOUND_QUEUE_CAPACITY", d.queue_capacity)?,
            read_timeout: env.secs("READ_TIMEOUT_SECS", d.read_timeout)?,
            ping_interval: env.secs("PING_INTERVAL_SECS", d.ping_interval)?,
            write_timeout: env.secs("WRITE_TIMEOUT_SECS", d.write_timeout)?,
            max_message_bytes: env.parse("MAX_MESSAGE_BYTES", d.max_message_bytes)?,
            ledger: LedgerLimits {
                min_bet: env.parse("MIN_BET_AMOUNT", d.ledger.min_bet)?,
                max_bet: env.parse("MAX_BET_AMOUNT", d.ledger.max_bet)?,
                min_auto_cashout: env.parse("MIN_AUTO_CASHOUT", d.ledger.min_auto_cashout)?,
                max_auto_cashout: env.parse("MAX_AUTO_CASHOUT", d.ledger.max_auto_cashout)?,
                starting_balance: env.parse("STARTING_BALANCE", d.ledger.starting_balance)?,
            },
            leaderboard_size: env.parse("LEADERBOARD_SIZE", d.leaderboard_size)?,
            jwt_secret: env.text("AUTH_JWT_SECRET"),
            jwt_issuer: env.text("AUTH_JWT_ISSUER"),
            allowed_origins: env
                .text("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            json_logs: env
                .text("LOG_FORMAT")
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values make sense together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Constraint`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Constraint(msg.to_string()));

        if self.tick_interval.is_zero() {
            return fail("tick interval must be positive");
        }
        if self.waiting_duration.is_zero() || self.running_duration.is_zero() {
            return fail("round durations must be positive");
        }
        if !(self.multiplier_increment.is_finite() && self.multiplier_increment > 0.0) {
            return fail("multiplier increment must be positive");
        }
        if self.queue_capacity == 0 {
            return fail("outbound queue capacity must be positive");
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return fail("read and write timeouts must be positive");
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.read_timeout {
            return fail("ping interval must be positive and shorter than the read timeout");
        }
        if self.max_message_bytes == 0 {
            return fail("max message size must be positive");
        }
        let l = &self.ledger;
        if !(l.min_bet > 0.0 && l.min_bet <= l.max_bet) {
            return fail("bet bounds must be positive and ordered");
        }
        if !(l.min_auto_cashout >= 1.0 && l.min_auto_cashout <= l.max_auto_cashout) {
            return fail("auto cash-out bounds must be at least 1 and ordered");
        }
        if l.starting_balance < 0.0 {
            return fail("starting balance must not be negative");
        }
        Ok(())
    }

    /// Converts the phase durations into tick counts.
    #[must_use]
    pub fn round_config(&self) -> RoundConfig {
        RoundConfig {
            waiting_ticks: ticks_in(self.waiting_duration, self.tick_interval),
            running_ticks: ticks_in(self.running_duration, self.tick_interval),
            multiplier_increment: self.multiplier_increment,
        }
    }

    /// Settings for the Hub actor.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            round: self.round_config(),
            tick_period: self.tick_interval,
            queue_capacity: self.queue_capacity,
            leaderboard_size: self.leaderboard_size,
        }
    }

    /// Per-connection deadlines and limits.
    #[must_use]
    pub const fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            read_timeout: self.read_timeout,
            ping_interval: self.ping_interval,
            write_timeout: self.write_timeout,
            max_message_bytes: self.max_message_bytes,
        }
    }

    /// Origin policy for WebSocket upgrades.
    #[must_use]
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::from_list(&self.allowed_origins)
    }
}

/// `ceil(duration / tick)`, at least 1.
fn ticks_in(duration: Duration, tick: Duration) -> u32 {
    let tick = tick.as_nanos().max(1);
    let ticks = duration.as_nanos().div_ceil(tick).max(1);
    u32::try_from(ticks).unwrap_or(u32::MAX)
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parses a variable as `T`, returning `default` when it is unset.
    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.text(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }
}
