//! Service layer: the collaborators the engine talks to.
//!
//! [`BetLedger`] opens and settles bets; [`IdentityVerifier`] turns a
//! handshake credential into an [`Identity`]. Both are traits so the Hub
//! and sessions can run against the in-memory implementations here or
//! against an external system.

pub mod identity;
pub mod ledger;
pub mod memory_ledger;

pub use identity::{AcceptAnyCredential, AuthError, Identity, IdentityVerifier, JwtVerifier};
pub use ledger::{BetLedger, LedgerError};
pub use memory_ledger::{InMemoryBetLedger, LedgerLimits};
