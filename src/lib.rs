//! # crash-gateway
//!
//! Real-time WebSocket engine for a live multiplayer "crash" round: a
//! multiplier rises from 1.00 while connected players cash out before the
//! round ends. Bets left open at the end are lost.
//!
//! Clients speak a length-prefixed binary protocol
//! (`[u32 BE length][u8 tag][JSON]`) over a single `/ws` connection.
//! Bet storage and identity checks are delegated to collaborators behind
//! traits, so the engine itself only owns the round and the connections.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)
//!     │
//!     ├── Upgrade Handler (ws/handler)
//!     ├── Session read loop ──▶ dispatch ──▶ BetLedger / IdentityVerifier (service/)
//!     ├── Session write loop ◀── bounded outbound queue
//!     │
//!     ├── Hub actor (hub/) ◀── round ticker
//!     │     ├── live session set
//!     │     └── RoundMachine (domain/)
//!     │
//!     └── Frame codec (protocol/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod service;
pub mod ws;
