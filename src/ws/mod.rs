//! WebSocket layer: upgrade, per-connection session, write loop.
//!
//! The WebSocket endpoint at `/ws` carries length-prefixed binary frames
//! in both directions. Outbound frames come from the Hub through each
//! session's bounded queue.

pub mod handler;
pub mod session;
pub mod writer;

pub use handler::{OriginPolicy, ws_handler};
pub use session::{Session, SessionSettings, run_session, serve_connection};
