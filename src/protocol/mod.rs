//! Wire protocol: length-prefixed binary frames carrying typed JSON payloads.
//!
//! [`frame`] is the byte-level codec; [`messages`] defines the payload of
//! every message type and the closed client/server message sets.

pub mod frame;
pub mod messages;

pub use frame::{EncodedFrame, MessageType, ProtocolError, decode, encode, split_batch};
pub use messages::{ClientMessage, ServerMessage};
