//! Length-prefixed binary frame codec.
//!
//! Every frame on the wire has the layout
//!
//! ```text
//! [u32 big-endian length L][u8 type tag][L - 1 bytes of UTF-8 JSON]
//! ```
//!
//! where `L` counts the tag byte plus the payload. There is no checksum
//! and no compression; integrity is left to the WebSocket transport.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Size of the fixed frame header: 4 length bytes plus 1 tag byte.
pub const HEADER_LEN: usize = 5;

/// Byte used to join frames coalesced into a single transport write.
pub const BATCH_SEPARATOR: u8 = b'\n';

/// An encoded frame shared between every session queue it is fanned out to.
pub type EncodedFrame = Arc<[u8]>;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than the fixed header were received.
    #[error("frame too short: {len} bytes, need at least 5")]
    TooShort {
        /// Number of bytes actually received.
        len: usize,
    },

    /// The declared length does not match the number of trailing bytes.
    #[error("frame length mismatch: declared {declared}, payload carries {actual} bytes")]
    LengthMismatch {
        /// Length value read from the header.
        declared: u32,
        /// Payload bytes actually present after the tag.
        actual: usize,
    },

    /// The tag byte is not one of the known message types.
    #[error("unknown message type tag 0x{0:02x}")]
    UnknownType(u8),

    /// A known message type arrived in the wrong direction.
    #[error("unsupported message type: {0}")]
    UnexpectedType(MessageType),

    /// The payload could not be serialized into JSON.
    #[error("payload serialization failed: {0}")]
    Serialize(String),

    /// The payload is not valid JSON for the message type.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Message type whose payload failed to parse.
        kind: MessageType,
        /// Parser error description.
        reason: String,
    },

    /// The payload is too large for a `u32` length prefix.
    #[error("payload of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
}

/// Wire message type. Tags are fixed and stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Periodic round status snapshot (server → client).
    GameStatusUpdate = 0x01,
    /// Bet request (client → server) or bet announcement (broadcast).
    PlayerBet = 0x02,
    /// Round entered the running phase (server → client).
    GameStart = 0x03,
    /// Round ended (server → client).
    GameEnd = 0x04,
    /// Cash-out request (client → server) or settlement announcement (broadcast).
    PlayerCashout = 0x05,
    /// Ranked winnings list (server → client).
    LeaderboardUpdate = 0x06,
    /// Informational or error notice (server → client).
    SystemNotification = 0x07,
    /// Identity handshake (client → server).
    HandshakeRequest = 0x08,
    /// Handshake outcome (server → client).
    HandshakeResponse = 0x09,
}

impl MessageType {
    /// Every message type, in tag order.
    pub const ALL: [Self; 9] = [
        Self::GameStatusUpdate,
        Self::PlayerBet,
        Self::GameStart,
        Self::GameEnd,
        Self::PlayerCashout,
        Self::LeaderboardUpdate,
        Self::SystemNotification,
        Self::HandshakeRequest,
        Self::HandshakeResponse,
    ];

    /// Returns the wire tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Returns the message type name as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GameStatusUpdate => "game_status_update",
            Self::PlayerBet => "player_bet",
            Self::GameStart => "game_start",
            Self::GameEnd => "game_end",
            Self::PlayerCashout => "player_cashout",
            Self::LeaderboardUpdate => "leaderboard_update",
            Self::SystemNotification => "system_notification",
            Self::HandshakeRequest => "handshake_request",
            Self::HandshakeResponse => "handshake_response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or(ProtocolError::UnknownType(tag))
    }
}

/// Serializes `payload` to JSON and wraps it in a frame of type `kind`.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if the payload cannot be
/// serialized, or [`ProtocolError::FrameTooLarge`] if it does not fit a
/// `u32` length prefix.
pub fn encode<T: Serialize + ?Sized>(kind: MessageType, payload: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(payload).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    encode_raw(kind, &body)
}

/// Wraps already-serialized payload bytes in a frame of type `kind`.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload does not fit a
/// `u32` length prefix.
pub fn encode_raw(kind: MessageType, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = body
        .len()
        .checked_add(1)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(ProtocolError::FrameTooLarge(body.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(kind.tag());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Splits a single frame into its message type and payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::TooShort`] for buffers under [`HEADER_LEN`]
/// bytes, [`ProtocolError::LengthMismatch`] when the declared length
/// disagrees with the trailing byte count, and
/// [`ProtocolError::UnknownType`] for an unrecognised tag.
pub fn decode(bytes: &[u8]) -> Result<(MessageType, &[u8]), ProtocolError> {
    let too_short = ProtocolError::TooShort { len: bytes.len() };
    let Some((length, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(too_short);
    };
    let Some((&tag, payload)) = rest.split_first() else {
        return Err(too_short);
    };

    let declared = u32::from_be_bytes(*length);
    let expected = usize::try_from(declared).ok().and_then(|d| d.checked_sub(1));
    if expected != Some(payload.len()) {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let kind = MessageType::try_from(tag)?;
    Ok((kind, payload))
}

/// Splits a coalesced transport message into its individual frames.
///
/// The write loop joins queued frames with [`BATCH_SEPARATOR`]; this walks
/// the length prefixes to recover each frame. A single unbatched frame
/// yields a one-element vector.
///
/// # Errors
///
/// Returns a [`ProtocolError`] if any frame is truncated, carries an
/// unknown tag, or is followed by something other than the separator.
pub fn split_batch(bytes: &[u8]) -> Result<Vec<(MessageType, &[u8])>, ProtocolError> {
    let mut frames = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        let Some((length, _)) = rest.split_first_chunk::<4>() else {
            return Err(ProtocolError::TooShort { len: rest.len() });
        };
        let declared = u32::from_be_bytes(*length);
        let frame_len = usize::try_from(declared)
            .ok()
            .and_then(|d| d.checked_add(4))
            .filter(|&len| len <= rest.len())
            .ok_or(ProtocolError::LengthMismatch {
                declared,
                actual: rest.len().saturating_sub(HEADER_LEN),
            })?;

        let (frame, tail) = rest.split_at(frame_len);
        frames.push(decode(frame)?);

        rest = match tail.split_first() {
            None => tail,
            Some((&BATCH_SEPARATOR, after)) => after,
            Some(_) => {
                return Err(ProtocolError::LengthMismatch {
                    declared,
                    actual: tail.len(),
                });
            }
        };
    }

    Ok(frames)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_lays_out_header_and_payload() {
        let Ok(frame) = encode(MessageType::GameStart, &json!({"a": 1})) else {
            panic!("encode failed");
        };
        let body = br#"{"a":1}"#;
        assert_eq!(frame.len(), HEADER_LEN + body.len());
        assert_eq!(&frame[..4], &((body.len() + 1) as u32).to_be_bytes());
        assert_eq!(frame[4], 0x03);
        assert_eq!(&frame[5..], body);
    }

    #[test]
    fn decode_returns_exact_payload_bytes() {
        let payload = json!({"betId": "b-1", "amount": 10.5, "note": "héllo"});
        for kind in MessageType::ALL {
            let Ok(frame) = encode(kind, &payload) else {
                panic!("encode failed for {kind}");
            };
            let Ok(expected) = serde_json::to_vec(&payload) else {
                panic!("serialize failed");
            };
            let Ok((decoded_kind, decoded_payload)) = decode(&frame) else {
                panic!("decode failed for {kind}");
            };
            assert_eq!(decoded_kind, kind);
            assert_eq!(decoded_payload, expected.as_slice());
        }
    }

    #[test]
    fn four_byte_buffer_is_too_short() {
        let result = decode(&[0, 0, 0, 1]);
        assert_eq!(result, Err(ProtocolError::TooShort { len: 4 }));
    }

    #[test]
    fn declared_length_disagreeing_with_payload_is_rejected() {
        // Declares 10 bytes (tag + 9) but only carries 1 payload byte.
        let buf = [0, 0, 0, 10, 0x01, b'x'];
        assert_eq!(
            decode(&buf),
            Err(ProtocolError::LengthMismatch {
                declared: 10,
                actual: 1
            })
        );
    }

    #[test]
    fn zero_declared_length_is_rejected() {
        let buf = [0, 0, 0, 0, 0x01];
        assert!(matches!(
            decode(&buf),
            Err(ProtocolError::LengthMismatch { declared: 0, .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = [0, 0, 0, 1, 0x7f];
        assert_eq!(decode(&buf), Err(ProtocolError::UnknownType(0x7f)));
    }

    #[test]
    fn empty_payload_frame_decodes() {
        let buf = [0, 0, 0, 1, 0x07];
        let Ok((kind, payload)) = decode(&buf) else {
            panic!("decode failed");
        };
        assert_eq!(kind, MessageType::SystemNotification);
        assert!(payload.is_empty());
    }

    #[test]
    fn tag_round_trips_through_try_from() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::try_from(kind.tag()), Ok(kind));
        }
        assert!(MessageType::try_from(0x00).is_err());
        assert!(MessageType::try_from(0x0a).is_err());
    }

    #[test]
    fn split_batch_recovers_newline_joined_frames() {
        let Ok(a) = encode(MessageType::GameStatusUpdate, &json!({"n": 1})) else {
            panic!("encode failed");
        };
        // Payload containing the separator byte must not confuse the split.
        let Ok(b) = encode(MessageType::SystemNotification, &json!({"m": "a\nb"})) else {
            panic!("encode failed");
        };
        let mut batch = a.clone();
        batch.push(BATCH_SEPARATOR);
        batch.extend_from_slice(&b);

        let Ok(frames) = split_batch(&batch) else {
            panic!("split failed");
        };
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, MessageType::GameStatusUpdate);
        assert_eq!(frames[1].0, MessageType::SystemNotification);
        assert_eq!(frames[1].1, &b[HEADER_LEN..]);
    }

    #[test]
    fn split_batch_rejects_truncated_tail() {
        let Ok(mut frame) = encode(MessageType::GameEnd, &json!({"x": true})) else {
            panic!("encode failed");
        };
        frame.push(BATCH_SEPARATOR);
        frame.extend_from_slice(&[0, 0, 0, 9, 0x04]);
        assert!(split_batch(&frame).is_err());
    }
}
