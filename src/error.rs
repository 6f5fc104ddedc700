//! Engine error types with client-facing error codes.
//!
//! [`EngineError`] is the central error type for session dispatch. Each
//! variant maps to a stable numeric code carried in the `code` field of
//! `SystemNotification` frames, so clients can branch on failures without
//! parsing messages.

use crate::protocol::ProtocolError;
use crate::service::{AuthError, LedgerError};

/// Errors raised while serving a session.
///
/// # Error Code Ranges
///
/// | Range     | Category   |
/// |-----------|------------|
/// | 1000–1999 | Protocol   |
/// | 2000–2999 | Auth       |
/// | 3000–3999 | Validation |
/// | 4000–4999 | Settlement |
/// | 5000–5999 | Connection / internal |
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential rejected during the handshake.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// A game message arrived before a successful handshake.
    #[error("handshake required")]
    Unauthenticated,

    /// Request rejected before reaching the ledger, or by its limits.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Ledger failure while opening or settling a bet.
    #[error("settlement error: {0}")]
    Settlement(LedgerError),

    /// Transport failure or deadline expiry.
    #[error("connection error: {0}")]
    Connection(String),

    /// The Hub actor has stopped.
    #[error("hub unavailable")]
    HubUnavailable,
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Invalid(_) | LedgerError::InsufficientBalance { .. } => {
                Self::Validation(err.to_string())
            }
            other => Self::Settlement(other),
        }
    }
}

impl EngineError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Protocol(err) => match err {
                ProtocolError::TooShort { .. } => 1001,
                ProtocolError::LengthMismatch { .. } => 1002,
                ProtocolError::UnknownType(_) => 1003,
                ProtocolError::UnexpectedType(_) => 1004,
                ProtocolError::MalformedPayload { .. } => 1005,
                ProtocolError::FrameTooLarge(_) => 1006,
                ProtocolError::Serialize(_) => 1099,
            },
            Self::Auth(err) => match err {
                AuthError::MissingCredential => 2001,
                AuthError::Invalid(_) => 2002,
                AuthError::Expired => 2003,
            },
            Self::Unauthenticated => 2004,
            Self::Validation(_) => 3001,
            Self::Settlement(err) => match err {
                LedgerError::NotFound(_) => 4001,
                LedgerError::AlreadySettled(_) => 4002,
                LedgerError::Unavailable(_) => 4003,
                LedgerError::Invalid(_) | LedgerError::InsufficientBalance { .. } => 4000,
            },
            Self::Connection(_) => 5001,
            Self::HubUnavailable => 5002,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BetId;

    #[test]
    fn codes_fall_in_their_ranges() {
        let cases = [
            (EngineError::from(ProtocolError::TooShort { len: 4 }), 1000..2000),
            (EngineError::from(AuthError::MissingCredential), 2000..3000),
            (EngineError::Validation("amount".into()), 3000..4000),
            (EngineError::from(LedgerError::AlreadySettled(BetId::new())), 4000..5000),
            (EngineError::HubUnavailable, 5000..6000),
        ];
        for (err, range) in cases {
            assert!(range.contains(&err.error_code()), "{err}: {}", err.error_code());
        }
    }

    #[test]
    fn ledger_limits_surface_as_validation() {
        let err = EngineError::from(LedgerError::InsufficientBalance {
            required: 10.0,
            available: 2.0,
        });
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.error_code(), 3001);
    }

    #[test]
    fn ledger_state_errors_surface_as_settlement() {
        let id = BetId::new();
        let err = EngineError::from(LedgerError::NotFound(id));
        assert!(matches!(err, EngineError::Settlement(LedgerError::NotFound(found)) if found == id));
    }
}
