//! Identity verification for the handshake.
//!
//! A session stays anonymous until an [`IdentityVerifier`] accepts the
//! credential carried by its `HandshakeRequest`.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::domain::UserId;

/// Authenticated player bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable player id.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
}

/// Credential verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("missing credential")]
    MissingCredential,

    /// The credential was rejected.
    #[error("invalid credential: {0}")]
    Invalid(String),

    /// The credential has expired.
    #[error("credential expired")]
    Expired,
}

/// Validates a bearer credential.
pub trait IdentityVerifier: Send + Sync + fmt::Debug {
    /// Resolves a credential to a player identity.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when the credential is missing, invalid or
    /// expired.
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Accepts any non-empty credential.
///
/// The user id is derived from the credential itself, so the same token
/// always maps to the same player. Only suitable for development and
/// tests; configure [`JwtVerifier`] for anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCredential;

impl IdentityVerifier for AcceptAnyCredential {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let user_id = UserId::from_subject(credential);
        let simple = user_id.as_uuid().simple().to_string();
        let short = simple.get(..8).unwrap_or(&simple);
        Ok(Identity {
            user_id,
            name: format!("player-{short}"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("issuer", &self.validation.iss)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Creates a verifier for tokens signed with `secret`. When `issuer`
    /// is set, tokens from any other issuer are rejected.
    #[must_use]
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        let Claims { sub, name } = data.claims;
        if sub.trim().is_empty() {
            return Err(AuthError::Invalid("empty subject".to_string()));
        }
        let user_id = UserId::from_subject(&sub);
        Ok(Identity {
            user_id,
            name: name.filter(|n| !n.trim().is_empty()).unwrap_or(sub),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    const SECRET: &str = "round-engine-test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<&'a str>,
    }

    fn token(claims: &TestClaims<'_>, secret: &str) -> String {
        let Ok(token) = encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        ) else {
            panic!("token encoding failed");
        };
        token
    }

    fn valid_claims() -> TestClaims<'static> {
        TestClaims {
            sub: "user-42",
            exp: Utc::now().timestamp() + 3_600,
            iss: Some("crash"),
            name: Some("Lucky"),
        }
    }

    #[test]
    fn accept_any_rejects_empty() {
        assert_eq!(AcceptAnyCredential.verify("   "), Err(AuthError::MissingCredential));
    }

    #[test]
    fn accept_any_is_deterministic() {
        let (Ok(a), Ok(b)) = (AcceptAnyCredential.verify("tok"), AcceptAnyCredential.verify("tok")) else {
            panic!("verify failed");
        };
        assert_eq!(a, b);
        assert!(a.name.starts_with("player-"));
        assert_eq!(a.name.len(), "player-".len() + 8);
    }

    #[test]
    fn jwt_valid_token() {
        let verifier = JwtVerifier::new(SECRET, Some("crash"));
        let Ok(identity) = verifier.verify(&token(&valid_claims(), SECRET)) else {
            panic!("valid token rejected");
        };
        assert_eq!(identity.user_id, UserId::from_subject("user-42"));
        assert_eq!(identity.name, "Lucky");
    }

    #[test]
    fn jwt_name_falls_back_to_subject() {
        let verifier = JwtVerifier::new(SECRET, None);
        let claims = TestClaims {
            name: None,
            ..valid_claims()
        };
        let Ok(identity) = verifier.verify(&token(&claims, SECRET)) else {
            panic!("valid token rejected");
        };
        assert_eq!(identity.name, "user-42");
    }

    #[test]
    fn jwt_expired_token() {
        let verifier = JwtVerifier::new(SECRET, None);
        let claims = TestClaims {
            exp: 1,
            ..valid_claims()
        };
        assert_eq!(verifier.verify(&token(&claims, SECRET)), Err(AuthError::Expired));
    }

    #[test]
    fn jwt_wrong_secret() {
        let verifier = JwtVerifier::new(SECRET, None);
        assert!(matches!(
            verifier.verify(&token(&valid_claims(), "another-secret")),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn jwt_wrong_issuer() {
        let verifier = JwtVerifier::new(SECRET, Some("someone-else"));
        assert!(matches!(
            verifier.verify(&token(&valid_claims(), SECRET)),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn jwt_garbage() {
        let verifier = JwtVerifier::new(SECRET, None);
        assert!(matches!(verifier.verify("not-a-jwt"), Err(AuthError::Invalid(_))));
        assert_eq!(verifier.verify(""), Err(AuthError::MissingCredential));
    }
}
