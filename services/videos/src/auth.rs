//! Bearer token verification.
//!
//! The signing secret is distributed over the `jwt-rotated` topic. Until the
//! first rotation arrives every verification fails with [`AuthError::NotReady`];
//! afterwards the latest secret is used. The secret is swapped atomically, so
//! verifications running during a rotation see either the old or new key.

use crate::error::ApiError;
use arc_swap::ArcSwap;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed Authorization header")]
    MalformedHeader,

    #[error("Signing secret not yet received")]
    NotReady,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Message safe to return to clients
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Missing bearer token",
            Self::MalformedHeader => "Malformed Authorization header",
            Self::NotReady => "Authentication not ready",
            Self::Expired => "Token expired",
            Self::InvalidToken(_) => "Invalid token",
        }
    }
}

/// Identity carried in a verified token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

enum SecretState {
    Uninitialized,
    Ready(DecodingKey),
}

/// Verifies HMAC-signed bearer tokens against the current signing secret
pub struct CredentialVerifier {
    secret: ArcSwap<SecretState>,
    validation: Validation,
}

impl CredentialVerifier {
    pub fn new() -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // exp and nbf are checked when present but not required
        validation.required_spec_claims = HashSet::new();
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            secret: ArcSwap::from_pointee(SecretState::Uninitialized),
            validation,
        }
    }

    /// Replace the signing secret
    pub fn rotate(&self, secret: &str) {
        let was_ready = self.is_ready();
        self.secret
            .store(Arc::new(SecretState::Ready(DecodingKey::from_secret(
                secret.as_bytes(),
            ))));

        if was_ready {
            info!("Signing secret rotated");
        } else {
            info!("Signing secret received, token verification enabled");
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(**self.secret.load(), SecretState::Ready(_))
    }

    /// Verify a raw token
    pub fn verify(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let state = self.secret.load();
        let SecretState::Ready(key) = &**state else {
            return Err(AuthError::NotReady);
        };

        let identity = decode::<UserIdentity>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        // Videos are owned by this id
        if identity.id.is_empty() {
            return Err(AuthError::InvalidToken("empty user id".to_string()));
        }

        Ok(identity)
    }

    /// Verify the value of an `Authorization: Bearer <token>` header
    pub fn verify_header(&self, header: Option<&str>) -> Result<UserIdentity, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;

        let token = match header.split_once(' ') {
            Some(("Bearer", token)) if !token.is_empty() => token,
            _ => return Err(AuthError::MalformedHeader),
        };

        self.verify(token)
    }
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Extractor for handlers that require an authenticated caller
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<CredentialVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<CredentialVerifier>::from_ref(state);

        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| AuthError::MalformedHeader)?),
            None => None,
        };

        let identity = verifier.verify_header(header)?;
        debug!(user_id = %identity.id, "Authenticated request");

        Ok(AuthenticatedUser(identity))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::UserIdentity;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub fn identity(id: &str) -> UserIdentity {
        UserIdentity {
            id: id.to_string(),
            username: format!("{id}-name"),
            email: format!("{id}@example.com"),
            roles: vec!["user".to_string()],
        }
    }

    /// HS256 token for `identity(id)`, valid for an hour
    pub fn token(id: &str, secret: &str) -> String {
        let claims = json!({
            "id": id,
            "username": format!("{id}-name"),
            "email": format!("{id}@example.com"),
            "roles": ["user"],
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{identity, token};
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn sign(claims: serde_json::Value, algorithm: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(algorithm),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_everything_before_first_rotation() {
        let verifier = CredentialVerifier::new();
        assert!(!verifier.is_ready());
        assert!(matches!(
            verifier.verify(&token("u1", "S")),
            Err(AuthError::NotReady)
        ));
    }

    #[test]
    fn test_rotation_switches_accepted_secret() {
        let verifier = CredentialVerifier::new();
        verifier.rotate("S");
        assert!(verifier.is_ready());
        assert_eq!(verifier.verify(&token("u1", "S")).unwrap(), identity("u1"));

        verifier.rotate("T");
        assert!(matches!(
            verifier.verify(&token("u1", "S")),
            Err(AuthError::InvalidToken(_))
        ));
        assert_eq!(verifier.verify(&token("u1", "T")).unwrap(), identity("u1"));
    }

    #[test]
    fn test_accepts_hmac_family_without_expiry() {
        let verifier = CredentialVerifier::new();
        verifier.rotate("S");

        let claims = json!({"id": "u1", "username": "u1-name", "email": "u1@example.com"});
        let identity = verifier
            .verify(&sign(claims, Algorithm::HS512, "S"))
            .unwrap();

        assert_eq!(identity.id, "u1");
        assert!(identity.roles.is_empty());
    }

    #[test]
    fn test_rejects_expired_and_not_yet_valid() {
        let verifier = CredentialVerifier::new();
        verifier.rotate("S");
        let now = chrono::Utc::now().timestamp();

        let expired = json!({"id": "u1", "username": "a", "email": "b", "exp": now - 10});
        assert!(matches!(
            verifier.verify(&sign(expired, Algorithm::HS256, "S")),
            Err(AuthError::Expired)
        ));

        let early = json!({"id": "u1", "username": "a", "email": "b", "nbf": now + 600});
        assert!(matches!(
            verifier.verify(&sign(early, Algorithm::HS256, "S")),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_header_parsing() {
        let verifier = CredentialVerifier::new();
        verifier.rotate("S");

        assert!(matches!(
            verifier.verify_header(None),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            verifier.verify_header(Some("Basic dTE6cHc=")),
            Err(AuthError::MalformedHeader)
        ));
        assert!(matches!(
            verifier.verify_header(Some("Bearer")),
            Err(AuthError::MalformedHeader)
        ));
        assert!(matches!(
            verifier.verify_header(Some("Bearer not.a.jwt")),
            Err(AuthError::InvalidToken(_))
        ));

        let header = format!("Bearer {}", token("u1", "S"));
        assert_eq!(verifier.verify_header(Some(&header)).unwrap().id, "u1");
    }
}
