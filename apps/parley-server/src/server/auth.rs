use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use parley_core::UserId;
use serde::{Deserialize, Serialize};

use super::{core::AppState, errors::ChatFailure, metrics::record_auth_failure};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum TokenError {
    #[error("token verification key is empty")]
    MissingSecret,
    #[error("token has expired")]
    Expired,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token is malformed")]
    Malformed,
    #[error("token subject is not a user id")]
    InvalidSubject,
}

impl TokenError {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::MissingSecret => "missing_secret",
            Self::Expired => "expired_token",
            Self::BadSignature => "bad_signature",
            Self::Malformed => "malformed_token",
            Self::InvalidSubject => "invalid_subject",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    #[serde(default)]
    pub(crate) email: Option<String>,
    pub(crate) exp: i64,
}

/// Verified subject of a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub(crate) user_id: UserId,
    pub(crate) email: Option<String>,
    pub(crate) expires_at_unix: i64,
}

/// HS256 verifier over a pre-shared key. Holds no mutable state.
pub(crate) struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub(crate) fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    pub(crate) fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }
        })?;
        let user_id =
            UserId::try_from(data.claims.sub.as_str()).map_err(|_| TokenError::InvalidSubject)?;
        Ok(Identity {
            user_id,
            email: data.claims.email,
            expires_at_unix: data.claims.exp,
        })
    }
}

pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ChatFailure> {
    let access_token = bearer_token(headers).ok_or(ChatFailure::Unauthorized)?;
    state.tokens.verify(access_token).map_err(|e| {
        record_auth_failure(e.reason());
        ChatFailure::Unauthorized
    })
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

pub(crate) fn now_unix_millis() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, subject: &str, expires_at_unix: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: subject.to_owned(),
            email: Some(format!("{subject}@example.test")),
            exp: expires_at_unix,
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("test token should encode")
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
    use parley_core::UserId;

    use super::{bearer_token, issue_test_token, now_unix_millis, TokenError, TokenVerifier};

    fn now_unix() -> i64 {
        now_unix_millis() / 1000
    }

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn verifies_signed_token_and_extracts_identity() {
        let verifier = TokenVerifier::new(SECRET.as_bytes()).expect("verifier should build");
        let user_id = UserId::new();
        let expires_at = now_unix() + 600;
        let token = issue_test_token(SECRET, &user_id.to_string(), expires_at);

        let identity = verifier.verify(&token).expect("token should verify");

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.expires_at_unix, expires_at);
        assert_eq!(
            identity.email,
            Some(format!("{user_id}@example.test"))
        );
    }

    #[test]
    fn rejects_expired_foreign_and_garbage_tokens() {
        let verifier = TokenVerifier::new(SECRET.as_bytes()).expect("verifier should build");
        let subject = UserId::new().to_string();

        let expired = issue_test_token(SECRET, &subject, now_unix() - 5);
        assert_eq!(verifier.verify(&expired), Err(TokenError::Expired));

        let foreign = issue_test_token("another-secret", &subject, now_unix() + 600);
        assert_eq!(verifier.verify(&foreign), Err(TokenError::BadSignature));

        assert_eq!(verifier.verify("not.a.token"), Err(TokenError::Malformed));
    }

    #[test]
    fn rejects_non_uuid_subject() {
        let verifier = TokenVerifier::new(SECRET.as_bytes()).expect("verifier should build");
        let token = issue_test_token(SECRET, "alice", now_unix() + 600);
        assert_eq!(verifier.verify(&token), Err(TokenError::InvalidSubject));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(
            TokenVerifier::new(b""),
            Err(TokenError::MissingSecret)
        ));
    }

    #[test]
    fn bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
