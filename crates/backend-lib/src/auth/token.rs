//! Signed access/refresh tokens bound to a session identifier.
//!
//! Both kinds are HS256 JWTs signed with separate secrets, so a leaked access
//! secret cannot mint refresh tokens. The `typ` claim is checked as well, which
//! keeps a token from being replayed as the other kind even if an operator
//! misconfigures both secrets to the same value.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::TokenSettings;

/// Which of the two token kinds is being issued or verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Principal id
    pub sub: String,
    /// Session id the token was issued for
    pub sid: String,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Why a token was refused. Callers treat every variant as a plain rejection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is malformed")]
    Malformed,

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// A freshly signed token and the instant it stops being valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Access and refresh token minted together for one session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn from_secret(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Issues and verifies session-bound tokens
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
}

impl TokenCodec {
    pub fn new(settings: &TokenSettings) -> Self {
        Self {
            access: SigningKeys::from_secret(
                &settings.access_secret,
                Duration::from_secs(settings.access_ttl_secs),
            ),
            refresh: SigningKeys::from_secret(
                &settings.refresh_secret,
                Duration::from_secs(settings.refresh_ttl_secs),
            ),
            issuer: settings.issuer.clone(),
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Sign a token of `kind` for a principal and session
    pub fn issue(
        &self,
        principal_id: &str,
        session_id: &str,
        kind: TokenKind,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal_id, session_id, kind, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        principal_id: &str,
        session_id: &str,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let keys = self.keys(kind);
        let lifetime = ChronoDuration::from_std(keys.ttl)
            .map_err(|e| TokenError::Signing(format!("ttl out of range: {e}")))?;
        let expires_at = issued_at + lifetime;

        let claims = SessionClaims {
            sub: principal_id.to_string(),
            sid: session_id.to_string(),
            typ: kind,
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Issue both kinds for one session id
    pub fn issue_pair(&self, principal_id: &str, session_id: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue(principal_id, session_id, TokenKind::Access)?,
            refresh: self.issue(principal_id, session_id, TokenKind::Refresh)?,
        })
    }

    /// Check signature, expiry, issuer and kind, returning the claims
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);

        let claims = jsonwebtoken::decode::<SessionClaims>(token, &self.keys(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                _ => TokenError::Malformed,
            })?;

        if claims.typ != kind {
            return Err(TokenError::InvalidSignature);
        }
        if claims.sid.is_empty() || claims.sub.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(claims)
    }
}
