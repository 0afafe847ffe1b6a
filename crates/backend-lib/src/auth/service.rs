use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use zeroize::Zeroizing;

use super::otp::DeviceGrant;
use super::session::SessionAttributes;
use super::token::TokenPair;
use crate::error::AuthError;

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

pub struct LoginInput {
    pub identifier: String,
    pub secret: Zeroizing<String>,
    /// Device id cookie presented with the request
    pub device_id: Option<String>,
    pub client: ClientContext,
}

#[derive(Debug, Clone)]
pub struct OtpConfirmation {
    pub identifier: String,
    pub code: String,
    pub remember: bool,
}

/// A minted session and the tokens bound to it
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub principal_id: String,
    pub session_id: String,
    pub attributes: SessionAttributes,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    TokensIssued(IssuedSession),
    /// A code went out of band; nothing was minted
    ChallengeRequired { expires_in: Duration },
}

/// Result of asking for a verification link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    AlreadyVerified,
    LinkSent { expires_in: Duration },
}

#[derive(Debug, Clone)]
pub struct ConfirmedLogin {
    pub session: IssuedSession,
    pub device: Option<DeviceGrant>,
}

/// Principal behind a request that passed the session gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub principal_id: String,
    pub session_id: String,
    pub attributes: SessionAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, input: LoginInput) -> Result<LoginOutcome, AuthError>;
    async fn confirm_challenge(&self, input: OtpConfirmation) -> Result<ConfirmedLogin, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
    async fn logout(&self, principal_id: &str) -> Result<(), AuthError>;
    async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedPrincipal, AuthError>;
    async fn request_verification(&self, principal_id: &str) -> Result<VerificationOutcome, AuthError>;
    /// Redeem a verification token, returning the principal it verified
    async fn confirm_verification(&self, token: &str) -> Result<String, AuthError>;
    async fn update_profile(
        &self,
        principal_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<bool, AuthError>;
}
