use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::directory::{DirectoryError, PrincipalDirectory, PrincipalRecord};
use super::otp::{ChallengeTarget, CodeDelivery, StepUpAuthenticator, StepUpDecision};
use super::password::verify_password_blocking;
use super::service::{
    AuthService, AuthenticatedPrincipal, ConfirmedLogin, IssuedSession, LoginInput, LoginOutcome,
    OtpConfirmation, VerificationOutcome,
};
use super::session::{SessionAttributes, SessionStore};
use super::token::{TokenCodec, TokenKind, TokenPair};
use super::verification::{EmailVerifier, VerificationTarget};
use crate::config::Settings;
use crate::error::AuthError;
use crate::store::{KvStore, StoreError};
use crate::validation;

fn store_unavailable(error: StoreError) -> AuthError {
    ::metrics::counter!(crate::metrics::STORE_FAILURE).increment(1);
    warn!(%error, "session store failure");
    AuthError::ServiceUnavailable(error.to_string())
}

fn directory_unavailable(error: DirectoryError) -> AuthError {
    warn!(%error, "principal directory failure");
    AuthError::ServiceUnavailable(error.to_string())
}

fn attributes_of(record: &PrincipalRecord) -> SessionAttributes {
    SessionAttributes {
        name: record.name.clone(),
        email: record.email.clone(),
        avatar_url: record.avatar_url.clone(),
    }
}

/// Credential & session manager
pub struct CredentialManager {
    codec: TokenCodec,
    sessions: SessionStore,
    step_up: StepUpAuthenticator,
    verifier: EmailVerifier,
    directory: Arc<dyn PrincipalDirectory>,
    session_ttl: Duration,
}

impl CredentialManager {
    pub fn new(
        codec: TokenCodec,
        sessions: SessionStore,
        step_up: StepUpAuthenticator,
        verifier: EmailVerifier,
        directory: Arc<dyn PrincipalDirectory>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            sessions,
            step_up,
            verifier,
            directory,
            session_ttl,
        }
    }

    /// Wire every component against one store
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn KvStore>,
        directory: Arc<dyn PrincipalDirectory>,
        delivery: Arc<dyn CodeDelivery>,
    ) -> Self {
        let delivery_timeout = Duration::from_millis(settings.otp.delivery_timeout_ms);
        let step_up = StepUpAuthenticator::new(store.clone(), delivery.clone())
            .with_ttls(
                Duration::from_secs(settings.otp.code_ttl_secs),
                Duration::from_secs(settings.otp.trusted_device_ttl_secs),
            )
            .with_delivery_timeout(delivery_timeout)
            .with_max_attempts(settings.otp.max_attempts);
        let verifier = EmailVerifier::new(
            store.clone(),
            delivery,
            settings.verification.link_base.clone(),
        )
        .with_ttl(Duration::from_secs(settings.verification.token_ttl_secs))
        .with_delivery_timeout(delivery_timeout);

        Self::new(
            TokenCodec::new(&settings.tokens),
            SessionStore::new(store),
            step_up,
            verifier,
            directory,
            Duration::from_secs(settings.session.ttl_secs),
        )
    }

    async fn find_principal(&self, identifier: &str) -> Result<Option<PrincipalRecord>, AuthError> {
        self.directory
            .find_by_identifier(identifier)
            .await
            .map_err(directory_unavailable)
    }

    /// Replace the principal's session with a fresh id and sign a pair for it
    async fn mint_session(&self, principal: &PrincipalRecord) -> Result<IssuedSession, AuthError> {
        let session_id = Uuid::new_v4().to_string();
        let tokens = self.codec.issue_pair(&principal.id, &session_id)?;
        let attributes = attributes_of(principal);

        self.sessions
            .create_or_replace(&principal.id, &session_id, &attributes, self.session_ttl)
            .await
            .map_err(store_unavailable)?;

        ::metrics::counter!(crate::metrics::LOGIN_SUCCEEDED).increment(1);
        info!(principal_id = %principal.id, "session issued");
        Ok(IssuedSession {
            principal_id: principal.id.clone(),
            session_id,
            attributes,
            tokens,
        })
    }
}

#[async_trait]
impl AuthService for CredentialManager {
    async fn login(&self, input: LoginInput) -> Result<LoginOutcome, AuthError> {
        if !validation::is_email(&input.identifier) || !validation::is_password_input(&input.secret) {
            return Err(AuthError::Malformed("invalid login payload".to_string()));
        }

        let Some(principal) = self.find_principal(&input.identifier).await? else {
            ::metrics::counter!(crate::metrics::LOGIN_FAILED).increment(1);
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password_blocking(principal.password_hash.clone(), input.secret).await {
            ::metrics::counter!(crate::metrics::LOGIN_FAILED).increment(1);
            info!(principal_id = %principal.id, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let target = ChallengeTarget {
            principal_id: principal.id.clone(),
            email: principal.email.clone(),
            name: principal.name.clone(),
            client_address: input.client.address,
            user_agent: input.client.user_agent.clone(),
        };
        match self.step_up.begin(&target, input.device_id.as_deref()).await? {
            StepUpDecision::Trusted => Ok(LoginOutcome::TokensIssued(self.mint_session(&principal).await?)),
            StepUpDecision::ChallengeIssued { expires_in } => {
                info!(principal_id = %principal.id, "login requires one-time code");
                Ok(LoginOutcome::ChallengeRequired { expires_in })
            }
        }
    }

    async fn confirm_challenge(&self, input: OtpConfirmation) -> Result<ConfirmedLogin, AuthError> {
        if validation::normalize_otp_code(&input.code).is_none() {
            return Err(AuthError::Malformed("code must be 6 digits".to_string()));
        }

        // an unknown principal looks exactly like a wrong code
        let Some(principal) = self.find_principal(&input.identifier).await? else {
            ::metrics::counter!(crate::metrics::CHALLENGE_REJECTED).increment(1);
            return Err(AuthError::InvalidCredentials);
        };

        self.step_up.confirm(&principal.id, &input.code).await?;
        let session = self.mint_session(&principal).await?;
        // only a login that actually completed may leave a trusted device behind
        let device = if input.remember {
            Some(self.step_up.trust_device(&principal.id).await?)
        } else {
            None
        };

        Ok(ConfirmedLogin { session, device })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;

        let record = self
            .sessions
            .get(&claims.sub)
            .await
            .map_err(store_unavailable)?
            .ok_or(AuthError::InvalidCredentials)?;
        if record.session_id != claims.sid {
            ::metrics::counter!(crate::metrics::REFRESH_STALE).increment(1);
            info!(principal_id = %claims.sub, "stale refresh token presented");
            return Err(AuthError::InvalidCredentials);
        }

        let new_sid = Uuid::new_v4().to_string();
        let tokens = self.codec.issue_pair(&claims.sub, &new_sid)?;
        let rotated = self
            .sessions
            .rotate(&claims.sub, &claims.sid, &new_sid, self.session_ttl)
            .await
            .map_err(store_unavailable)?;
        if !rotated {
            // a concurrent refresh won the swap
            ::metrics::counter!(crate::metrics::REFRESH_STALE).increment(1);
            info!(principal_id = %claims.sub, "refresh lost rotation race");
            return Err(AuthError::InvalidCredentials);
        }

        ::metrics::counter!(crate::metrics::REFRESH_SUCCEEDED).increment(1);
        info!(principal_id = %claims.sub, "session refreshed");
        Ok(tokens)
    }

    async fn logout(&self, principal_id: &str) -> Result<(), AuthError> {
        self.sessions
            .delete(principal_id)
            .await
            .map_err(store_unavailable)?;
        ::metrics::counter!(crate::metrics::LOGOUT).increment(1);
        info!(principal_id, "logged out");
        Ok(())
    }

    async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedPrincipal, AuthError> {
        let claims = self.codec.verify(access_token, TokenKind::Access)?;

        let record = match self.sessions.get(&claims.sub).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(AuthError::InvalidCredentials),
            Err(error) => {
                ::metrics::counter!(crate::metrics::STORE_FAILURE).increment(1);
                warn!(principal_id = %claims.sub, %error, "session lookup failed, rejecting");
                return Err(AuthError::InvalidCredentials);
            }
        };
        if record.session_id != claims.sid {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(AuthenticatedPrincipal {
            principal_id: record.principal_id,
            session_id: record.session_id,
            attributes: record.attributes,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    async fn request_verification(&self, principal_id: &str) -> Result<VerificationOutcome, AuthError> {
        let principal = self
            .directory
            .find_by_id(principal_id)
            .await
            .map_err(directory_unavailable)?
            .ok_or(AuthError::InvalidCredentials)?;
        if principal.email_verified {
            return Ok(VerificationOutcome::AlreadyVerified);
        }

        let expires_in = self
            .verifier
            .issue(&VerificationTarget {
                principal_id: principal.id,
                email: principal.email,
                name: principal.name,
            })
            .await?;
        Ok(VerificationOutcome::LinkSent { expires_in })
    }

    async fn confirm_verification(&self, token: &str) -> Result<String, AuthError> {
        let principal_id = self.verifier.redeem(token).await?;
        let known = self
            .directory
            .mark_verified(&principal_id)
            .await
            .map_err(directory_unavailable)?;
        if !known {
            // the principal was removed after the link went out
            return Err(AuthError::InvalidCredentials);
        }
        info!(principal_id, "email address verified");
        Ok(principal_id)
    }

    async fn update_profile(
        &self,
        principal_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<bool, AuthError> {
        self.sessions
            .update_attributes(principal_id, attributes)
            .await
            .map_err(store_unavailable)
    }
}
