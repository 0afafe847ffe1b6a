// ============================
// gatekeeper-backend-lib/src/auth/verification.rs
// ============================
//! Email address verification links.
//!
//! A link carries an opaque token that maps to the principal for a day. The
//! token is single use: redeeming it is a compare-and-delete against the
//! principal id it was issued for.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::otp::{CodeDelivery, CodeDeliveryRequest, DeliveryPurpose};
use super::token_generator::generate_secure_token;
use crate::error::AuthError;
use crate::store::{verification_key, KvStore, StoreError};
use crate::validation;

/// Verification link lifetime
pub const VERIFICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn unavailable(error: StoreError) -> AuthError {
    ::metrics::counter!(crate::metrics::STORE_FAILURE).increment(1);
    warn!(%error, "verification store failure");
    AuthError::ServiceUnavailable(error.to_string())
}

/// Whose address is being verified
#[derive(Debug, Clone)]
pub struct VerificationTarget {
    pub principal_id: String,
    pub email: String,
    pub name: String,
}

/// Issues and redeems verification tokens
#[derive(Clone)]
pub struct EmailVerifier {
    store: Arc<dyn KvStore>,
    delivery: Arc<dyn CodeDelivery>,
    ttl: Duration,
    link_base: String,
    delivery_timeout: Duration,
}

impl EmailVerifier {
    pub fn new(
        store: Arc<dyn KvStore>,
        delivery: Arc<dyn CodeDelivery>,
        link_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            delivery,
            ttl: VERIFICATION_TTL,
            link_base: link_base.into(),
            delivery_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    fn link_for(&self, token: &str) -> String {
        let separator = if self.link_base.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={token}", self.link_base)
    }

    /// Store a fresh token and send the link. Earlier links stay valid until they expire.
    pub async fn issue(&self, target: &VerificationTarget) -> Result<Duration, AuthError> {
        let token = generate_secure_token().map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store
            .set_ex(&verification_key(&token), &target.principal_id, self.ttl)
            .await
            .map_err(unavailable)?;
        ::metrics::counter!(crate::metrics::VERIFICATION_ISSUED).increment(1);

        let request = CodeDeliveryRequest {
            purpose: DeliveryPurpose::EmailVerification {
                link: self.link_for(&token),
            },
            principal_id: target.principal_id.clone(),
            email: target.email.clone(),
            name: target.name.clone(),
            code: token,
            expires_in: self.ttl,
            requested_at: Utc::now(),
            client_address: None,
            user_agent: None,
        };
        match tokio::time::timeout(self.delivery_timeout, self.delivery.deliver(request)).await {
            Ok(Ok(())) => info!(principal_id = %target.principal_id, "verification link issued"),
            Ok(Err(error)) => {
                ::metrics::counter!(crate::metrics::DELIVERY_FAILED).increment(1);
                warn!(principal_id = %target.principal_id, %error, "verification link delivery failed");
            }
            Err(_) => {
                ::metrics::counter!(crate::metrics::DELIVERY_FAILED).increment(1);
                warn!(principal_id = %target.principal_id, "verification link delivery timed out");
            }
        }
        Ok(self.ttl)
    }

    /// Redeem a token, returning the principal it was issued for
    pub async fn redeem(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        if !validation::is_opaque_token(token) {
            return Err(AuthError::Malformed("malformed verification token".to_string()));
        }

        let key = verification_key(token);
        let Some(principal_id) = self.store.get(&key).await.map_err(unavailable)? else {
            return Err(AuthError::InvalidCredentials);
        };
        // a concurrent redemption may have won between the read and here
        if !self
            .store
            .delete_if_eq(&key, &principal_id)
            .await
            .map_err(unavailable)?
        {
            return Err(AuthError::InvalidCredentials);
        }

        ::metrics::counter!(crate::metrics::VERIFICATION_CONFIRMED).increment(1);
        Ok(principal_id)
    }
}
