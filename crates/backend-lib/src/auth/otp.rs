// ============================
// gatekeeper-backend-lib/src/auth/otp.rs
// ============================
//! Step-up one-time codes and trusted devices.
//!
//! A login from a device without a live trusted marker gets a 6-digit code
//! delivered out of band instead of tokens. Confirming the code consumes it in a
//! single compare-and-delete. Too many wrong guesses discard the pending code.
//!
//! Every store failure here fails closed with [`AuthError::ChallengeUnavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::token_generator::{generate_secure_token, secure_u32};
use crate::error::AuthError;
use crate::store::{otp_attempts_key, otp_key, trusted_device_key, KvStore, StoreError};
use crate::validation;

/// One-time code lifetime
pub const OTP_TTL: Duration = Duration::from_secs(10 * 60);

/// Trusted device lifetime
pub const TRUSTED_DEVICE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Wrong guesses allowed against one pending code
pub const MAX_ATTEMPTS: u32 = 5;

const OTP_MODULUS: u32 = 1_000_000;
const TRUSTED_MARKER: &str = "1";

/// What a delivered secret is for
#[derive(Clone, PartialEq, Eq)]
pub enum DeliveryPurpose {
    /// Six-digit step-up code
    LoginCode,
    /// Address confirmation; `link` already embeds the token
    EmailVerification { link: String },
}

impl DeliveryPurpose {
    /// Mail template the sink should render
    pub fn template(&self) -> &'static str {
        match self {
            DeliveryPurpose::LoginCode => "login_otp",
            DeliveryPurpose::EmailVerification { .. } => "verify_email",
        }
    }
}

/// Request handed to the delivery sink
#[derive(Clone)]
pub struct CodeDeliveryRequest {
    pub purpose: DeliveryPurpose,
    pub principal_id: String,
    pub email: String,
    pub name: String,
    pub code: String,
    pub expires_in: Duration,
    pub requested_at: DateTime<Utc>,
    pub client_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl fmt::Debug for CodeDeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeDeliveryRequest")
            .field("template", &self.purpose.template())
            .field("principal_id", &self.principal_id)
            .field("email", &self.email)
            .field("code", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Out-of-band channel (email, SMS, queue) that carries codes and links to the principal
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, request: CodeDeliveryRequest) -> anyhow::Result<()>;
}

/// Who a challenge is for and where the login came from
#[derive(Debug, Clone, Default)]
pub struct ChallengeTarget {
    pub principal_id: String,
    pub email: String,
    pub name: String,
    pub client_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Outcome of the step-up check at login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpDecision {
    /// The presented device is trusted; tokens may be issued
    Trusted,
    /// A code was issued; no tokens until it is confirmed
    ChallengeIssued { expires_in: Duration },
}

/// Freshly trusted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGrant {
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
    pub ttl: Duration,
}

fn unavailable(error: StoreError) -> AuthError {
    ::metrics::counter!(crate::metrics::STORE_FAILURE).increment(1);
    warn!(%error, "one-time code store failure");
    AuthError::ChallengeUnavailable
}

/// Uniform-enough 6-digit code: a u32 reduced mod 10^6 skews by at most 2^-12
pub fn generate_code() -> Result<String, AuthError> {
    let value = secure_u32().map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(format!("{:06}", value % OTP_MODULUS))
}

/// Step-up authenticator
#[derive(Clone)]
pub struct StepUpAuthenticator {
    store: Arc<dyn KvStore>,
    delivery: Arc<dyn CodeDelivery>,
    code_ttl: Duration,
    trusted_ttl: Duration,
    delivery_timeout: Duration,
    max_attempts: u32,
}

impl StepUpAuthenticator {
    pub fn new(store: Arc<dyn KvStore>, delivery: Arc<dyn CodeDelivery>) -> Self {
        Self {
            store,
            delivery,
            code_ttl: OTP_TTL,
            trusted_ttl: TRUSTED_DEVICE_TTL,
            delivery_timeout: Duration::from_secs(3),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_ttls(mut self, code_ttl: Duration, trusted_ttl: Duration) -> Self {
        self.code_ttl = code_ttl;
        self.trusted_ttl = trusted_ttl;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether `device_id` carries a live trusted marker for the principal.
    /// Absent or ill-formed ids are untrusted without a store round trip.
    pub async fn is_trusted(
        &self,
        principal_id: &str,
        device_id: Option<&str>,
    ) -> Result<bool, AuthError> {
        let Some(device_id) = device_id.filter(|id| validation::is_device_id(id)) else {
            return Ok(false);
        };
        let marker = self
            .store
            .get(&trusted_device_key(principal_id, device_id))
            .await
            .map_err(unavailable)?;
        Ok(marker.as_deref() == Some(TRUSTED_MARKER))
    }

    /// Decide whether the login may proceed or needs a code
    pub async fn begin(
        &self,
        target: &ChallengeTarget,
        device_id: Option<&str>,
    ) -> Result<StepUpDecision, AuthError> {
        if self.is_trusted(&target.principal_id, device_id).await? {
            return Ok(StepUpDecision::Trusted);
        }
        let expires_in = self.issue_challenge(target).await?;
        Ok(StepUpDecision::ChallengeIssued { expires_in })
    }

    /// Store a new code (replacing any earlier one) and hand it to the delivery sink
    pub async fn issue_challenge(&self, target: &ChallengeTarget) -> Result<Duration, AuthError> {
        let code = generate_code()?;
        let principal_id = &target.principal_id;
        self.store
            .delete(&otp_attempts_key(principal_id))
            .await
            .map_err(unavailable)?;
        self.store
            .set_ex(&otp_key(&target.principal_id), &code, self.code_ttl)
            .await
            .map_err(unavailable)?;
        ::metrics::counter!(crate::metrics::CHALLENGE_ISSUED).increment(1);

        let request = CodeDeliveryRequest {
            purpose: DeliveryPurpose::LoginCode,
            principal_id: target.principal_id.clone(),
            email: target.email.clone(),
            name: target.name.clone(),
            code,
            expires_in: self.code_ttl,
            requested_at: Utc::now(),
            client_address: target.client_address,
            user_agent: target.user_agent.clone(),
        };
        match tokio::time::timeout(self.delivery_timeout, self.delivery.deliver(request)).await {
            Ok(Ok(())) => {
                info!(principal_id = %target.principal_id, "one-time code issued");
            }
            Ok(Err(error)) => {
                ::metrics::counter!(crate::metrics::DELIVERY_FAILED).increment(1);
                warn!(principal_id = %target.principal_id, %error, "one-time code delivery failed");
            }
            Err(_) => {
                ::metrics::counter!(crate::metrics::DELIVERY_FAILED).increment(1);
                warn!(principal_id = %target.principal_id, "one-time code delivery timed out");
            }
        }

        Ok(self.code_ttl)
    }

    /// Consume a code. Exactly one of several concurrent confirmations succeeds.
    pub async fn confirm(&self, principal_id: &str, code: &str) -> Result<(), AuthError> {
        let code = validation::normalize_otp_code(code)
            .ok_or_else(|| AuthError::Malformed("code must be 6 digits".to_string()))?;

        let consumed = self
            .store
            .delete_if_eq(&otp_key(principal_id), code)
            .await
            .map_err(unavailable)?;
        if !consumed {
            ::metrics::counter!(crate::metrics::CHALLENGE_REJECTED).increment(1);
            self.record_miss(principal_id).await?;
            return Err(AuthError::InvalidCredentials);
        }
        ::metrics::counter!(crate::metrics::CHALLENGE_CONFIRMED).increment(1);

        if let Err(error) = self.store.delete(&otp_attempts_key(principal_id)).await {
            // the counter expires with the code anyway
            warn!(principal_id, %error, "failed to clear one-time code attempts");
        }
        Ok(())
    }

    /// Count a wrong guess; at the cap the pending code is discarded
    async fn record_miss(&self, principal_id: &str) -> Result<(), AuthError> {
        let attempts_key = otp_attempts_key(principal_id);
        let misses = self
            .store
            .incr_with_expiry(&attempts_key, self.code_ttl)
            .await
            .map_err(unavailable)?;
        if misses < i64::from(self.max_attempts) {
            return Ok(());
        }

        self.store
            .delete(&otp_key(principal_id))
            .await
            .map_err(unavailable)?;
        self.store.delete(&attempts_key).await.map_err(unavailable)?;
        ::metrics::counter!(crate::metrics::CHALLENGE_DISCARDED).increment(1);
        warn!(principal_id, misses, "one-time code discarded after repeated wrong guesses");
        Ok(())
    }

    /// Mint a device id and mark it trusted
    pub async fn trust_device(&self, principal_id: &str) -> Result<DeviceGrant, AuthError> {
        let device_id = generate_secure_token().map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store
            .set_ex(
                &trusted_device_key(principal_id, &device_id),
                TRUSTED_MARKER,
                self.trusted_ttl,
            )
            .await
            .map_err(unavailable)?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.trusted_ttl)
                .map_err(|e| AuthError::Internal(e.to_string()))?;
        info!(principal_id, "device marked trusted");
        Ok(DeviceGrant {
            device_id,
            expires_at,
            ttl: self.trusted_ttl,
        })
    }
}
