// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! exchanged between `gatekeeper` clients and the authentication endpoints.
//! Tokens themselves travel as HTTP-only cookies; these bodies only carry
//! metadata about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookie carrying the short-lived access token
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie carrying the long-lived refresh token
pub const REFRESH_COOKIE: &str = "refresh_token";
/// Cookie carrying the trusted-device identifier
pub const DEVICE_COOKIE: &str = "device_id";

/// Body of `POST /api/login`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /api/login/otp/confirm`
/// # Fields
/// * `email` - Identifier used for the original login
/// * `code` - Six digit code delivered out of band
/// * `remember_device` - Mint a trusted-device identifier on success
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OtpConfirmRequest {
    pub email: String,
    pub code: String,
    #[serde(default)]
    pub remember_device: bool,
}

/// Returned when a login completes and cookies were set
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    /// Set only when a device was remembered during OTP confirmation
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trusted_device_expires_at: Option<DateTime<Utc>>,
}

/// Returned with `202 Accepted` when a one-time code must be confirmed first
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub requires_otp: bool,
    pub expires_in_secs: u64,
}

/// Returned from `POST /api/refresh`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefreshResponse {
    pub refreshed: bool,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Returned from `POST /api/logout`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Cached session attributes returned from `GET /api/session`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Returned from `POST /api/verify/init`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationResponse {
    pub already_verified: bool,
    /// Lifetime of the link just sent
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_in_secs: Option<u64>,
}

/// Body of `POST /api/verify/confirm`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyConfirmRequest {
    pub token: String,
}

/// Returned from `POST /api/verify/confirm`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfirmResponse {
    pub verified: bool,
}

/// Error envelope used by every rejection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
