// ============================
// gatekeeper-backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod directory;
pub mod otp;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;
pub mod token_generator;
pub mod verification;
mod service;
mod service_impl;

pub use directory::{DirectoryError, PrincipalDirectory, PrincipalRecord, StaticDirectory};
pub use otp::{
    CodeDelivery, CodeDeliveryRequest, DeliveryPurpose, DeviceGrant, StepUpAuthenticator,
    StepUpDecision,
};
pub use password::{hash_password, verify_password};
pub use rate_limit::{KeyStrategy, RateLimitPolicy, RateLimitRule, RateLimiter};
pub use session::{SessionAttributes, SessionRecord, SessionStore, SESSION_TTL};
pub use service::{
    AuthService, AuthenticatedPrincipal, ClientContext, ConfirmedLogin, IssuedSession, LoginInput,
    LoginOutcome, OtpConfirmation, VerificationOutcome,
};
pub use service_impl::CredentialManager;
pub use token::{TokenCodec, TokenKind, TokenPair};
pub use verification::EmailVerifier;
