// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const LOGIN_SUCCEEDED: &str = "auth.login.succeeded";
pub const LOGIN_FAILED: &str = "auth.login.failed";
pub const CHALLENGE_ISSUED: &str = "auth.challenge.issued";
pub const CHALLENGE_CONFIRMED: &str = "auth.challenge.confirmed";
pub const CHALLENGE_REJECTED: &str = "auth.challenge.rejected";
pub const CHALLENGE_DISCARDED: &str = "auth.challenge.discarded";
pub const DELIVERY_FAILED: &str = "auth.challenge.delivery_failed";
pub const REFRESH_SUCCEEDED: &str = "auth.refresh.succeeded";
pub const REFRESH_STALE: &str = "auth.refresh.stale";
pub const LOGOUT: &str = "auth.logout";
pub const VERIFICATION_ISSUED: &str = "auth.verification.issued";
pub const VERIFICATION_CONFIRMED: &str = "auth.verification.confirmed";
pub const RATE_LIMIT_REJECTED: &str = "ratelimit.rejected";
pub const RATE_LIMIT_FAIL_OPEN: &str = "ratelimit.fail_open";
pub const STORE_FAILURE: &str = "store.failure";
