// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for login payloads, codes and opaque tokens.

use regex::Regex;
use std::sync::LazyLock;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321 SMTP limit
const MAX_PASSWORD_LENGTH: usize = 1024;

static OTP_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{6}$").expect("valid OTP regex"));
// 32 random bytes, base64url without padding
static OPAQUE_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").expect("valid opaque token regex"));
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Trim a submitted code and accept it only if it is exactly six ASCII digits
pub fn normalize_otp_code(code: &str) -> Option<&str> {
    let trimmed = code.trim();
    OTP_CODE_REGEX.is_match(trimmed).then_some(trimmed)
}

/// Shape check for tokens minted by `generate_secure_token`
pub fn is_opaque_token(token: &str) -> bool {
    OPAQUE_TOKEN_REGEX.is_match(token)
}

/// Shape check for trusted-device identifiers
pub fn is_device_id(device_id: &str) -> bool {
    is_opaque_token(device_id)
}

/// Plausible login identifier
pub fn is_email(email: &str) -> bool {
    let email = email.trim();
    email.len() <= MAX_EMAIL_LENGTH && EMAIL_REGEX.is_match(email)
}

/// Bounds on a submitted password; strength is the directory's concern
pub fn is_password_input(password: &str) -> bool {
    !password.is_empty() && password.len() <= MAX_PASSWORD_LENGTH
}
