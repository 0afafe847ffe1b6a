// ============================
// crates/backend-lib/src/auth/token_generator.rs
// ============================
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
/** Secure random values for session-adjacent identifiers.
Device identifiers and one-time codes both draw from the OS entropy source;
a failing source is reported rather than silently weakened. */
use rand::{rngs::OsRng, TryRngCore};
use thiserror::Error;

/// Default token size in bytes (32 bytes = 256 bits of entropy)
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// The operating system refused to supply randomness
#[derive(Debug, Error)]
#[error("entropy source failed: {0}")]
pub struct EntropyError(String);

/** Generate a cryptographically secure random token
# Returns
A base64 URL-safe encoded string without padding (43 chars) */
pub fn generate_secure_token() -> Result<String, EntropyError> {
    generate_secure_token_with_size(DEFAULT_TOKEN_BYTES)
}

/** Generate a cryptographically secure random token with specified size
# Arguments
* `bytes` - The size of the random token in bytes */
pub fn generate_secure_token_with_size(bytes: usize) -> Result<String, EntropyError> {
    let mut buffer = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buffer)
        .map_err(|e| EntropyError(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buffer))
}

/// Draw a uniformly random `u32` from the OS
pub fn secure_u32() -> Result<u32, EntropyError> {
    OsRng
        .try_next_u32()
        .map_err(|e| EntropyError(e.to_string()))
}
