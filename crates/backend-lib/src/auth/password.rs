// ============================
// gatekeeper-backend-lib/src/auth/password.rs
// ============================
//! Password hashing and verification.
//!
//! New hashes are Argon2id. Verification also accepts scrypt PHC strings so
//! directories provisioned with older hashes keep working.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString},
    Argon2,
};
use scrypt::Scrypt;
use zeroize::Zeroizing;

/// Hash a password using Argon2id with default parameters
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

/// Verify a password against a PHC-formatted hash.
/// Unparseable hashes never verify.
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    parsed_hash
        .verify_password(&[&Argon2::default(), &Scrypt], plain.as_bytes())
        .is_ok()
}

/// Verify on the blocking pool; hashing is deliberately slow
pub async fn verify_password_blocking(hash: String, plain: Zeroizing<String>) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&hash, &plain))
        .await
        .unwrap_or(false)
}
