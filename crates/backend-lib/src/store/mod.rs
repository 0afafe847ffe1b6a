// ============================
// crates/backend-lib/src/store/mod.rs
// ============================
//! Key-value store abstraction shared by every component.
//!
//! All coordination state lives behind [`KvStore`]. Operations that must not
//! interleave (counter creation, code consumption, session rotation) are single
//! atomic calls so that no component ever needs a read-modify-write sequence.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Default deadline applied to every store round trip
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the in-process store drops expired keys
pub const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised by a store backend.
///
/// These never reach callers of the public API; each component maps them to
/// its own fail-open or fail-closed outcome.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for key-value backends
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string value with an expiry, replacing whatever was there
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Remove a key, reporting whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remove a key only when its current value equals `expected`.
    ///
    /// Exactly one of several concurrent callers presenting the same value
    /// observes `true`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Increment a counter; when the increment creates the key, attach `window`
    /// as its expiry in the same step. Later increments never touch the expiry.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64>;

    /// Remaining lifetime of a key. `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Replace the expiry of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Read every field of a hash. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Atomically drop any previous hash at `key`, write `fields` and set `ttl`
    async fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Write `fields` into an existing hash, keeping its expiry.
    /// Returns `false` (and writes nothing) when the hash does not exist.
    async fn hash_update(&self, key: &str, fields: &[(String, String)]) -> StoreResult<bool>;

    /// Write `fields` and reset the expiry to `ttl`, but only when `field`
    /// currently holds `expected`. Returns whether the write happened.
    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<bool>;
}

/// URL selecting the in-process store
pub const MEMORY_STORE_URL: &str = "memory://";

/// Open the store named by `url`: `memory://` for [`MemoryStore`], anything else via Redis.
/// Must be called inside a tokio runtime.
pub async fn open(url: &str, timeout: Duration) -> StoreResult<Arc<dyn KvStore>> {
    if url == MEMORY_STORE_URL {
        let store = MemoryStore::new();
        store.spawn_sweeper(MEMORY_SWEEP_INTERVAL);
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(RedisStore::connect(url, timeout).await?))
}

/// Key of the session hash for a principal
pub fn session_key(principal_id: &str) -> String {
    format!("session:{principal_id}")
}

/// Key of the pending one-time code for a principal
pub fn otp_key(principal_id: &str) -> String {
    format!("otp:{principal_id}")
}

/// Key of the wrong-guess counter for a principal's pending code
pub fn otp_attempts_key(principal_id: &str) -> String {
    format!("otp_attempts:{principal_id}")
}

/// Key of a pending email verification token
pub fn verification_key(token: &str) -> String {
    format!("verify:{token}")
}

/// Key of the trusted-device marker for a principal and device
pub fn trusted_device_key(principal_id: &str, device_id: &str) -> String {
    format!("trusted:{principal_id}:{device_id}")
}

/// Key of a rate-limit counter
pub fn rate_limit_key(scope: &str, identity: &str) -> String {
    format!("ratelimit:{scope}:{identity}")
}
