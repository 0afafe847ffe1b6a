// ============================
// crates/backend-lib/src/store/redis.rs
// ============================
//! Redis implementation of [`KvStore`].
//!
//! Conditional writes are Lua scripts so each one is a single round trip and
//! executes atomically on the server. Every call is bounded by the configured
//! timeout regardless of the caller's own deadline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::{KvStore, StoreError, StoreResult};

const INCR_WITH_EXPIRY: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
  redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

const DELETE_IF_EQ: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
end
return 0
"#;

const HASH_UPDATE_EXISTING: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
  return 0
end
redis.call("HSET", KEYS[1], unpack(ARGV))
return 1
"#;

// ARGV: field, expected, ttl_ms, then field/value pairs
const HASH_COMPARE_AND_SET: &str = r#"
if redis.call("HGET", KEYS[1], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call("HSET", KEYS[1], unpack(ARGV, 4))
redis.call("PEXPIRE", KEYS[1], ARGV[3])
return 1
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::TypeError => StoreError::Corrupt {
                key: String::new(),
                reason: err.to_string(),
            },
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    // PEXPIRE rejects zero; round sub-millisecond windows up
    (duration.as_millis() as u64).max(1)
}

/// Redis-backed store sharing one multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
    incr_with_expiry: Script,
    delete_if_eq: Script,
    hash_update: Script,
    hash_compare_and_set: Script,
}

impl RedisStore {
    /// Connect to `url`, failing if the first connection cannot be made within `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(timeout)),
        };

        Ok(Self {
            conn,
            timeout,
            incr_with_expiry: Script::new(INCR_WITH_EXPIRY),
            delete_if_eq: Script::new(DELETE_IF_EQ),
            hash_update: Script::new(HASH_UPDATE_EXISTING),
            hash_compare_and_set: Script::new(HASH_COMPARE_AND_SET),
        })
    }

    async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.delete_if_eq.prepare_invoke();
        invocation.key(key).arg(expected);
        self.bounded(async move {
            let removed: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let mut invocation = self.incr_with_expiry.prepare_invoke();
        invocation.key(key).arg(millis(window));
        self.bounded(async move {
            let count: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(count)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            // -2 missing, -1 no expiry
            let remaining: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
            Ok((remaining >= 0).then(|| Duration::from_millis(remaining as u64)))
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let applied: i64 = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(applied == 1)
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let fields: HashMap<String, String> =
                redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
            Ok(fields)
        })
        .await
    }

    async fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(key)
            .ignore()
            .cmd("HSET")
            .arg(key)
            .arg(fields)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore();
        self.bounded(async move {
            let _: () = pipe.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn hash_update(&self, key: &str, fields: &[(String, String)]) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.hash_update.prepare_invoke();
        invocation.key(key).arg(fields);
        self.bounded(async move {
            let applied: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(applied == 1)
        })
        .await
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.hash_compare_and_set.prepare_invoke();
        invocation
            .key(key)
            .arg(field)
            .arg(expected)
            .arg(millis(ttl))
            .arg(fields);
        self.bounded(async move {
            let applied: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(applied == 1)
        })
        .await
    }
}
