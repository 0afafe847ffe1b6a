// ============================
// crates/backend-lib/src/store/memory.rs
// ============================
//! In-process store backed by a sharded concurrent map.
//!
//! Every mutating operation runs under the shard lock of its key, which gives the
//! same single-key atomicity the Redis scripts provide. Expiry is evaluated lazily
//! on access against the tokio clock, so paused-time tests can step through TTLs.
//! Keys nobody reads again are reclaimed by [`MemoryStore::spawn_sweeper`].

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{KvStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

/// Entry in the store map
#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    /// `None` means the key never expires
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: "operation against a key holding the wrong kind of value".to_string(),
    }
}

/// Single-process [`KvStore`] for tests and local development
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.slots)
    }

    /// Number of keys held, expired or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Purge expired keys every `period`. The task ends once the last clone
    /// of the store is dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let slots: Weak<DashMap<String, Slot>> = Arc::downgrade(&self.slots);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(slots) = slots.upgrade() else {
                    break;
                };
                let purged = purge(&slots);
                if purged > 0 {
                    debug!(purged, remaining = slots.len(), "expired keys purged");
                }
            }
        })
    }

    /// Fetch a live copy of a slot, evicting it first if it has expired
    fn live(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        self.slots.remove_if(key, |_, slot| !slot.is_live(now));
        self.slots.get(key).map(|slot| slot.clone())
    }
}

fn purge(slots: &DashMap<String, Slot>) -> usize {
    let now = Instant::now();
    let before = slots.len();
    slots.retain(|_, slot| slot.is_live(now));
    before.saturating_sub(slots.len())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.live(key) {
            Some(Slot { value: Value::Text(text), .. }) => Ok(Some(text)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .map_or(false, |(_, slot)| slot.is_live(now)))
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let removed = self.slots.remove_if(key, |_, slot| {
            slot.is_live(now) && matches!(&slot.value, Value::Text(text) if text == expected)
        });
        Ok(removed.is_some())
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64> {
        let now = Instant::now();
        let fresh = || Slot {
            value: Value::Text("1".to_string()),
            expires_at: Some(now + window),
        };

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                match &mut occupied.get_mut().value {
                    Value::Text(text) => {
                        let current: i64 = text.parse().map_err(|_| StoreError::Corrupt {
                            key: key.to_string(),
                            reason: format!("counter holds non-integer {text:?}"),
                        })?;
                        let next = current + 1;
                        *text = next.to_string();
                        Ok(next)
                    }
                    Value::Hash(_) => Err(wrong_type(key)),
                }
            }
            Entry::Occupied(mut expired) => {
                expired.insert(fresh());
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match self.live(key) {
            Some(Slot { value: Value::Hash(fields), .. }) => Ok(fields),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_replace(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        let hash = fields.iter().cloned().collect();
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Hash(hash),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn hash_update(&self, key: &str, fields: &[(String, String)]) -> StoreResult<bool> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => match &mut slot.value {
                Value::Hash(hash) => {
                    hash.extend(fields.iter().cloned());
                    Ok(true)
                }
                Value::Text(_) => Err(wrong_type(key)),
            },
            _ => Ok(false),
        }
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                let Value::Hash(hash) = &mut slot.value else {
                    return Err(wrong_type(key));
                };
                if hash.get(field).map(String::as_str) != Some(expected) {
                    return Ok(false);
                }
                hash.extend(fields.iter().cloned());
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
