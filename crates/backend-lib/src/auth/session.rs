// ============================
// gatekeeper-backend-lib/src/auth/session.rs
// ============================
//! Authoritative session record per principal.
//!
//! A principal has at most one live session id. Login overwrites the record,
//! refresh swaps the id with a compare-and-swap, logout deletes it.
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{session_key, KvStore, StoreError, StoreResult};

/// Session TTL (time to live)
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60 * 24); // 24 hours

const FIELD_SID: &str = "sid";
const FIELD_USER_ID: &str = "user_id";
const FIELD_NAME: &str = "name";
const FIELD_EMAIL: &str = "email";
const FIELD_AVATAR: &str = "avatar_url";
const FIELD_CREATED: &str = "created_at";
const FIELD_UPDATED: &str = "updated_at";

/// Display attributes cached alongside the session id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAttributes {
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

/// Session information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub principal_id: String,
    pub session_id: String,
    pub attributes: SessionAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl SessionAttributes {
    fn fields(&self) -> [(String, String); 3] {
        [
            (FIELD_NAME.to_string(), self.name.clone()),
            (FIELD_EMAIL.to_string(), self.email.clone()),
            (FIELD_AVATAR.to_string(), self.avatar_url.clone()),
        ]
    }
}

impl SessionRecord {
    fn from_fields(key: &str, mut fields: HashMap<String, String>) -> StoreResult<Self> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let parse_time = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| corrupt("timestamp is not RFC 3339"))
        };

        let session_id = fields
            .remove(FIELD_SID)
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| corrupt("missing session id"))?;
        let principal_id = fields
            .remove(FIELD_USER_ID)
            .ok_or_else(|| corrupt("missing principal id"))?;
        let created_at = fields
            .get(FIELD_CREATED)
            .ok_or_else(|| corrupt("missing created_at"))
            .and_then(|raw| parse_time(raw.as_str()))?;
        let updated_at = fields
            .get(FIELD_UPDATED)
            .map(|raw| parse_time(raw.as_str()))
            .transpose()?;

        Ok(Self {
            principal_id,
            session_id,
            attributes: SessionAttributes {
                name: fields.remove(FIELD_NAME).unwrap_or_default(),
                email: fields.remove(FIELD_EMAIL).unwrap_or_default(),
                avatar_url: fields.remove(FIELD_AVATAR).unwrap_or_default(),
            },
            created_at,
            updated_at,
        })
    }
}

/// Session manager backed by the shared key-value store
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write a fresh record, discarding whatever session the principal had
    pub async fn create_or_replace(
        &self,
        principal_id: &str,
        session_id: &str,
        attributes: &SessionAttributes,
        ttl: Duration,
    ) -> StoreResult<SessionRecord> {
        let created_at = Utc::now();
        let mut fields = vec![
            (FIELD_SID.to_string(), session_id.to_string()),
            (FIELD_USER_ID.to_string(), principal_id.to_string()),
            (FIELD_CREATED.to_string(), timestamp(created_at)),
        ];
        fields.extend(attributes.fields());

        self.store
            .hash_replace(&session_key(principal_id), &fields, ttl)
            .await?;

        Ok(SessionRecord {
            principal_id: principal_id.to_string(),
            session_id: session_id.to_string(),
            attributes: attributes.clone(),
            created_at,
            updated_at: None,
        })
    }

    /// Get the live record, if any
    pub async fn get(&self, principal_id: &str) -> StoreResult<Option<SessionRecord>> {
        let key = session_key(principal_id);
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        SessionRecord::from_fields(&key, fields).map(Some)
    }

    /// Reset the expiry of a live record
    pub async fn touch(&self, principal_id: &str, ttl: Duration) -> StoreResult<bool> {
        self.store.expire(&session_key(principal_id), ttl).await
    }

    /// Remove the record; earlier tokens stop passing the gate immediately
    pub async fn delete(&self, principal_id: &str) -> StoreResult<bool> {
        self.store.delete(&session_key(principal_id)).await
    }

    /// Swap `expected_sid` for `new_sid`, stamping `updated_at` and resetting the TTL.
    /// Returns `false` when the live id is no longer `expected_sid`.
    pub async fn rotate(
        &self,
        principal_id: &str,
        expected_sid: &str,
        new_sid: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let fields = [
            (FIELD_SID.to_string(), new_sid.to_string()),
            (FIELD_UPDATED.to_string(), timestamp(Utc::now())),
        ];
        self.store
            .hash_compare_and_set(&session_key(principal_id), FIELD_SID, expected_sid, &fields, ttl)
            .await
    }

    /// Refresh cached display attributes, keeping the remaining TTL.
    /// Returns `false` when there is no live record.
    pub async fn update_attributes(
        &self,
        principal_id: &str,
        attributes: &SessionAttributes,
    ) -> StoreResult<bool> {
        let mut fields = attributes.fields().to_vec();
        fields.push((FIELD_UPDATED.to_string(), timestamp(Utc::now())));
        self.store
            .hash_update(&session_key(principal_id), &fields)
            .await
    }
}
