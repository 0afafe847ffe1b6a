// ============================
// gatekeeper-backend-lib/src/auth/directory.rs
// ============================
//! Principal directory: the source of account records and stored password hashes.
use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::fs as tokio_fs;

/// Account record as supplied by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
    /// PHC-formatted password hash
    pub password_hash: String,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for principal lookups
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Find a principal by login identifier (email, case-insensitive)
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<PrincipalRecord>, DirectoryError>;

    /// Find a principal by its stable id
    async fn find_by_id(&self, principal_id: &str) -> Result<Option<PrincipalRecord>, DirectoryError>;

    /// Record that the principal proved control of its email address.
    /// Returns `false` when no such principal exists.
    async fn mark_verified(&self, principal_id: &str) -> Result<bool, DirectoryError>;
}

/// In-memory directory, optionally loaded from a JSON file.
/// Verifications made at runtime are not written back to the file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    by_email: HashMap<String, PrincipalRecord>,
    email_by_id: HashMap<String, String>,
    verified: DashSet<String>,
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

impl StaticDirectory {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PrincipalRecord>,
    {
        let mut directory = Self::default();
        for record in records {
            let email = normalize(&record.email);
            if record.email_verified {
                directory.verified.insert(record.id.clone());
            }
            directory.email_by_id.insert(record.id.clone(), email.clone());
            directory.by_email.insert(email, record);
        }
        directory
    }

    fn snapshot(&self, record: &PrincipalRecord) -> PrincipalRecord {
        PrincipalRecord {
            email_verified: self.verified.contains(&record.id),
            ..record.clone()
        }
    }

    /// Load a JSON array of [`PrincipalRecord`]s
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, DirectoryError> {
        let content = tokio_fs::read_to_string(path.as_ref()).await?;
        let records: Vec<PrincipalRecord> = serde_json::from_str(&content)?;
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

#[async_trait]
impl PrincipalDirectory for StaticDirectory {
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<PrincipalRecord>, DirectoryError> {
        Ok(self
            .by_email
            .get(&normalize(identifier))
            .map(|record| self.snapshot(record)))
    }

    async fn find_by_id(&self, principal_id: &str) -> Result<Option<PrincipalRecord>, DirectoryError> {
        Ok(self
            .email_by_id
            .get(principal_id)
            .and_then(|email| self.by_email.get(email))
            .map(|record| self.snapshot(record)))
    }

    async fn mark_verified(&self, principal_id: &str) -> Result<bool, DirectoryError> {
        if !self.email_by_id.contains_key(principal_id) {
            return Ok(false);
        }
        self.verified.insert(principal_id.to_string());
        Ok(true)
    }
}
