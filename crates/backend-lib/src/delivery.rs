// ============================
// gatekeeper-backend-lib/src/delivery.rs
// ============================
//! Flat-file outbox for one-time codes and verification links.
//!
//! Each delivery request is appended to a JSON-lines file that a separate mail
//! worker drains. Rendering and sending are not this service's concern.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::{fs as tokio_fs, io::AsyncWriteExt};

use crate::auth::otp::DeliveryPurpose;
use crate::auth::{CodeDelivery, CodeDeliveryRequest};

/// Line written to the outbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntry {
    pub template: String,
    pub to: String,
    pub name: String,
    pub code: String,
    pub expires_in_secs: u64,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub link: Option<String>,
}

impl From<CodeDeliveryRequest> for OutboxEntry {
    fn from(request: CodeDeliveryRequest) -> Self {
        let link = match &request.purpose {
            DeliveryPurpose::EmailVerification { link } => Some(link.clone()),
            DeliveryPurpose::LoginCode => None,
        };
        Self {
            template: request.purpose.template().to_string(),
            to: request.email,
            name: request.name,
            code: request.code,
            expires_in_secs: request.expires_in.as_secs(),
            requested_at: request.requested_at,
            ip: request.client_address.map(|ip| ip.to_string()),
            user_agent: request.user_agent,
            link,
        }
    }
}

/// Appends delivery requests to a JSON-lines file
#[derive(Debug)]
pub struct OutboxDelivery {
    path: PathBuf,
    // serialises appends so lines from concurrent logins never interleave
    lock: Mutex<()>,
}

impl OutboxDelivery {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Read every entry currently in the outbox
    pub async fn read_entries(&self) -> anyhow::Result<Vec<OutboxEntry>> {
        if !tokio_fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let content = tokio_fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }
}

#[async_trait]
impl CodeDelivery for OutboxDelivery {
    async fn deliver(&self, request: CodeDeliveryRequest) -> anyhow::Result<()> {
        let json_line = serde_json::to_string(&OutboxEntry::from(request))?;

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio_fs::create_dir_all(parent).await?;
        }
        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(json_line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
