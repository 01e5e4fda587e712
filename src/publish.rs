//! Outbound stream for reconciled records.
//!
//! After a successful reconcile the resulting record may be handed to a
//! [`Publisher`]. Publication is best-effort: a failure is reported to the
//! caller but the persisted merge stays in place.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use docmerge_core::models::CanonicalRecord;

use crate::config::Config;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, record: &CanonicalRecord) -> Result<()>;
}

/// Drops every record. Used when no outbound stream is configured.
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _record: &CanonicalRecord) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlPublisher {
    file: Mutex<File>,
}

impl JsonlPublisher {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open publish file: {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Publisher for JsonlPublisher {
    async fn publish(&self, record: &CanonicalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        // One write per record under the lock keeps lines from interleaving.
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Forwards records to an in-process channel.
pub struct ChannelPublisher {
    tx: mpsc::Sender<CanonicalRecord>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<CanonicalRecord>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, record: &CanonicalRecord) -> Result<()> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| anyhow::anyhow!("publish channel closed"))
    }
}

/// Build the publisher described by `[publish]`.
pub async fn from_config(config: &Config) -> Result<Box<dyn Publisher>> {
    match &config.publish.path {
        Some(path) => Ok(Box::new(JsonlPublisher::open(path).await?)),
        None => Ok(Box::new(NoopPublisher)),
    }
}
