use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use time::{macros::format_description, OffsetDateTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::types::{CameraKind, CameraRecord, WorkItem};

/// Deduplicating, live-saving result log.
///
/// Every address is written at most once per sink. Blocks are appended through
/// one shared handle under an async lock and synced to disk before `record`
/// returns, so an interrupted run keeps everything found so far.
#[derive(Debug)]
pub struct ResultSink {
    path: PathBuf,
    detected: Mutex<HashSet<Ipv4Addr>>,
    file: tokio::sync::Mutex<File>,
}

impl ResultSink {
    /// Open (or create) the result log in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open result log: {}", path.display()))?;
        Ok(Self {
            path,
            detected: Mutex::new(HashSet::new()),
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct addresses recorded so far.
    pub fn found(&self) -> usize {
        self.detected.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Mark `ip` as detected. Returns false if it already was.
    pub fn claim(&self, ip: Ipv4Addr) -> bool {
        self.detected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip)
    }

    /// Record a camera. Returns true if this was the first hit for the address.
    ///
    /// Write failures are logged and swallowed; the address stays claimed.
    pub async fn record(&self, item: WorkItem, kind: CameraKind) -> bool {
        if !self.claim(item.ip) {
            return false;
        }
        let rec = CameraRecord::new(item, kind, detection_timestamp());
        if let Err(e) = self.append(&rec).await {
            log::warn!("failed to save {} to {}: {e:#}", rec.url, self.path.display());
        }
        true
    }

    async fn append(&self, rec: &CameraRecord) -> Result<()> {
        let block = rec.to_block();
        let mut file = self.file.lock().await;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

fn detection_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| String::from("1970-01-01 00:00:00"))
}
