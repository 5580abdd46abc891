//! Scheduled snapshot-and-upload of the storage engine's persistence file.
//!
//! ## Flow
//!
//! ```text
//! first_backup = false
//! restoring || bootstrapping ──▶ skip (not an error)
//! retry ≤ BACKUP_RETRIES: storage_alive? ── no ──▶ sleep BACKUP_RETRY_DELAY
//!                                       └── yes ─▶ backing_up = true
//!                                                  backup_status = false
//!                                                  take_snapshot + non-empty file
//!                                                  backup_time = start of day
//!                                                  upload ─▶ backup_status
//! backing_up = false
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ringside_common::backup::Backup;
use ringside_common::storage::StorageProbe;
use tracing::{info, warn};

use crate::job::Job;
use crate::node_state::NodeState;

pub const JOB_NAME: &str = "backup";

pub const BACKUP_RETRIES: u32 = 5;

pub const BACKUP_RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct BackupJob {
    state: Arc<NodeState>,
    storage: Arc<dyn StorageProbe>,
    backup: Arc<dyn Backup>,
    persistence_file: PathBuf,
}

impl BackupJob {
    pub fn new(
        state: Arc<NodeState>,
        storage: Arc<dyn StorageProbe>,
        backup: Arc<dyn Backup>,
        persistence_file: impl Into<PathBuf>,
    ) -> Self {
        BackupJob {
            state,
            storage,
            backup,
            persistence_file: persistence_file.into(),
        }
    }

    async fn wait_for_storage(&self) -> bool {
        for attempt in 1..=BACKUP_RETRIES {
            if self.state.storage_alive() {
                return true;
            }
            warn!(attempt, "storage not alive, backup waiting");
            tokio::time::sleep(BACKUP_RETRY_DELAY).await;
        }
        false
    }

    async fn snapshot_and_upload(&self) -> anyhow::Result<()> {
        let snapshot_ok = self.storage.take_snapshot().await.context("requesting snapshot")?;
        let file_len = tokio::fs::metadata(&self.persistence_file)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if !snapshot_ok || file_len == 0 {
            bail!(
                "snapshot unusable (reported ok: {}, {} bytes at {})",
                snapshot_ok,
                file_len,
                self.persistence_file.display()
            );
        }

        // Stamped for a usable snapshot, whatever the upload does.
        let day = start_of_day(Utc::now());
        self.state.update(|s| s.backup_time = Some(day));

        let uploaded = self
            .backup
            .upload(&self.persistence_file, day)
            .await
            .context("uploading persistence file")?;
        self.state.update(|s| s.backup_status = uploaded);
        if uploaded {
            info!(bytes = file_len, "backup completed");
        } else {
            warn!("backup destination did not accept the upload");
        }
        Ok(())
    }
}

#[async_trait]
impl Job for BackupJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.state.update(|s| s.first_backup = false);

        if self.state.is_data_busy() {
            info!("restore or bootstrap in progress, skipping backup");
            return Ok(());
        }

        if !self.wait_for_storage().await {
            bail!("storage not alive after {} attempts, backup abandoned", BACKUP_RETRIES);
        }

        self.state.update(|s| {
            s.backing_up = true;
            s.backup_status = false;
        });
        let result = self.snapshot_and_upload().await;
        self.state.update(|s| s.backing_up = false);
        result
    }
}

/// Midnight UTC of `ts`'s day.
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = ts.date_naive().and_time(chrono::NaiveTime::MIN);
    Utc.from_utc_datetime(&midnight)
}
