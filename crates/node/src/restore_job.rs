//! Restore the node's data set from a dated backup.
//!
//! Restore owns the processes while it runs: proxy and storage are stopped,
//! the backup is loaded, and only a successful load brings them back up.
//! A failed load leaves the node stopped for an operator to inspect.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use ringside_common::backup::Restore;
use ringside_common::process::ProcessControl;
use ringside_common::storage::StorageProbe;
use tracing::{error, info};

use crate::job::Job;
use crate::node_state::NodeState;

pub const JOB_NAME: &str = "restore";

/// Pause between storage start and proxy start after a restore.
pub const RESTORE_SETTLE_DELAY: Duration = Duration::from_secs(5);

pub struct RestoreJob {
    state: Arc<NodeState>,
    storage_process: Arc<dyn ProcessControl>,
    proxy_process: Arc<dyn ProcessControl>,
    storage: Arc<dyn StorageProbe>,
    restore: Arc<dyn Restore>,
    date: String,
}

impl RestoreJob {
    pub fn new(
        state: Arc<NodeState>,
        storage_process: Arc<dyn ProcessControl>,
        proxy_process: Arc<dyn ProcessControl>,
        storage: Arc<dyn StorageProbe>,
        restore: Arc<dyn Restore>,
        date: impl Into<String>,
    ) -> Self {
        RestoreJob {
            state,
            storage_process,
            proxy_process,
            storage,
            restore,
            date: date.into(),
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.proxy_process.stop().await.context("stopping proxy")?;
        self.state.set_proxy_alive(false);
        self.storage_process.stop().await.context("stopping storage")?;
        self.state.set_storage_alive(false);

        let restored = self
            .restore
            .restore_data(&self.date)
            .await
            .with_context(|| format!("restoring backup of {}", self.date))?;
        if !restored {
            bail!("restore of {} failed, processes left stopped", self.date);
        }

        self.storage_process.start().await.context("starting storage")?;
        self.state.set_storage_alive(true);
        match self.storage.loading_data().await {
            Ok(false) => {}
            Ok(true) => error!("storage still loading restored data, continuing"),
            Err(e) => error!(error = %e, "could not check storage loading state, continuing"),
        }

        tokio::time::sleep(RESTORE_SETTLE_DELAY).await;
        self.proxy_process.start().await.context("starting proxy")?;
        self.state.update(|s| {
            s.proxy_alive = true;
            s.restore_status = true;
        });
        info!(date = %self.date, "restore completed");
        Ok(())
    }
}

#[async_trait]
impl Job for RestoreJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.state.update(|s| {
            s.restoring = true;
            s.first_restore = false;
            s.restore_status = false;
        });
        info!(date = %self.date, "restore starting");

        let result = self.run().await;

        self.state.update(|s| {
            s.restoring = false;
            s.restore_time = Some(Utc::now());
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringside_common::mock::{CallLog, MockProcess, MockRestore, MockStorage};
    use ringside_common::process::ProcessKind;

    struct Fixture {
        state: Arc<NodeState>,
        log: CallLog,
        storage_proc: Arc<MockProcess>,
        proxy_proc: Arc<MockProcess>,
        storage: Arc<MockStorage>,
        restore: Arc<MockRestore>,
        job: RestoreJob,
    }

    fn fixture(date: &str) -> Fixture {
        let log = CallLog::new();
        let state = Arc::new(NodeState::new());
        let storage_proc = Arc::new(MockProcess::new(ProcessKind::Storage).with_log(&log));
        let proxy_proc = Arc::new(MockProcess::new(ProcessKind::Proxy).with_log(&log));
        let storage = Arc::new(MockStorage::new().with_log(&log));
        let restore = Arc::new(MockRestore::new().with_log(&log));
        let job = RestoreJob::new(
            state.clone(),
            storage_proc.clone(),
            proxy_proc.clone(),
            storage.clone(),
            restore.clone(),
            date,
        );
        Fixture {
            state,
            log,
            storage_proc,
            proxy_proc,
            storage,
            restore,
            job,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_restore_order() {
        let f = fixture("20101010");
        let started = tokio::time::Instant::now();
        f.job.execute().await.unwrap();
        assert!(started.elapsed() >= RESTORE_SETTLE_DELAY);

        assert_eq!(
            f.log.entries(),
            vec![
                "proxy.stop",
                "storage.stop",
                "restore.restore_data",
                "storage.start",
                "storage.loading_data",
                "proxy.start",
            ]
        );
        assert_eq!(f.restore.dates(), vec!["20101010".to_string()]);
        let s = f.state.snapshot();
        assert!(s.restore_status && !s.restoring && !s.first_restore);
        assert!(s.restore_time.is_some());
        assert_eq!(s.restore_report().status, "completed");
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_processes_stopped() {
        let f = fixture("notadate");
        f.restore.set_result(false);

        assert!(f.job.execute().await.is_err());

        assert_eq!(f.storage_proc.starts(), 0);
        assert_eq!(f.proxy_proc.starts(), 0);
        assert_eq!(f.storage_proc.stops(), 1);
        let s = f.state.snapshot();
        assert!(!s.restore_status && !s.restoring && !s.first_restore);
        assert!(s.restore_time.is_some());
        assert_eq!(s.restore_report().status, "unsuccessful");
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_loading_does_not_roll_back() {
        let f = fixture("20101010");
        f.storage.set_loading(true);

        f.job.execute().await.unwrap();
        assert_eq!(f.proxy_proc.starts(), 1);
        assert!(f.state.snapshot().restore_status);
    }

    #[tokio::test]
    async fn test_restoring_flag_reset_on_start_failure() {
        let f = fixture("20101010");
        f.storage_proc.set_fail_start(true);

        assert!(f.job.execute().await.is_err());
        let s = f.state.snapshot();
        assert!(!s.restoring, "restoring must be reset on failure");
        assert!(!s.restore_status);
    }
}
