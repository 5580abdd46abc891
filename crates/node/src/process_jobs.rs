//! Jobs that supervise or command the storage and proxy processes.
//!
//! - [`ProxyResetJob`]: one-shot after a cold start; waits for storage to
//!   finish loading, then switches the proxy to `normal`.
//! - [`ProcessMonitorJob`]: recurring liveness check with restart.
//! - [`ProcessCommandJob`]: admin start / stop. A stop suspends monitoring
//!   so the monitor does not immediately undo it; a start resumes it.
//! - [`SnapshotJob`]: on-demand persistence without upload.
//!
//! Monitor and command jobs are single-flight like every job, so a monitor
//! restart never races a concurrent monitor restart of the same process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use ringside_common::process::{ProcessControl, ProcessKind};
use ringside_common::proxy::{ProxyAdmin, ProxyState};
use ringside_common::storage::StorageProbe;
use tracing::{debug, info, warn};

use crate::job::Job;
use crate::node_state::NodeState;

pub const PROXY_RESET_JOB: &str = "proxy-reset";

pub const SNAPSHOT_JOB: &str = "snapshot";

pub const PROXY_RESET_RETRIES: u32 = 30;

pub const PROXY_RESET_RETRY_DELAY: Duration = Duration::from_secs(2);

pub fn monitor_job_name(kind: ProcessKind) -> String {
    format!("{}-monitor", kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    Start,
    Stop,
}

impl ProcessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessAction::Start => "start",
            ProcessAction::Stop => "stop",
        }
    }
}

pub fn command_job_name(kind: ProcessKind, action: ProcessAction) -> String {
    format!("{}-{}", kind, action.as_str())
}

fn record_alive(state: &NodeState, kind: ProcessKind, alive: bool) {
    match kind {
        ProcessKind::Storage => state.set_storage_alive(alive),
        ProcessKind::Proxy => state.set_proxy_alive(alive),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROXY RESET
// ════════════════════════════════════════════════════════════════════════════

pub struct ProxyResetJob {
    storage: Arc<dyn StorageProbe>,
    proxy_admin: Arc<dyn ProxyAdmin>,
}

impl ProxyResetJob {
    pub fn new(storage: Arc<dyn StorageProbe>, proxy_admin: Arc<dyn ProxyAdmin>) -> Self {
        ProxyResetJob { storage, proxy_admin }
    }
}

#[async_trait]
impl Job for ProxyResetJob {
    fn name(&self) -> &str {
        PROXY_RESET_JOB
    }

    async fn execute(&self) -> anyhow::Result<()> {
        for attempt in 1..=PROXY_RESET_RETRIES {
            match self.storage.loading_data().await {
                Ok(false) => {
                    self.proxy_admin
                        .set_state(ProxyState::Normal)
                        .await
                        .context("switching proxy to normal")?;
                    info!(attempt, "storage ready, proxy set to normal");
                    return Ok(());
                }
                Ok(true) => debug!(attempt, "storage still loading"),
                Err(e) => warn!(attempt, error = %e, "storage not answering"),
            }
            tokio::time::sleep(PROXY_RESET_RETRY_DELAY).await;
        }
        bail!("storage not ready after {} checks, proxy left as is", PROXY_RESET_RETRIES)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROCESS MONITOR
// ════════════════════════════════════════════════════════════════════════════

pub struct ProcessMonitorJob {
    name: String,
    kind: ProcessKind,
    process: Arc<dyn ProcessControl>,
    state: Arc<NodeState>,
}

impl ProcessMonitorJob {
    pub fn new(kind: ProcessKind, process: Arc<dyn ProcessControl>, state: Arc<NodeState>) -> Self {
        ProcessMonitorJob {
            name: monitor_job_name(kind),
            kind,
            process,
            state,
        }
    }
}

#[async_trait]
impl Job for ProcessMonitorJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let alive = self.process.is_alive().await;
        record_alive(&self.state, self.kind, alive);
        if alive {
            return Ok(());
        }
        if self.state.monitoring_suspended() {
            debug!(process = %self.kind, "down, monitoring suspended");
            return Ok(());
        }
        if self.state.is_data_busy() {
            debug!(process = %self.kind, "down during restore or bootstrap, leaving it");
            return Ok(());
        }
        if self.kind == ProcessKind::Proxy && self.state.warm_bootstrap_failed() {
            debug!("proxy held down after failed warm bootstrap");
            return Ok(());
        }

        warn!(process = %self.kind, "process down, restarting");
        self.process
            .start()
            .await
            .with_context(|| format!("restarting {}", self.kind))?;
        record_alive(&self.state, self.kind, true);
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROCESS COMMAND
// ════════════════════════════════════════════════════════════════════════════

pub struct ProcessCommandJob {
    name: String,
    kind: ProcessKind,
    action: ProcessAction,
    process: Arc<dyn ProcessControl>,
    state: Arc<NodeState>,
}

impl ProcessCommandJob {
    pub fn new(
        kind: ProcessKind,
        action: ProcessAction,
        process: Arc<dyn ProcessControl>,
        state: Arc<NodeState>,
    ) -> Self {
        ProcessCommandJob {
            name: command_job_name(kind, action),
            kind,
            action,
            process,
            state,
        }
    }
}

#[async_trait]
impl Job for ProcessCommandJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> anyhow::Result<()> {
        info!(process = %self.kind, action = self.action.as_str(), "admin process command");
        match self.action {
            ProcessAction::Stop => {
                self.state.set_monitoring_suspended(true);
                self.process
                    .stop()
                    .await
                    .with_context(|| format!("stopping {}", self.kind))?;
                record_alive(&self.state, self.kind, false);
            }
            ProcessAction::Start => {
                self.process
                    .start()
                    .await
                    .with_context(|| format!("starting {}", self.kind))?;
                record_alive(&self.state, self.kind, true);
                self.state.set_monitoring_suspended(false);
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════

pub struct SnapshotJob {
    storage: Arc<dyn StorageProbe>,
}

impl SnapshotJob {
    pub fn new(storage: Arc<dyn StorageProbe>) -> Self {
        SnapshotJob { storage }
    }
}

#[async_trait]
impl Job for SnapshotJob {
    fn name(&self) -> &str {
        SNAPSHOT_JOB
    }

    async fn execute(&self) -> anyhow::Result<()> {
        if !self.storage.take_snapshot().await.context("requesting snapshot")? {
            bail!("storage engine reported snapshot failure");
        }
        info!("on-demand snapshot completed");
        Ok(())
    }
}
