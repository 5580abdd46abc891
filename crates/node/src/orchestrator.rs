//! # Lifecycle Orchestrator
//!
//! Runs once per process start, before the scheduler, and picks how this
//! node joins the ring.
//!
//! ## Startup Sequence
//!
//! ```text
//! 1. out of service? ─────────────────────────────▶ idle, nothing scheduled
//! 2. sidecar_alive, bootstrap NOT_STARTED, storage_alive = probe
//! 3. multi-region: reconcile ACL now
//!      replace / pre-generated token ─▶ sleep 100..200s
//!      else ACL changed              ─▶ sleep 60s
//!      register reconciler (seed: jittered ≤ 240s)
//! 4. rewrite proxy config (failure logged, ignored)
//! 5. restore enabled ─▶ restoring = true, run_now(restore)
//!    warm wanted     ─▶ stop proxy if alive, bootstrapping = true,
//!                       run_now(warm-bootstrap)
//!    otherwise       ─▶ start storage, 2s, start proxy, 1s, run_now(proxy-reset)
//! 6. register recurring jobs
//! 7. start scheduler (queued run_now calls fire here)
//! ```
//!
//! Warm is wanted when `force_warm`, or warm bootstrap is enabled and the
//! node either replaces a token or holds a non-new token with storage down.
//!
//! The busy flags are raised in step 5, before the scheduler starts, so the
//! process monitors' first fires already stand aside for the queued job.
//!
//! Any failure outside step 4 is fatal and returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use rand::Rng;
use ringside_common::backup::{Backup, Restore};
use ringside_common::config::{BackupSchedule, SidecarConfig};
use ringside_common::error::CollaboratorError;
use ringside_common::identity::Identity;
use ringside_common::membership::{Membership, MembershipDirectory};
use ringside_common::process::{ProcessControl, ProcessKind};
use ringside_common::proxy::{ConfigWriter, ConsistencySource, ProxyAdmin};
use ringside_common::storage::StorageProbe;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::backup_job::BackupJob;
use crate::config_refresh::ConfigRefreshJob;
use crate::consistency::ConsistencyWatcher;
use crate::metrics::{MetricsRegistry, ProxyStatsJob, StorageInfoJob};
use crate::node_state::NodeState;
use crate::process_jobs::{
    ProcessAction, ProcessCommandJob, ProcessMonitorJob, ProxyResetJob, SnapshotJob,
    PROXY_RESET_JOB,
};
use crate::restore_job::{self, RestoreJob};
use crate::schedule::Schedule;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::security::SecurityReconciler;
use crate::warm_bootstrap::{self, PeerSync, WarmBootstrapJob};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Settle window for replacement / pre-generated-token nodes, in seconds.
pub const REPLACE_SETTLE_SECS: std::ops::RangeInclusive<u64> = 100..=200;

/// Settle after the first ACL reconcile changed something.
pub const ACL_CHANGE_SETTLE: Duration = Duration::from_secs(60);

/// Upper bound of the initial jitter for seed reconcilers.
pub const SEED_RECONCILE_JITTER: Duration = Duration::from_secs(240);

pub const STORAGE_START_SETTLE: Duration = Duration::from_secs(2);

pub const PROXY_START_SETTLE: Duration = Duration::from_secs(1);

/// Backups fire at minute 1 of the configured hour.
pub const BACKUP_MINUTE: u32 = 1;

pub const WEEKLY_BACKUP_DAY: Weekday = Weekday::Sun;

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("initial ACL reconciliation failed: {0:#}")]
    Reconcile(anyhow::Error),

    #[error("{process} {action} failed during startup: {source}")]
    Process {
        process: ProcessKind,
        action: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Path taken at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootPath {
    OutOfService,
    Restore,
    Warm,
    Cold,
}

/// Everything the sidecar talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn Identity>,
    pub membership: Arc<dyn Membership>,
    pub directory: Arc<dyn MembershipDirectory>,
    pub storage_process: Arc<dyn ProcessControl>,
    pub proxy_process: Arc<dyn ProcessControl>,
    pub storage: Arc<dyn StorageProbe>,
    pub backup: Arc<dyn Backup>,
    pub restore: Arc<dyn Restore>,
    pub proxy_admin: Arc<dyn ProxyAdmin>,
    pub config_writer: Arc<dyn ConfigWriter>,
    pub consistency: Arc<dyn ConsistencySource>,
    pub peer_sync: Arc<dyn PeerSync>,
}

pub struct Orchestrator {
    cfg: SidecarConfig,
    deps: Collaborators,
    state: Arc<NodeState>,
    scheduler: Arc<Scheduler>,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    pub fn new(cfg: SidecarConfig, deps: Collaborators) -> Self {
        Orchestrator {
            cfg,
            deps,
            state: Arc::new(NodeState::new()),
            scheduler: Arc::new(Scheduler::new()),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    /// Run the startup sequence and start the scheduler.
    pub async fn initialize(&self) -> Result<BootPath, OrchestratorError> {
        let identity = &self.deps.identity;
        if identity.is_out_of_service() {
            info!("node is out of service, sidecar stays idle");
            return Ok(BootPath::OutOfService);
        }

        let storage_alive = self.deps.storage_process.is_alive().await;
        self.state.update(|s| {
            s.sidecar_alive = true;
            s.bootstrap_status = None;
            s.storage_alive = storage_alive;
        });
        info!(storage_alive, cluster = %self.cfg.cluster_name, "sidecar initializing");

        self.register_on_demand_jobs()?;

        if self.cfg.cluster.multi_region {
            self.secure_peer_port().await?;
        }

        if let Err(e) = self.deps.config_writer.write_config().await {
            error!(error = %e, "proxy configuration not written, continuing with the file on disk");
        }

        let path = if self.cfg.restore.enabled {
            info!(date = %self.cfg.restore.date, "restore requested");
            self.state.update(|s| s.restoring = true);
            self.scheduler.run_now(restore_job::JOB_NAME)?;
            BootPath::Restore
        } else if self.warm_bootstrap_wanted(storage_alive) {
            self.begin_warm_bootstrap().await?;
            BootPath::Warm
        } else {
            self.cold_start().await?;
            BootPath::Cold
        };

        self.register_recurring_jobs()?;
        self.scheduler.start()?;
        info!(path = ?path, "sidecar initialized");
        Ok(path)
    }

    fn warm_bootstrap_wanted(&self, storage_alive: bool) -> bool {
        let b = &self.cfg.bootstrap;
        let identity = &self.deps.identity;
        b.force_warm
            || (b.warm_enabled && identity.is_replace())
            || (b.warm_enabled && !identity.is_new_token() && !storage_alive)
    }

    async fn secure_peer_port(&self) -> Result<(), OrchestratorError> {
        let reconciler = Arc::new(SecurityReconciler::new(
            self.cfg.cluster_name.clone(),
            self.cfg.cluster.peer_port,
            self.deps.directory.clone(),
            self.deps.membership.clone(),
        ));
        let changed = reconciler.reconcile().await.map_err(OrchestratorError::Reconcile)?;

        let identity = &self.deps.identity;
        if identity.is_replace() || identity.is_token_pregenerated() {
            let secs = rand::thread_rng().gen_range(REPLACE_SETTLE_SECS);
            info!(secs, "replacement or pre-generated token, waiting for peers to admit us");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        } else if changed {
            info!(secs = ACL_CHANGE_SETTLE.as_secs(), "ACL changed, waiting for it to propagate");
            tokio::time::sleep(ACL_CHANGE_SETTLE).await;
        }

        let period = Duration::from_secs(self.cfg.intervals.acl_reconcile_secs);
        let schedule = if identity.is_seed() {
            Schedule::every_with_jitter(period, SEED_RECONCILE_JITTER)
        } else {
            Schedule::every(period)
        };
        self.scheduler.register(reconciler, schedule)?;
        Ok(())
    }

    async fn begin_warm_bootstrap(&self) -> Result<(), OrchestratorError> {
        let proxy = &self.deps.proxy_process;
        if proxy.is_alive().await {
            info!("stopping proxy before warm bootstrap");
            proxy.stop().await.map_err(|source| OrchestratorError::Process {
                process: ProcessKind::Proxy,
                action: "stop",
                source,
            })?;
        }
        self.state.update(|s| {
            s.proxy_alive = false;
            s.bootstrapping = true;
        });
        self.scheduler.run_now(warm_bootstrap::JOB_NAME)?;
        Ok(())
    }

    async fn cold_start(&self) -> Result<(), OrchestratorError> {
        info!("cold start");
        self.start_process(ProcessKind::Storage, &self.deps.storage_process).await?;
        self.state.set_storage_alive(true);
        tokio::time::sleep(STORAGE_START_SETTLE).await;

        self.start_process(ProcessKind::Proxy, &self.deps.proxy_process).await?;
        self.state.set_proxy_alive(true);
        tokio::time::sleep(PROXY_START_SETTLE).await;

        self.scheduler.run_now(PROXY_RESET_JOB)?;
        Ok(())
    }

    async fn start_process(
        &self,
        kind: ProcessKind,
        process: &Arc<dyn ProcessControl>,
    ) -> Result<(), OrchestratorError> {
        process.start().await.map_err(|source| OrchestratorError::Process {
            process: kind,
            action: "start",
            source,
        })
    }

    fn register_on_demand_jobs(&self) -> Result<(), SchedulerError> {
        let d = &self.deps;
        let s = &self.scheduler;
        s.register(
            Arc::new(RestoreJob::new(
                self.state.clone(),
                d.storage_process.clone(),
                d.proxy_process.clone(),
                d.storage.clone(),
                d.restore.clone(),
                self.cfg.restore.date.clone(),
            )),
            Schedule::OnDemand,
        )?;
        s.register(
            Arc::new(WarmBootstrapJob::new(
                self.state.clone(),
                d.storage_process.clone(),
                d.proxy_process.clone(),
                d.peer_sync.clone(),
            )),
            Schedule::OnDemand,
        )?;
        s.register(
            Arc::new(ProxyResetJob::new(d.storage.clone(), d.proxy_admin.clone())),
            Schedule::OnDemand,
        )?;
        s.register(Arc::new(SnapshotJob::new(d.storage.clone())), Schedule::OnDemand)?;

        for (kind, process) in [
            (ProcessKind::Storage, &d.storage_process),
            (ProcessKind::Proxy, &d.proxy_process),
        ] {
            for action in [ProcessAction::Start, ProcessAction::Stop] {
                let job = ProcessCommandJob::new(kind, action, process.clone(), self.state.clone());
                s.register(Arc::new(job), Schedule::OnDemand)?;
            }
        }
        Ok(())
    }

    fn backup_schedule(&self) -> Schedule {
        let b = &self.cfg.backup;
        if !b.enabled || b.hour < 0 {
            return Schedule::OnDemand;
        }
        let hour = b.hour as u32;
        match b.schedule {
            BackupSchedule::Day => Schedule::daily(hour, BACKUP_MINUTE, 0),
            BackupSchedule::Week => Schedule::weekly(WEEKLY_BACKUP_DAY, hour, BACKUP_MINUTE, 0),
        }
    }

    fn register_recurring_jobs(&self) -> Result<(), SchedulerError> {
        let d = &self.deps;
        let s = &self.scheduler;
        let iv = &self.cfg.intervals;

        // Registered on demand when not scheduled, so admins can still run it.
        let backup_schedule = self.backup_schedule();
        if backup_schedule == Schedule::OnDemand && self.cfg.backup.enabled {
            warn!(hour = self.cfg.backup.hour, "negative backup hour, scheduled backups disabled");
        }
        s.register(
            Arc::new(BackupJob::new(
                self.state.clone(),
                d.storage.clone(),
                d.backup.clone(),
                self.cfg.backup.persistence_file.clone(),
            )),
            backup_schedule,
        )?;

        s.register(
            Arc::new(ProxyStatsJob::new(d.proxy_admin.clone(), self.metrics.clone())),
            Schedule::every(Duration::from_secs(iv.proxy_stats_secs)),
        )?;
        s.register(
            Arc::new(StorageInfoJob::new(d.storage.clone(), self.metrics.clone())),
            Schedule::every(Duration::from_secs(iv.storage_info_secs)),
        )?;
        for (kind, process) in [
            (ProcessKind::Storage, &d.storage_process),
            (ProcessKind::Proxy, &d.proxy_process),
        ] {
            s.register(
                Arc::new(ProcessMonitorJob::new(kind, process.clone(), self.state.clone())),
                Schedule::every(Duration::from_secs(iv.process_monitor_secs)),
            )?;
        }
        s.register(
            Arc::new(ConfigRefreshJob::new(d.config_writer.clone())),
            Schedule::every(Duration::from_secs(iv.config_refresh_secs)),
        )?;
        s.register(
            Arc::new(ConsistencyWatcher::new(d.consistency.clone(), d.proxy_admin.clone())),
            Schedule::every(Duration::from_secs(iv.consistency_watch_secs)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringside_common::config::IdentityConfig;
    use ringside_common::identity::StaticIdentity;
    use ringside_common::mock::*;

    struct NeverSync;

    #[async_trait::async_trait]
    impl PeerSync for NeverSync {
        async fn resync(&self) -> Result<crate::node_state::BootstrapOutcome, CollaboratorError> {
            Ok(crate::node_state::BootstrapOutcome::CannotConnectFail)
        }
    }

    fn orchestrator(cfg: SidecarConfig) -> Orchestrator {
        let deps = Collaborators {
            identity: Arc::new(StaticIdentity::new(IdentityConfig::default())),
            membership: Arc::new(MockMembership::new()),
            directory: Arc::new(MockDirectory::new(["10.0.0.1"])),
            storage_process: Arc::new(MockProcess::new(ProcessKind::Storage)),
            proxy_process: Arc::new(MockProcess::new(ProcessKind::Proxy)),
            storage: Arc::new(MockStorage::new()),
            backup: Arc::new(MockBackup::new()),
            restore: Arc::new(MockRestore::new()),
            proxy_admin: Arc::new(MockProxyAdmin::new()),
            config_writer: Arc::new(MockConfigWriter::new()),
            consistency: Arc::new(MockConsistencySource::new("DC_ONE", "DC_ONE")),
            peer_sync: Arc::new(NeverSync),
        };
        Orchestrator::new(cfg, deps)
    }

    #[test]
    fn test_backup_schedule_daily_at_hour_minute_one() {
        let mut cfg = SidecarConfig::default();
        cfg.backup.enabled = true;
        cfg.backup.hour = 12;
        assert_eq!(orchestrator(cfg.clone()).backup_schedule(), Schedule::daily(12, 1, 0));

        cfg.backup.schedule = BackupSchedule::Week;
        assert_eq!(
            orchestrator(cfg.clone()).backup_schedule(),
            Schedule::weekly(Weekday::Sun, 12, 1, 0)
        );

        cfg.backup.hour = -1;
        assert_eq!(orchestrator(cfg.clone()).backup_schedule(), Schedule::OnDemand);

        cfg.backup.hour = 12;
        cfg.backup.enabled = false;
        assert_eq!(orchestrator(cfg).backup_schedule(), Schedule::OnDemand);
    }

    #[test]
    fn test_warm_decision_table() {
        let mut cfg = SidecarConfig::default();
        assert!(!orchestrator(cfg.clone()).warm_bootstrap_wanted(false));

        cfg.bootstrap.force_warm = true;
        assert!(orchestrator(cfg.clone()).warm_bootstrap_wanted(true));

        cfg.bootstrap.force_warm = false;
        cfg.bootstrap.warm_enabled = true;
        // Default identity: not replace, not new token.
        assert!(orchestrator(cfg.clone()).warm_bootstrap_wanted(false));
        assert!(!orchestrator(cfg).warm_bootstrap_wanted(true));
    }
}
