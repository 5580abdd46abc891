//! Warm bootstrap: resynchronise local storage from a peer before serving.
//!
//! The job brings the storage engine up if it is down, waits for it to
//! settle, and leaves the proxy stopped until the resync reports in sync.
//! The resync itself sits behind [`PeerSync`]. [`ReplicaPeerSync`] is the built-in implementation:
//! it replicates from the first reachable peer holding the same token range
//! and detaches once the replica reports the link up and no sync running.
//!
//! ## Outcome Mapping
//!
//! | Condition                                         | Outcome                      |
//! |---------------------------------------------------|------------------------------|
//! | no peer accepted `REPLICAOF`                      | `CANNOT_CONNECT_FAIL`        |
//! | replication state unreadable or detach refused    | `WARMUP_ERROR_FAIL`          |
//! | still syncing after `max_polls` checks            | `RETRIES_FAIL`               |
//! | `max_time` elapsed first                          | `EXPIRED_BOOTSTRAPTIME_FAIL` |
//! | link up, no sync in progress                      | `IN_SYNC_SUCCESS`            |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use ringside_common::config::BootstrapConfig;
use ringside_common::error::CollaboratorError;
use ringside_common::process::ProcessControl;
use ringside_common::storage::RespStorageProbe;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::job::Job;
use crate::node_state::{BootstrapOutcome, NodeState};

pub const JOB_NAME: &str = "warm-bootstrap";

/// Pause after starting storage before asking peers to resync it.
pub const STORAGE_SETTLE_DELAY: Duration = Duration::from_secs(10);

#[async_trait]
pub trait PeerSync: Send + Sync {
    /// Bring local storage in sync with peers. Transport errors that end
    /// the attempt are folded into the outcome; `Err` is for failures that
    /// leave the attempt undecided.
    async fn resync(&self) -> Result<BootstrapOutcome, CollaboratorError>;
}

pub struct WarmBootstrapJob {
    state: Arc<NodeState>,
    storage_process: Arc<dyn ProcessControl>,
    proxy_process: Arc<dyn ProcessControl>,
    sync: Arc<dyn PeerSync>,
}

impl WarmBootstrapJob {
    pub fn new(
        state: Arc<NodeState>,
        storage_process: Arc<dyn ProcessControl>,
        proxy_process: Arc<dyn ProcessControl>,
        sync: Arc<dyn PeerSync>,
    ) -> Self {
        WarmBootstrapJob {
            state,
            storage_process,
            proxy_process,
            sync,
        }
    }

    async fn ensure_storage(&self) -> Result<(), CollaboratorError> {
        if self.storage_process.is_alive().await {
            self.state.set_storage_alive(true);
            return Ok(());
        }
        info!("starting storage for warm bootstrap");
        self.storage_process.start().await?;
        self.state.set_storage_alive(true);
        tokio::time::sleep(STORAGE_SETTLE_DELAY).await;
        Ok(())
    }

    async fn resync(&self) -> Result<BootstrapOutcome, CollaboratorError> {
        self.ensure_storage().await?;
        self.sync.resync().await
    }
}

#[async_trait]
impl Job for WarmBootstrapJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.state.update(|s| {
            s.bootstrapping = true;
            s.bootstrap_status = None;
        });
        info!("warm bootstrap starting");

        let result = self.resync().await;
        let outcome = match &result {
            Ok(o) => *o,
            Err(_) => BootstrapOutcome::WarmupErrorFail,
        };
        self.state.update(|s| {
            s.bootstrap_status = Some(outcome);
            s.bootstrap_time = Some(Utc::now());
            s.bootstrapping = false;
        });
        result.context("warm bootstrap resync")?;

        if outcome.is_success() {
            self.proxy_process.start().await.context("starting proxy after warm bootstrap")?;
            self.state.set_proxy_alive(true);
            info!("warm bootstrap in sync, proxy started");
        } else {
            warn!(
                outcome = outcome.status_text(),
                "warm bootstrap did not complete, proxy left stopped"
            );
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REPLICA PEER SYNC
// ════════════════════════════════════════════════════════════════════════════

/// [`PeerSync`] driving the local engine's replication.
pub struct ReplicaPeerSync {
    local: Arc<RespStorageProbe>,
    peers: Vec<(String, u16)>,
    poll_interval: Duration,
    max_polls: u32,
    max_time: Duration,
}

impl ReplicaPeerSync {
    pub fn new(local: Arc<RespStorageProbe>, cfg: &BootstrapConfig) -> Self {
        let peers = cfg.peers.iter().filter_map(|p| parse_peer(p)).collect();
        ReplicaPeerSync {
            local,
            peers,
            poll_interval: Duration::from_secs(cfg.sync_poll_secs),
            max_polls: cfg.sync_max_polls,
            max_time: Duration::from_secs(cfg.max_bootstrap_secs),
        }
    }

    async fn attach(&self) -> Option<(String, u16)> {
        for (host, port) in &self.peers {
            match self.local.replicate_from(host, *port).await {
                Ok(()) => {
                    info!(peer = %host, port, "replicating from peer");
                    return Some((host.clone(), *port));
                }
                Err(e) => warn!(peer = %host, port, error = %e, "peer refused replication"),
            }
        }
        None
    }

    async fn wait_in_sync(&self, started: Instant) -> BootstrapOutcome {
        for poll in 1..=self.max_polls {
            if started.elapsed() >= self.max_time {
                return BootstrapOutcome::ExpiredBootstraptimeFail;
            }
            tokio::time::sleep(self.poll_interval).await;
            let info = match self.local.replication_info().await {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "replication state unreadable");
                    return BootstrapOutcome::WarmupErrorFail;
                }
            };
            let link_up = info.get("master_link_status").map(|v| v == "up").unwrap_or(false);
            let syncing = info.get("master_sync_in_progress").map(|v| v == "1").unwrap_or(true);
            debug!(poll, link_up, syncing, "replication progress");
            if link_up && !syncing {
                return BootstrapOutcome::InSyncSuccess;
            }
        }
        BootstrapOutcome::RetriesFail
    }
}

#[async_trait]
impl PeerSync for ReplicaPeerSync {
    async fn resync(&self) -> Result<BootstrapOutcome, CollaboratorError> {
        let started = Instant::now();
        let Some((peer, _)) = self.attach().await else {
            return Ok(BootstrapOutcome::CannotConnectFail);
        };

        let outcome = self.wait_in_sync(started).await;
        // Always detach so the node never keeps following a peer.
        if let Err(e) = self.local.stop_replication().await {
            warn!(peer = %peer, error = %e, "could not detach from peer");
            if outcome.is_success() {
                return Ok(BootstrapOutcome::WarmupErrorFail);
            }
        }
        Ok(outcome)
    }
}

/// `host:port` → parts; anything else is ignored with a warning.
fn parse_peer(s: &str) -> Option<(String, u16)> {
    let parsed = s
        .rsplit_once(':')
        .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h.to_string(), p)))
        .filter(|(h, _)| !h.is_empty());
    if parsed.is_none() {
        warn!(peer = s, "ignoring malformed peer address");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use ringside_common::mock::MockProcess;
    use ringside_common::process::ProcessKind;
    use ringside_common::storage::SnapshotMode;

    /// Returns a fixed result and records whether storage was up on entry.
    struct FixedSync {
        result: Result<BootstrapOutcome, ()>,
        storage: Arc<MockProcess>,
        storage_seen: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl PeerSync for FixedSync {
        async fn resync(&self) -> Result<BootstrapOutcome, CollaboratorError> {
            let alive = self.storage.is_alive().await;
            self.storage_seen.lock().push(alive);
            self.result
                .map_err(|_| CollaboratorError::Protocol("replica went away".to_string()))
        }
    }

    struct Fixture {
        state: Arc<NodeState>,
        storage: Arc<MockProcess>,
        proxy: Arc<MockProcess>,
        sync: Arc<FixedSync>,
        job: WarmBootstrapJob,
    }

    fn fixture(result: Result<BootstrapOutcome, ()>) -> Fixture {
        let state = Arc::new(NodeState::new());
        let storage = Arc::new(MockProcess::new(ProcessKind::Storage));
        let proxy = Arc::new(MockProcess::new(ProcessKind::Proxy));
        let sync = Arc::new(FixedSync {
            result,
            storage: storage.clone(),
            storage_seen: Mutex::new(Vec::new()),
        });
        let job =
            WarmBootstrapJob::new(state.clone(), storage.clone(), proxy.clone(), sync.clone());
        Fixture {
            state,
            storage,
            proxy,
            sync,
            job,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_sync_starts_proxy() {
        let f = fixture(Ok(BootstrapOutcome::InSyncSuccess));
        f.job.execute().await.unwrap();
        assert_eq!(f.proxy.starts(), 1);
        let s = f.state.snapshot();
        assert!(!s.bootstrapping && s.proxy_alive);
        assert_eq!(s.warmup_report().status, "completed");
        assert!(s.bootstrap_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_storage_started_and_settled_before_resync() {
        let f = fixture(Ok(BootstrapOutcome::InSyncSuccess));

        let started = Instant::now();
        f.job.execute().await.unwrap();

        assert_eq!(f.storage.starts(), 1);
        assert_eq!(*f.sync.storage_seen.lock(), vec![true]);
        assert!(started.elapsed() >= STORAGE_SETTLE_DELAY);
        assert!(f.state.storage_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_storage_not_restarted() {
        let f = fixture(Ok(BootstrapOutcome::InSyncSuccess));
        f.storage.set_alive(true);

        let started = Instant::now();
        f.job.execute().await.unwrap();

        assert_eq!(f.storage.starts(), 0);
        assert!(started.elapsed() < STORAGE_SETTLE_DELAY);
        assert_eq!(*f.sync.storage_seen.lock(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_start_failure_skips_resync() {
        let f = fixture(Ok(BootstrapOutcome::InSyncSuccess));
        f.storage.set_fail_start(true);

        assert!(f.job.execute().await.is_err());
        assert!(f.sync.storage_seen.lock().is_empty());
        assert_eq!(f.proxy.starts(), 0);
        let s = f.state.snapshot();
        assert_eq!(s.bootstrap_status, Some(BootstrapOutcome::WarmupErrorFail));
        assert!(!s.bootstrapping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_outcome_recorded_proxy_stays_down() {
        let f = fixture(Ok(BootstrapOutcome::RetriesFail));
        f.job.execute().await.unwrap();
        assert_eq!(f.proxy.starts(), 0);
        assert_eq!(f.state.snapshot().warmup_report().status, "failed: retries exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_error_is_job_error() {
        let f = fixture(Err(()));
        assert!(f.job.execute().await.is_err());
        let s = f.state.snapshot();
        assert_eq!(s.bootstrap_status, Some(BootstrapOutcome::WarmupErrorFail));
        assert!(!s.bootstrapping);
    }

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("10.0.0.5:22122"), Some(("10.0.0.5".to_string(), 22122)));
        assert_eq!(parse_peer("10.0.0.5"), None);
        assert_eq!(parse_peer(":22122"), None);
    }

    #[tokio::test]
    async fn test_no_reachable_peer_cannot_connect() {
        // Nothing listens on the local probe's port, so every attach fails.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = BootstrapConfig {
            peers: vec!["10.0.0.5:22122".to_string()],
            ..BootstrapConfig::default()
        };
        let probe = Arc::new(RespStorageProbe::new(port, SnapshotMode::Rdb));
        let sync = ReplicaPeerSync::new(probe, &cfg);
        assert_eq!(sync.resync().await.unwrap(), BootstrapOutcome::CannotConnectFail);

        let empty = ReplicaPeerSync::new(
            Arc::new(RespStorageProbe::new(port, SnapshotMode::Rdb)),
            &BootstrapConfig::default(),
        );
        assert_eq!(empty.resync().await.unwrap(), BootstrapOutcome::CannotConnectFail);
    }
}
