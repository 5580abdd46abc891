//! # Node State
//!
//! Process-wide status blackboard shared by the orchestrator, the jobs, and
//! the HTTP surface. One instance per process, rebuilt on every start.
//!
//! ## Invariants
//!
//! - `first_backup` / `first_restore` start `true` and are cleared on the
//!   first execution of the matching job, whatever its outcome. Nothing
//!   sets them back.
//! - Reads return a consistent copy ([`NodeStatus`]); writers go through
//!   [`NodeState::update`] or the typed setters, all under one lock.
//!
//! ## Status Vocabulary
//!
//! | Subsystem | Condition                          | Status                |
//! |-----------|------------------------------------|-----------------------|
//! | backup    | never attempted                    | `not started`         |
//! | backup    | `backing_up`                       | `pending`             |
//! | backup    | last run uploaded                  | `completed`           |
//! | backup    | last run did not upload            | `unsuccessful`        |
//! | restore   | same pattern with `restoring`      |                       |
//! | warmup    | no outcome, not bootstrapping      | `not started`         |
//! | warmup    | `bootstrapping`                    | `pending`             |
//! | warmup    | `IN_SYNC_SUCCESS`                  | `completed`           |
//! | warmup    | any failure outcome                | `failed: <reason>`    |

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Terminal result of a warm-resync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootstrapOutcome {
    CannotConnectFail,
    WarmupErrorFail,
    RetriesFail,
    ExpiredBootstraptimeFail,
    InSyncSuccess,
}

impl BootstrapOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BootstrapOutcome::InSyncSuccess)
    }

    /// Status-surface wording.
    pub fn status_text(&self) -> &'static str {
        match self {
            BootstrapOutcome::CannotConnectFail => "failed: cannot connect",
            BootstrapOutcome::WarmupErrorFail => "failed: warmup error",
            BootstrapOutcome::RetriesFail => "failed: retries exhausted",
            BootstrapOutcome::ExpiredBootstraptimeFail => "failed: bootstrap time expired",
            BootstrapOutcome::InSyncSuccess => "completed",
        }
    }
}

/// Copy of every field at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub sidecar_alive: bool,
    pub storage_alive: bool,
    pub proxy_alive: bool,
    pub bootstrapping: bool,
    /// `None` means NOT_STARTED.
    pub bootstrap_status: Option<BootstrapOutcome>,
    pub bootstrap_time: Option<DateTime<Utc>>,
    pub backing_up: bool,
    pub backup_status: bool,
    pub backup_time: Option<DateTime<Utc>>,
    pub first_backup: bool,
    pub restoring: bool,
    pub restore_status: bool,
    pub restore_time: Option<DateTime<Utc>>,
    pub first_restore: bool,
    pub monitoring_suspended: bool,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus {
            sidecar_alive: false,
            storage_alive: false,
            proxy_alive: false,
            bootstrapping: false,
            bootstrap_status: None,
            bootstrap_time: None,
            backing_up: false,
            backup_status: false,
            backup_time: None,
            first_backup: true,
            restoring: false,
            restore_status: false,
            restore_time: None,
            first_restore: true,
            monitoring_suspended: false,
        }
    }
}

/// `{status, timestamp}` pair reported per subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsystemStatus {
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NodeStatus {
    pub fn backup_report(&self) -> SubsystemStatus {
        SubsystemStatus {
            status: attempt_status(self.first_backup, self.backing_up, self.backup_status)
                .to_string(),
            timestamp: self.backup_time,
        }
    }

    pub fn restore_report(&self) -> SubsystemStatus {
        SubsystemStatus {
            status: attempt_status(self.first_restore, self.restoring, self.restore_status)
                .to_string(),
            timestamp: self.restore_time,
        }
    }

    pub fn warmup_report(&self) -> SubsystemStatus {
        let status = if self.bootstrapping {
            "pending"
        } else {
            match self.bootstrap_status {
                None => "not started",
                Some(outcome) => outcome.status_text(),
            }
        };
        SubsystemStatus {
            status: status.to_string(),
            timestamp: self.bootstrap_time,
        }
    }
}

fn attempt_status(first: bool, in_progress: bool, succeeded: bool) -> &'static str {
    if first {
        "not started"
    } else if in_progress {
        "pending"
    } else if succeeded {
        "completed"
    } else {
        "unsuccessful"
    }
}

/// Shared, lock-protected [`NodeStatus`].
#[derive(Debug, Default)]
pub struct NodeState {
    inner: RwLock<NodeStatus>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> NodeStatus {
        self.inner.read().clone()
    }

    /// Apply several changes atomically.
    pub fn update<F: FnOnce(&mut NodeStatus)>(&self, f: F) {
        f(&mut self.inner.write());
    }

    pub fn storage_alive(&self) -> bool {
        self.inner.read().storage_alive
    }

    pub fn set_storage_alive(&self, alive: bool) {
        self.inner.write().storage_alive = alive;
    }

    pub fn proxy_alive(&self) -> bool {
        self.inner.read().proxy_alive
    }

    pub fn set_proxy_alive(&self, alive: bool) {
        self.inner.write().proxy_alive = alive;
    }

    pub fn is_restoring(&self) -> bool {
        self.inner.read().restoring
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.inner.read().bootstrapping
    }

    /// Last warm bootstrap ended without reaching sync.
    pub fn warm_bootstrap_failed(&self) -> bool {
        matches!(self.inner.read().bootstrap_status, Some(o) if !o.is_success())
    }

    pub fn is_backing_up(&self) -> bool {
        self.inner.read().backing_up
    }

    pub fn monitoring_suspended(&self) -> bool {
        self.inner.read().monitoring_suspended
    }

    pub fn set_monitoring_suspended(&self, suspended: bool) {
        self.inner.write().monitoring_suspended = suspended;
    }

    /// Restore or warm bootstrap in progress; process supervision and
    /// backups stand aside.
    pub fn is_data_busy(&self) -> bool {
        let s = self.inner.read();
        s.restoring || s.bootstrapping
    }
}

// Shared across jobs and the HTTP server.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<NodeState>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let s = NodeState::new().snapshot();
        assert!(s.first_backup && s.first_restore);
        assert_eq!(s.bootstrap_status, None);
        assert_eq!(s.backup_report().status, "not started");
        assert_eq!(s.restore_report().status, "not started");
        assert_eq!(s.warmup_report().status, "not started");
    }

    #[test]
    fn test_backup_vocabulary() {
        let state = NodeState::new();
        state.update(|s| {
            s.first_backup = false;
            s.backing_up = true;
        });
        assert_eq!(state.snapshot().backup_report().status, "pending");

        state.update(|s| s.backing_up = false);
        assert_eq!(state.snapshot().backup_report().status, "unsuccessful");

        state.update(|s| s.backup_status = true);
        assert_eq!(state.snapshot().backup_report().status, "completed");
    }

    #[test]
    fn test_warmup_failures_map_to_reasons() {
        let cases = [
            (BootstrapOutcome::CannotConnectFail, "failed: cannot connect"),
            (BootstrapOutcome::WarmupErrorFail, "failed: warmup error"),
            (BootstrapOutcome::RetriesFail, "failed: retries exhausted"),
            (BootstrapOutcome::ExpiredBootstraptimeFail, "failed: bootstrap time expired"),
            (BootstrapOutcome::InSyncSuccess, "completed"),
        ];
        let state = NodeState::new();
        for (outcome, text) in cases {
            state.update(|s| s.bootstrap_status = Some(outcome));
            assert_eq!(state.snapshot().warmup_report().status, text);
        }
        state.update(|s| s.bootstrapping = true);
        assert_eq!(state.snapshot().warmup_report().status, "pending");
    }

    #[test]
    fn test_data_busy() {
        let state = NodeState::new();
        assert!(!state.is_data_busy());
        state.update(|s| s.restoring = true);
        assert!(state.is_data_busy());
    }

    #[test]
    fn test_warm_bootstrap_failed() {
        let state = NodeState::new();
        assert!(!state.warm_bootstrap_failed());
        state.update(|s| s.bootstrap_status = Some(BootstrapOutcome::RetriesFail));
        assert!(state.warm_bootstrap_failed());
        state.update(|s| s.bootstrap_status = Some(BootstrapOutcome::InSyncSuccess));
        assert!(!state.warm_bootstrap_failed());
    }
}
