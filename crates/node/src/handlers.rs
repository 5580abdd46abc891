//! HTTP status and admin surface.
//!
//! Read-only endpoints expose the Node State, the job table, and the
//! Prometheus gauges. Admin endpoints only ever call
//! [`Scheduler::run_now`]; the job itself does the work on a background
//! task, so every trigger answers `202 Accepted` immediately.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET  | `/health` | 200 when sidecar, storage and proxy are up, else 503 |
//! | GET  | `/status` | liveness flags + warmup/backup/restore reports |
//! | GET  | `/jobs` | per-job state and counters |
//! | GET  | `/metrics/prometheus` | text exposition |
//! | POST | `/admin/backup` | run the backup job |
//! | POST | `/admin/restore` | run the restore job |
//! | POST | `/admin/snapshot` | snapshot without upload |
//! | POST | `/admin/:process/:action` | `storage`/`proxy` × `start`/`stop` |

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::backup_job;
use crate::metrics::MetricsRegistry;
use crate::node_state::{NodeState, SubsystemStatus};
use crate::orchestrator::BootPath;
use crate::process_jobs::{command_job_name, ProcessAction, SNAPSHOT_JOB};
use crate::restore_job;
use crate::scheduler::{JobSnapshot, Scheduler, SchedulerError};
use ringside_common::process::ProcessKind;

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

pub struct AppState {
    pub cluster_name: String,
    pub state: Arc<NodeState>,
    pub scheduler: Arc<Scheduler>,
    pub metrics: Arc<MetricsRegistry>,
    /// Path chosen at startup; `None` while the orchestrator is still running.
    pub boot_path: RwLock<Option<BootPath>>,
    /// Unix seconds.
    pub start_time: u64,
}

impl AppState {
    /// Record the startup path once the orchestrator returns.
    pub fn set_boot_path(&self, path: BootPath) {
        *self.boot_path.write() = Some(path);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RESPONSE TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub healthy: bool,
    pub sidecar_alive: bool,
    pub storage_alive: bool,
    pub proxy_alive: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResp {
    pub cluster_name: String,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_path: Option<BootPath>,
    pub sidecar_alive: bool,
    pub storage_alive: bool,
    pub proxy_alive: bool,
    pub monitoring_suspended: bool,
    pub warmup: SubsystemStatus,
    pub backup: SubsystemStatus,
    pub restore: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct AdminResp {
    pub job: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// READ-ONLY HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health_handler(State(app): State<Arc<AppState>>) -> (StatusCode, Json<HealthResp>) {
    let s = app.state.snapshot();
    let healthy = s.sidecar_alive && s.storage_alive && s.proxy_alive;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResp {
            healthy,
            sidecar_alive: s.sidecar_alive,
            storage_alive: s.storage_alive,
            proxy_alive: s.proxy_alive,
        }),
    )
}

/// GET /status
pub async fn status_handler(State(app): State<Arc<AppState>>) -> Json<StatusResp> {
    let s = app.state.snapshot();
    Json(StatusResp {
        cluster_name: app.cluster_name.clone(),
        uptime_secs: now_secs().saturating_sub(app.start_time),
        boot_path: *app.boot_path.read(),
        sidecar_alive: s.sidecar_alive,
        storage_alive: s.storage_alive,
        proxy_alive: s.proxy_alive,
        monitoring_suspended: s.monitoring_suspended,
        warmup: s.warmup_report(),
        backup: s.backup_report(),
        restore: s.restore_report(),
    })
}

/// GET /jobs
pub async fn jobs_handler(State(app): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(app.scheduler.snapshot())
}

/// GET /metrics/prometheus
pub async fn prometheus_handler(State(app): State<Arc<AppState>>) -> String {
    app.metrics.to_prometheus(&app.scheduler.snapshot())
}

// ════════════════════════════════════════════════════════════════════════════
// ADMIN HANDLERS
// ════════════════════════════════════════════════════════════════════════════

fn trigger(app: &AppState, job: &str) -> (StatusCode, Json<AdminResp>) {
    match app.scheduler.run_now(job) {
        Ok(()) => {
            info!(job, "admin trigger accepted");
            (
                StatusCode::ACCEPTED,
                Json(AdminResp {
                    job: job.to_string(),
                    accepted: true,
                    error: None,
                }),
            )
        }
        Err(e) => {
            let code = match e {
                SchedulerError::UnknownJob(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(AdminResp {
                    job: job.to_string(),
                    accepted: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

fn not_found(job: String) -> (StatusCode, Json<AdminResp>) {
    (
        StatusCode::NOT_FOUND,
        Json(AdminResp {
            job,
            accepted: false,
            error: Some("no such process command".to_string()),
        }),
    )
}

/// POST /admin/backup
pub async fn backup_handler(State(app): State<Arc<AppState>>) -> (StatusCode, Json<AdminResp>) {
    trigger(&app, backup_job::JOB_NAME)
}

/// POST /admin/restore
pub async fn restore_handler(State(app): State<Arc<AppState>>) -> (StatusCode, Json<AdminResp>) {
    trigger(&app, restore_job::JOB_NAME)
}

/// POST /admin/snapshot
pub async fn snapshot_handler(State(app): State<Arc<AppState>>) -> (StatusCode, Json<AdminResp>) {
    trigger(&app, SNAPSHOT_JOB)
}

/// Map `storage|proxy` and `start|stop` to a command job name.
pub fn process_command_job(process: &str, action: &str) -> Option<String> {
    let kind = match process {
        "storage" => ProcessKind::Storage,
        "proxy" => ProcessKind::Proxy,
        _ => return None,
    };
    let action = match action {
        "start" => ProcessAction::Start,
        "stop" => ProcessAction::Stop,
        _ => return None,
    };
    Some(command_job_name(kind, action))
}

/// POST /admin/:process/:action
pub async fn process_handler(
    State(app): State<Arc<AppState>>,
    Path((process, action)): Path<(String, String)>,
) -> (StatusCode, Json<AdminResp>) {
    match process_command_job(&process, &action) {
        Some(job) => trigger(&app, &job),
        None => not_found(format!("{}-{}", process, action)),
    }
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/jobs", get(jobs_handler))
        .route("/metrics/prometheus", get(prometheus_handler))
        // Admin triggers
        .route("/admin/backup", post(backup_handler))
        .route("/admin/restore", post(restore_handler))
        .route("/admin/snapshot", post(snapshot_handler))
        .route("/admin/:process/:action", post(process_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_command_job_mapping() {
        assert_eq!(process_command_job("proxy", "stop").as_deref(), Some("proxy-stop"));
        assert_eq!(process_command_job("storage", "start").as_deref(), Some("storage-start"));
        assert_eq!(process_command_job("storage", "restart"), None);
        assert_eq!(process_command_job("kernel", "stop"), None);
    }

    #[test]
    fn test_now_secs() {
        assert!(now_secs() > 0);
    }
}
