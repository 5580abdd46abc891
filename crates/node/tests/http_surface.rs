//! Router tests: status documents and admin triggers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::RwLock;
use ringside_common::config::SidecarConfig;
use ringside_common::error::CollaboratorError;
use ringside_common::mock::*;
use ringside_common::process::ProcessKind;
use ringside_common::StaticIdentity;
use ringside_node::{
    build_router, AppState, BootstrapOutcome, Collaborators, Orchestrator, PeerSync,
};
use tower::ServiceExt;

struct InSync;

#[async_trait]
impl PeerSync for InSync {
    async fn resync(&self) -> Result<BootstrapOutcome, CollaboratorError> {
        Ok(BootstrapOutcome::InSyncSuccess)
    }
}

struct Fixture {
    router: Router,
    backup: Arc<MockBackup>,
    proxy_process: Arc<MockProcess>,
    orchestrator: Orchestrator,
    _dir: tempfile::TempDir,
}

fn config(persistence: std::path::PathBuf) -> SidecarConfig {
    let mut cfg = SidecarConfig {
        cluster_name: "ring-a".to_string(),
        ..SidecarConfig::default()
    };
    cfg.backup.persistence_file = persistence;
    cfg
}

fn orchestrator(
    cfg: SidecarConfig,
    backup: Arc<MockBackup>,
    proxy_process: Arc<MockProcess>,
) -> Orchestrator {
    let deps = Collaborators {
        identity: Arc::new(StaticIdentity::new(cfg.identity.clone())),
        membership: Arc::new(MockMembership::new()),
        directory: Arc::new(MockDirectory::new(["10.0.0.1"])),
        storage_process: Arc::new(MockProcess::new(ProcessKind::Storage)),
        proxy_process,
        storage: Arc::new(MockStorage::new()),
        backup,
        restore: Arc::new(MockRestore::new()),
        proxy_admin: Arc::new(MockProxyAdmin::new()),
        config_writer: Arc::new(MockConfigWriter::new()),
        consistency: Arc::new(MockConsistencySource::new("DC_ONE", "DC_ONE")),
        peer_sync: Arc::new(InSync),
    };
    Orchestrator::new(cfg, deps)
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let persistence = dir.path().join("appendonly.aof");
    std::fs::write(&persistence, b"*1\r\n$4\r\nPING\r\n").unwrap();

    let backup = Arc::new(MockBackup::new());
    let proxy_process = Arc::new(MockProcess::new(ProcessKind::Proxy));
    let orchestrator = orchestrator(config(persistence), backup.clone(), proxy_process.clone());
    let path = orchestrator.initialize().await.unwrap();

    let app = app_state(&orchestrator);
    app.set_boot_path(path);
    Fixture {
        router: build_router(app),
        backup,
        proxy_process,
        orchestrator,
        _dir: dir,
    }
}

fn app_state(orchestrator: &Orchestrator) -> Arc<AppState> {
    Arc::new(AppState {
        cluster_name: "ring-a".to_string(),
        state: orchestrator.state(),
        scheduler: orchestrator.scheduler(),
        metrics: orchestrator.metrics(),
        boot_path: RwLock::new(None),
        start_time: 0,
    })
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = router
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn test_status_document() {
    let f = fixture().await;
    let (code, body) = call(&f.router, "GET", "/status").await;

    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["cluster_name"], "ring-a");
    assert_eq!(body["boot_path"], "cold");
    assert_eq!(body["storage_alive"], true);
    assert_eq!(body["backup"]["status"], "not started");
    assert_eq!(body["restore"]["status"], "not started");
    assert_eq!(body["warmup"]["status"], "not started");
    assert!(body["backup"]["timestamp"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_status_served_while_initializing() {
    let mut cfg = config("/nonexistent/appendonly.aof".into());
    // Replacement node on a multi-region ring: 100..200s settle.
    cfg.cluster.multi_region = true;
    cfg.identity.replace = true;
    let orchestrator = orchestrator(
        cfg,
        Arc::new(MockBackup::new()),
        Arc::new(MockProcess::new(ProcessKind::Proxy)),
    );
    let app = app_state(&orchestrator);
    let router = build_router(app.clone());

    let (result, during) = tokio::join!(orchestrator.initialize(), async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        call(&router, "GET", "/status").await
    });

    let (code, body) = during;
    assert_eq!(code, StatusCode::OK);
    assert!(body["boot_path"].is_null());
    assert_eq!(body["sidecar_alive"], true);

    app.set_boot_path(result.unwrap());
    let (_, body) = call(&router, "GET", "/status").await;
    assert_eq!(body["boot_path"], "cold");
}

#[tokio::test(start_paused = true)]
async fn test_health_reflects_process_liveness() {
    let f = fixture().await;
    let (code, body) = call(&f.router, "GET", "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["healthy"], true);

    f.orchestrator.state().set_proxy_alive(false);
    let (code, body) = call(&f.router, "GET", "/health").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["proxy_alive"], false);
}

#[tokio::test(start_paused = true)]
async fn test_admin_backup_runs_job() {
    let f = fixture().await;
    let (code, body) = call(&f.router, "POST", "/admin/backup").await;
    assert_eq!(code, StatusCode::ACCEPTED);
    assert_eq!(body["job"], "backup");

    // The persistence file check goes through the blocking pool.
    for _ in 0..50 {
        if !f.backup.uploads().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(f.backup.uploads().len(), 1);
    let (_, status) = call(&f.router, "GET", "/status").await;
    assert_eq!(status["backup"]["status"], "completed");
}

#[tokio::test(start_paused = true)]
async fn test_admin_process_stop_suspends_monitoring() {
    let f = fixture().await;
    let (code, body) = call(&f.router, "POST", "/admin/proxy/stop").await;
    assert_eq!(code, StatusCode::ACCEPTED);
    assert_eq!(body["job"], "proxy-stop");

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(f.proxy_process.stops(), 1);
    assert_eq!(f.proxy_process.starts(), 1, "monitor does not undo an admin stop");
    let (_, status) = call(&f.router, "GET", "/status").await;
    assert_eq!(status["monitoring_suspended"], true);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_admin_targets_are_404() {
    let f = fixture().await;
    let (code, _) = call(&f.router, "POST", "/admin/kernel/stop").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (code, _) = call(&f.router, "POST", "/admin/proxy/restart").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_and_prometheus() {
    let f = fixture().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (code, jobs) = call(&f.router, "GET", "/jobs").await;
    assert_eq!(code, StatusCode::OK);
    let names: Vec<&str> = jobs
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|j| j["name"].as_str())
        .collect();
    for expected in [
        "backup",
        "restore",
        "warm-bootstrap",
        "proxy-reset",
        "storage-monitor",
        "proxy-monitor",
    ] {
        assert!(names.contains(&expected), "missing {}", expected);
    }

    let resp = f
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics/prometheus").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ringside_job_executions_total{job=\"proxy-reset\"} 1"));
    assert!(text.contains("# TYPE ringside_storage_keys gauge"));
}
