//! # Ringside Node CLI Module
//!
//! Subcommands, env-file loading, collaborator wiring, and HTTP server
//! setup, kept out of the entry point.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use axum::Router;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use ringside_common::config::{load_from_file, SidecarConfig};
use ringside_common::process::{ProcessKind, ScriptProcess};
use ringside_common::{
    FileConsistencySource, HttpProxyAdmin, Identity, InMemoryAcl, LocalBackup, LocalRestore,
    ProxyConfigWriter, RespStorageProbe, SnapshotMode, StaticDirectory, StaticIdentity,
};
use ringside_node::{build_router, AppState, Collaborators, Orchestrator, ReplicaPeerSync};

use crate::{DEFAULT_HTTP_PORT, NODE_NAME, NODE_VERSION};

// ════════════════════════════════════════════════════════════════════════════
// ENV FILE
// ════════════════════════════════════════════════════════════════════════════

/// Load environment variables from an env file.
///
/// `RINGSIDE_ENV_FILE` if set, otherwise `.env`. A missing file is fine.
pub fn load_env_file() {
    let env_file = env::var("RINGSIDE_ENV_FILE").unwrap_or_else(|_| ".env".to_string());

    match dotenvy::from_filename(&env_file) {
        Ok(path) => {
            // tracing is not initialised yet; main logs this later
            env::set_var("_RINGSIDE_LOADED_ENV_FILE", path.display().to_string());
        }
        Err(e) => {
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("Warning: failed to load {}: {}", env_file, e);
            }
        }
    }
}

/// Config path from the first `run` argument, then `RINGSIDE_CONFIG`.
pub fn resolve_config_path(run_args: &[String]) -> Option<PathBuf> {
    run_args
        .first()
        .map(PathBuf::from)
        .or_else(|| env::var("RINGSIDE_CONFIG").ok().map(PathBuf::from))
}

// ════════════════════════════════════════════════════════════════════════════
// COLLABORATOR WIRING
// ════════════════════════════════════════════════════════════════════════════

/// Build the production adapters for a validated config.
pub fn build_collaborators(
    cfg: &SidecarConfig,
    config_path: &Path,
) -> anyhow::Result<Collaborators> {
    let p = &cfg.processes;
    let identity: Arc<dyn Identity> = Arc::new(StaticIdentity::new(cfg.identity.clone()));

    let probe = Arc::new(RespStorageProbe::new(
        p.storage_port,
        SnapshotMode::for_file(&cfg.backup.persistence_file),
    ));
    let proxy_admin =
        HttpProxyAdmin::new(p.proxy_admin_port).context("building proxy admin client")?;

    Ok(Collaborators {
        identity: identity.clone(),
        membership: Arc::new(InMemoryAcl::new()),
        directory: Arc::new(StaticDirectory::new(cfg.cluster.instances.clone())),
        storage_process: Arc::new(ScriptProcess::new(
            ProcessKind::Storage,
            p.storage_start_script.clone(),
            p.storage_stop_script.clone(),
            p.storage_port,
        )),
        proxy_process: Arc::new(ScriptProcess::new(
            ProcessKind::Proxy,
            p.proxy_start_script.clone(),
            p.proxy_stop_script.clone(),
            p.proxy_port,
        )),
        storage: probe.clone(),
        backup: Arc::new(LocalBackup::new(cfg.backup.backup_dir.clone())),
        restore: Arc::new(LocalRestore::new(
            cfg.backup.backup_dir.clone(),
            cfg.restore.data_dir.clone(),
        )),
        proxy_admin: Arc::new(proxy_admin),
        config_writer: Arc::new(ProxyConfigWriter::new(cfg, identity)),
        consistency: Arc::new(FileConsistencySource::new(config_path)),
        peer_sync: Arc::new(ReplicaPeerSync::new(probe, &cfg.bootstrap)),
    })
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP SERVER
// ════════════════════════════════════════════════════════════════════════════

const BIND_ATTEMPTS: u32 = 5;

const BIND_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bind with a few retries; a restarted sidecar can race its predecessor.
async fn bind_with_retry(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    let mut attempt = 1;
    loop {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < BIND_ATTEMPTS => {
                warn!(port = addr.port(), attempt, error = %e, "port busy, retrying");
                tokio::time::sleep(BIND_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(anyhow!(
                    "port {} still busy after {} attempts: {}",
                    addr.port(),
                    BIND_ATTEMPTS,
                    e
                ));
            }
        }
    }
}

async fn serve(addr: SocketAddr, router: Router, shutdown: Arc<Notify>) {
    let listener = match bind_with_retry(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind HTTP server to {}: {}", addr, e);
            return;
        }
    };
    info!("HTTP server on http://{}", addr);
    info!("   Status: /health /status /jobs /metrics/prometheus");
    info!("   Admin:  /admin/backup /admin/restore /admin/snapshot");
    info!("           /admin/{{storage|proxy}}/{{start|stop}}");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.notified().await;
            info!("HTTP server shutting down");
        })
        .await
    {
        error!("HTTP server error: {}", e);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLI SUBCOMMANDS
// ════════════════════════════════════════════════════════════════════════════

pub fn print_usage(prog: &str) {
    eprintln!("{} v{}", NODE_NAME, NODE_VERSION);
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} run [config.toml]          Start the sidecar", prog);
    eprintln!("  {} status [--port PORT]       Query a running sidecar's status", prog);
    eprintln!("  {} health [--port PORT]       Query a running sidecar's health", prog);
    eprintln!("  {} version                    Show version", prog);
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RINGSIDE_CONFIG           Config path when none is given to `run`");
    eprintln!("  RINGSIDE_ENV_FILE         Env file to load (default .env)");
    eprintln!("  RINGSIDE_LOG_LEVEL        trace|debug|info|warn|error (default info)");
    eprintln!("  RINGSIDE_CLUSTER_NAME     Overrides cluster_name");
    eprintln!("  RINGSIDE_HTTP_PORT        Overrides http_port");
    eprintln!("  RINGSIDE_RESTORE_DATE     Overrides restore.date (YYYYMMDD)");
    eprintln!("  RINGSIDE_BACKUP_SCHEDULE  Overrides backup.schedule (day|week)");
    eprintln!("  RINGSIDE_FORCE_WARM       Forces the warm bootstrap path");
}

pub fn cmd_version() {
    println!("{} v{}", NODE_NAME, NODE_VERSION);
}

/// `--port` / `-p`, then `RINGSIDE_HTTP_PORT`, then the default.
pub fn parse_port_flag(args: &[String]) -> u16 {
    args.iter()
        .position(|a| a == "--port" || a == "-p")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .or_else(|| env::var("RINGSIDE_HTTP_PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_HTTP_PORT)
}

async fn query(port: u16, path: &str) -> anyhow::Result<(reqwest::StatusCode, String)> {
    let url = format!("http://127.0.0.1:{}{}", port, path);
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("connecting to sidecar at port {}", port))?;
    let status = resp.status();
    let body = resp.text().await.context("reading response body")?;
    let body = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or(body),
        Err(_) => body,
    };
    Ok((status, body))
}

/// `status` subcommand.
pub async fn cmd_status(port: u16) -> anyhow::Result<()> {
    let (status, body) = query(port, "/status").await?;
    println!("HTTP {}", status);
    println!("{}", body);
    Ok(())
}

/// `health` subcommand. Non-2xx is an error so scripts can test the exit code.
pub async fn cmd_health(port: u16) -> anyhow::Result<()> {
    let (status, body) = query(port, "/health").await?;
    println!("{}", body);
    if !status.is_success() {
        return Err(anyhow!("sidecar unhealthy (HTTP {})", status));
    }
    Ok(())
}

/// `run` subcommand: load config, run the orchestrator, serve until Ctrl+C.
pub async fn cmd_run(run_args: &[String]) -> anyhow::Result<()> {
    let config_path = resolve_config_path(run_args)
        .ok_or_else(|| anyhow!("no config file given (argument or RINGSIDE_CONFIG)"))?;
    let cfg = load_from_file(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    cfg.validate().context("invalid configuration")?;

    info!("═══════════════════════════════════════════════════════════════");
    info!("Cluster:        {}", cfg.cluster_name);
    info!("Config:         {}", config_path.display());
    info!("Multi-region:   {}", cfg.cluster.multi_region);
    info!(
        "Backup:         {} ({:?} at hour {})",
        cfg.backup.enabled, cfg.backup.schedule, cfg.backup.hour
    );
    info!("Restore:        {}", cfg.restore.enabled);
    info!("Warm bootstrap: {} (forced: {})", cfg.bootstrap.warm_enabled, cfg.bootstrap.force_warm);
    info!("HTTP port:      {}", cfg.http_port);
    info!("═══════════════════════════════════════════════════════════════");

    let deps = build_collaborators(&cfg, &config_path)?;
    let http_port = cfg.http_port;
    let cluster_name = cfg.cluster_name.clone();
    let orchestrator = Orchestrator::new(cfg, deps);

    // Served during initialization too, which can sleep for minutes.
    let app = Arc::new(AppState {
        cluster_name,
        state: orchestrator.state(),
        scheduler: orchestrator.scheduler(),
        metrics: orchestrator.metrics(),
        boot_path: RwLock::new(None),
        start_time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    });
    let shutdown = Arc::new(Notify::new());
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let server = tokio::spawn(serve(addr, build_router(app.clone()), shutdown.clone()));

    match orchestrator.initialize().await {
        Ok(path) => app.set_boot_path(path),
        Err(e) => {
            shutdown.notify_waiters();
            let _ = server.await;
            return Err(e).context("sidecar initialization");
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    info!("shutdown signal received");
    shutdown.notify_waiters();
    if let Err(e) = server.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }
    info!("sidecar stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_port_flag() {
        assert_eq!(parse_port_flag(&args(&["--port", "9000"])), 9000);
        assert_eq!(parse_port_flag(&args(&["-p", "9001"])), 9001);
    }

    #[test]
    fn test_resolve_config_path_prefers_argument() {
        assert_eq!(
            resolve_config_path(&args(&["/etc/ringside.toml"])),
            Some(PathBuf::from("/etc/ringside.toml"))
        );
    }

    #[test]
    fn test_build_collaborators_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SidecarConfig {
            cluster_name: "ring-a".to_string(),
            ..SidecarConfig::default()
        };
        assert!(build_collaborators(&cfg, &dir.path().join("ringside.toml")).is_ok());
    }
}
