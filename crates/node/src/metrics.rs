//! Sidecar Metrics Module
//!
//! Gauges refreshed by the two metrics jobs plus per-job counters from the
//! scheduler, exported in Prometheus text format.
//!
//! ## Metrics Tracked
//!
//! | Metric | Source |
//! |--------|--------|
//! | `ringside_proxy_uptime_seconds` | proxy admin stats `uptime` |
//! | `ringside_proxy_client_connections` | sum of pool `client_connections` |
//! | `ringside_proxy_client_errors` | sum of pool `client_err` |
//! | `ringside_storage_connected_clients` | storage `INFO` |
//! | `ringside_storage_used_memory_bytes` | storage `INFO` |
//! | `ringside_storage_keys` | storage `INFO` keyspace, all dbs |
//! | `ringside_metrics_refresh_failures_total` | failed refreshes |
//! | `ringside_job_executions_total{job}` | scheduler |
//! | `ringside_job_errors_total{job}` | scheduler |
//!
//! Gauges are plain atomics; the last raw `INFO` map sits behind a lock for
//! the status surface.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use ringside_common::proxy::ProxyAdmin;
use ringside_common::storage::StorageProbe;
use tracing::debug;

use crate::job::Job;
use crate::scheduler::JobSnapshot;

pub const PROXY_STATS_JOB: &str = "proxy-stats";

pub const STORAGE_INFO_JOB: &str = "storage-info";

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub proxy_uptime_secs: AtomicU64,
    pub proxy_client_connections: AtomicU64,
    pub proxy_client_errors: AtomicU64,
    pub storage_connected_clients: AtomicU64,
    pub storage_used_memory_bytes: AtomicU64,
    pub storage_keys: AtomicU64,
    pub refresh_failures: AtomicU64,
    last_storage_info: RwLock<HashMap<String, String>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a proxy stats document into the proxy gauges.
    pub fn record_proxy_stats(&self, stats: &serde_json::Value) {
        let uptime = stats.get("uptime").and_then(|v| v.as_u64()).unwrap_or(0);
        let (mut connections, mut errors) = (0u64, 0u64);
        if let Some(obj) = stats.as_object() {
            for pool in obj.values().filter_map(|v| v.as_object()) {
                connections += pool.get("client_connections").and_then(|v| v.as_u64()).unwrap_or(0);
                errors += pool.get("client_err").and_then(|v| v.as_u64()).unwrap_or(0);
            }
        }
        self.proxy_uptime_secs.store(uptime, Ordering::Relaxed);
        self.proxy_client_connections.store(connections, Ordering::Relaxed);
        self.proxy_client_errors.store(errors, Ordering::Relaxed);
    }

    /// Fold a storage `INFO` map into the storage gauges.
    pub fn record_storage_info(&self, info: HashMap<String, String>) {
        let num = |k: &str| info.get(k).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        self.storage_connected_clients.store(num("connected_clients"), Ordering::Relaxed);
        self.storage_used_memory_bytes.store(num("used_memory"), Ordering::Relaxed);
        let keys: u64 = info
            .iter()
            .filter(|(k, _)| k.starts_with("db"))
            .filter_map(|(_, v)| keyspace_keys(v))
            .sum();
        self.storage_keys.store(keys, Ordering::Relaxed);
        *self.last_storage_info.write() = info;
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_storage_info(&self) -> HashMap<String, String> {
        self.last_storage_info.read().clone()
    }

    /// Render all gauges plus per-job counters.
    pub fn to_prometheus(&self, jobs: &[JobSnapshot]) -> String {
        let mut out = String::new();
        let gauges: [(&str, &str, &AtomicU64); 6] = [
            ("ringside_proxy_uptime_seconds", "Proxy uptime", &self.proxy_uptime_secs),
            (
                "ringside_proxy_client_connections",
                "Open client connections on the proxy",
                &self.proxy_client_connections,
            ),
            (
                "ringside_proxy_client_errors",
                "Client errors seen by the proxy",
                &self.proxy_client_errors,
            ),
            (
                "ringside_storage_connected_clients",
                "Clients connected to the storage engine",
                &self.storage_connected_clients,
            ),
            (
                "ringside_storage_used_memory_bytes",
                "Memory used by the storage engine",
                &self.storage_used_memory_bytes,
            ),
            ("ringside_storage_keys", "Keys across all storage databases", &self.storage_keys),
        ];
        for (name, help, value) in gauges {
            let _ = write!(
                out,
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {}\n",
                value.load(Ordering::SeqCst)
            );
        }
        let _ = write!(
            out,
            "# HELP ringside_metrics_refresh_failures_total Failed metrics refreshes\n\
             # TYPE ringside_metrics_refresh_failures_total counter\n\
             ringside_metrics_refresh_failures_total {}\n",
            self.refresh_failures.load(Ordering::SeqCst)
        );

        out.push_str("# HELP ringside_job_executions_total Job executions\n");
        out.push_str("# TYPE ringside_job_executions_total counter\n");
        for j in jobs {
            let _ = writeln!(
                out,
                "ringside_job_executions_total{{job=\"{}\"}} {}",
                j.name, j.executions
            );
        }
        out.push_str("# HELP ringside_job_errors_total Job executions that failed\n");
        out.push_str("# TYPE ringside_job_errors_total counter\n");
        for j in jobs {
            let _ = writeln!(out, "ringside_job_errors_total{{job=\"{}\"}} {}", j.name, j.errors);
        }
        out
    }
}

/// `keys=12,expires=0,avg_ttl=0` → 12.
fn keyspace_keys(v: &str) -> Option<u64> {
    v.split(',')
        .find_map(|part| part.strip_prefix("keys="))
        .and_then(|n| n.parse().ok())
}

// ════════════════════════════════════════════════════════════════════════════
// JOBS
// ════════════════════════════════════════════════════════════════════════════

pub struct ProxyStatsJob {
    admin: Arc<dyn ProxyAdmin>,
    metrics: Arc<MetricsRegistry>,
}

impl ProxyStatsJob {
    pub fn new(admin: Arc<dyn ProxyAdmin>, metrics: Arc<MetricsRegistry>) -> Self {
        ProxyStatsJob { admin, metrics }
    }
}

#[async_trait]
impl Job for ProxyStatsJob {
    fn name(&self) -> &str {
        PROXY_STATS_JOB
    }

    async fn execute(&self) -> anyhow::Result<()> {
        match self.admin.stats().await {
            Ok(stats) => {
                self.metrics.record_proxy_stats(&stats);
                debug!("proxy stats refreshed");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_refresh_failure();
                Err(e).context("fetching proxy stats")
            }
        }
    }
}

pub struct StorageInfoJob {
    storage: Arc<dyn StorageProbe>,
    metrics: Arc<MetricsRegistry>,
}

impl StorageInfoJob {
    pub fn new(storage: Arc<dyn StorageProbe>, metrics: Arc<MetricsRegistry>) -> Self {
        StorageInfoJob { storage, metrics }
    }
}

#[async_trait]
impl Job for StorageInfoJob {
    fn name(&self) -> &str {
        STORAGE_INFO_JOB
    }

    async fn execute(&self) -> anyhow::Result<()> {
        match self.storage.info().await {
            Ok(info) => {
                self.metrics.record_storage_info(info);
                debug!("storage info refreshed");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_refresh_failure();
                Err(e).context("fetching storage INFO")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use ringside_common::mock::{MockProxyAdmin, MockStorage};

    #[tokio::test]
    async fn test_proxy_stats_job() {
        let admin = Arc::new(MockProxyAdmin::new());
        admin.set_stats(serde_json::json!({
            "service": "proxy",
            "uptime": 360,
            "ring": {"client_connections": 7, "client_err": 2},
        }));
        let metrics = Arc::new(MetricsRegistry::new());
        ProxyStatsJob::new(admin, metrics.clone()).execute().await.unwrap();

        assert_eq!(metrics.proxy_uptime_secs.load(Ordering::SeqCst), 360);
        assert_eq!(metrics.proxy_client_connections.load(Ordering::SeqCst), 7);
        assert_eq!(metrics.proxy_client_errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_storage_info_job() {
        let storage = Arc::new(MockStorage::new());
        storage.set_info("connected_clients", "3");
        storage.set_info("used_memory", "1048576");
        storage.set_info("db0", "keys=10,expires=0,avg_ttl=0");
        storage.set_info("db1", "keys=5,expires=1,avg_ttl=0");
        let metrics = Arc::new(MetricsRegistry::new());
        StorageInfoJob::new(storage, metrics.clone()).execute().await.unwrap();

        assert_eq!(metrics.storage_connected_clients.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.storage_used_memory_bytes.load(Ordering::SeqCst), 1_048_576);
        assert_eq!(metrics.storage_keys.load(Ordering::SeqCst), 15);
        assert_eq!(metrics.last_storage_info().len(), 4);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsRegistry::new();
        metrics.storage_keys.store(42, Ordering::Relaxed);
        let jobs = vec![JobSnapshot {
            name: "backup".to_string(),
            state: JobState::Done,
            executions: 3,
            errors: 1,
            schedule: "daily at 12:01:00".to_string(),
        }];
        let text = metrics.to_prometheus(&jobs);
        assert!(text.contains("# TYPE ringside_storage_keys gauge\nringside_storage_keys 42\n"));
        assert!(text.contains("ringside_job_executions_total{job=\"backup\"} 3\n"));
        assert!(text.contains("ringside_job_errors_total{job=\"backup\"} 1\n"));
        assert!(text.contains("ringside_metrics_refresh_failures_total 0\n"));
    }

    #[test]
    fn test_keyspace_keys() {
        assert_eq!(keyspace_keys("keys=12,expires=0,avg_ttl=0"), Some(12));
        assert_eq!(keyspace_keys("garbage"), None);
    }
}
