//! Sidecar configuration loaded from TOML with a few environment overrides.
//!
//! Every section has defaults so a minimal file only needs the cluster name.
//! The orchestrator treats the loaded value as read-only input.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backup::parse_restore_date;
use crate::error::ConfigError;

/// Backup cadence. Daily backups fire every day at the configured hour,
/// weekly backups fire on Sunday at the configured hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupSchedule {
    Day,
    Week,
}

impl BackupSchedule {
    /// Parse the `"day"` / `"week"` vocabulary used by operators.
    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" => Some(BackupSchedule::Day),
            "week" => Some(BackupSchedule::Week),
            _ => None,
        }
    }
}

impl Default for BackupSchedule {
    fn default() -> Self {
        BackupSchedule::Day
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Name under which every instance of this cluster is registered.
    pub cluster_name: String,
    /// Port the status/admin HTTP server listens on.
    pub http_port: u16,
    pub cluster: ClusterConfig,
    pub identity: IdentityConfig,
    pub processes: ProcessConfig,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub bootstrap: BootstrapConfig,
    pub consistency: ConsistencyConfig,
    pub intervals: IntervalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Peer-to-peer port the proxies gossip and replicate on.
    pub peer_port: u16,
    pub multi_region: bool,
    /// Instances known to this node when no external registry is wired in.
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub host_ip: String,
    pub token: String,
    pub seeds: Vec<String>,
    pub seed: bool,
    pub replace: bool,
    pub token_pregenerated: bool,
    pub new_token: bool,
    pub out_of_service: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub proxy_start_script: String,
    pub proxy_stop_script: String,
    pub storage_start_script: String,
    pub storage_stop_script: String,
    /// Client-facing port of the proxy.
    pub proxy_port: u16,
    pub proxy_admin_port: u16,
    pub storage_port: u16,
    /// Where the rendered proxy configuration is written.
    pub proxy_config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub schedule: BackupSchedule,
    /// Hour of day for calendar backups. Negative disables scheduling.
    pub hour: i32,
    /// File the storage engine writes on snapshot.
    pub persistence_file: PathBuf,
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub enabled: bool,
    /// 8-digit `YYYYMMDD` date of the backup to restore.
    pub date: String,
    /// Storage engine data directory the backup is copied into.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub warm_enabled: bool,
    pub force_warm: bool,
    /// `host:port` storage endpoints of peers holding the same token range.
    pub peers: Vec<String>,
    /// Seconds between replication progress checks.
    pub sync_poll_secs: u64,
    pub sync_max_polls: u32,
    /// Hard ceiling on one warm bootstrap attempt.
    pub max_bootstrap_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    pub read: String,
    pub write: String,
}

/// Periods, in seconds, of the recurring jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub acl_reconcile_secs: u64,
    pub process_monitor_secs: u64,
    pub proxy_stats_secs: u64,
    pub storage_info_secs: u64,
    pub config_refresh_secs: u64,
    pub consistency_watch_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        SidecarConfig {
            cluster_name: String::new(),
            http_port: 8080,
            cluster: ClusterConfig::default(),
            identity: IdentityConfig::default(),
            processes: ProcessConfig::default(),
            backup: BackupConfig::default(),
            restore: RestoreConfig::default(),
            bootstrap: BootstrapConfig::default(),
            consistency: ConsistencyConfig::default(),
            intervals: IntervalConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            peer_port: 8101,
            multi_region: false,
            instances: Vec::new(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            proxy_start_script: "/apps/proxy/bin/launch.sh".to_string(),
            proxy_stop_script: "/apps/proxy/bin/kill.sh".to_string(),
            storage_start_script: "/apps/storage/bin/launch.sh".to_string(),
            storage_stop_script: "/apps/storage/bin/kill.sh".to_string(),
            proxy_port: 8102,
            proxy_admin_port: 22222,
            storage_port: 22122,
            proxy_config_path: PathBuf::from("/apps/proxy/conf/proxy.yml"),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            enabled: false,
            schedule: BackupSchedule::Day,
            hour: 12,
            persistence_file: PathBuf::from("/mnt/data/storage/appendonly.aof"),
            backup_dir: PathBuf::from("/mnt/backup"),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            enabled: false,
            date: String::new(),
            data_dir: PathBuf::from("/mnt/data/storage"),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            warm_enabled: false,
            force_warm: false,
            peers: Vec::new(),
            sync_poll_secs: 10,
            sync_max_polls: 60,
            max_bootstrap_secs: 900,
        }
    }
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        ConsistencyConfig {
            read: "DC_ONE".to_string(),
            write: "DC_ONE".to_string(),
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        IntervalConfig {
            acl_reconcile_secs: 120,
            process_monitor_secs: 15,
            proxy_stats_secs: 30,
            storage_info_secs: 60,
            config_refresh_secs: 300,
            consistency_watch_secs: 30,
        }
    }
}

impl SidecarConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `RINGSIDE_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("RINGSIDE_CLUSTER_NAME") {
            if !v.trim().is_empty() {
                self.cluster_name = v.trim().to_string();
            }
        }
        if let Some(port) = env::var("RINGSIDE_HTTP_PORT").ok().and_then(|v| v.parse().ok()) {
            self.http_port = port;
        }
        if let Ok(v) = env::var("RINGSIDE_RESTORE_DATE") {
            self.restore.date = v.trim().to_string();
        }
        if let Some(schedule) = env::var("RINGSIDE_BACKUP_SCHEDULE")
            .ok()
            .and_then(|v| BackupSchedule::from_str_tag(&v))
        {
            self.backup.schedule = schedule;
        }
        if let Ok(v) = env::var("RINGSIDE_FORCE_WARM") {
            self.bootstrap.force_warm = v.eq_ignore_ascii_case("true") || v == "1";
        }
    }

    /// Reject configurations the orchestrator cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster_name cannot be empty".to_string()));
        }
        if self.http_port == 0 {
            return Err(ConfigError::Invalid("http_port cannot be 0".to_string()));
        }
        if self.cluster.peer_port == 0 {
            return Err(ConfigError::Invalid("cluster.peer_port cannot be 0".to_string()));
        }
        if self.backup.hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "backup.hour must be below 24 (negative disables scheduled backups), got {}",
                self.backup.hour
            )));
        }
        if self.restore.enabled && parse_restore_date(&self.restore.date).is_none() {
            return Err(ConfigError::Invalid(format!(
                "restore.date must be YYYYMMDD when restore is enabled (got {:?})",
                self.restore.date
            )));
        }
        Ok(())
    }
}

/// Load config from a TOML file path, then apply environment overrides.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<SidecarConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let mut cfg = SidecarConfig::from_toml_str(&s)?;
    cfg.apply_env_overrides();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let def = SidecarConfig::default();
        assert_eq!(def.cluster.peer_port, 8101);
        assert_eq!(def.backup.schedule, BackupSchedule::Day);
        assert!(!def.restore.enabled);
        assert!(def.validate().is_err(), "empty cluster name must be rejected");
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            cluster_name = "ring-a"
            http_port = 8088

            [cluster]
            peer_port = 9101
            multi_region = true

            [backup]
            enabled = true
            schedule = "week"
            hour = 3

            [identity]
            seed = true
            seeds = ["10.0.0.1:9101:rack1:dc1:100"]
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.cluster_name, "ring-a");
        assert_eq!(cfg.cluster.peer_port, 9101);
        assert!(cfg.cluster.multi_region);
        assert_eq!(cfg.backup.schedule, BackupSchedule::Week);
        assert_eq!(cfg.backup.hour, 3);
        assert!(cfg.identity.seed);
        assert_eq!(cfg.identity.seeds.len(), 1);
        // untouched sections keep defaults
        assert_eq!(cfg.intervals.process_monitor_secs, 15);
    }

    #[test]
    fn test_unknown_schedule_is_a_parse_error() {
        let err = SidecarConfig::from_toml_str(
            "cluster_name = \"x\"\n[backup]\nschedule = \"month\"\n",
        );
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_restore_requires_valid_date() {
        let mut cfg = SidecarConfig {
            cluster_name: "ring".to_string(),
            ..SidecarConfig::default()
        };
        cfg.restore.enabled = true;
        cfg.restore.date = "notadate".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        cfg.restore.date = "20101010".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_schedule_tag() {
        assert_eq!(BackupSchedule::from_str_tag("Day"), Some(BackupSchedule::Day));
        assert_eq!(BackupSchedule::from_str_tag("week"), Some(BackupSchedule::Week));
        assert_eq!(BackupSchedule::from_str_tag("hour"), None);
    }
}
