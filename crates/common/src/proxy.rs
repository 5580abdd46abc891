//! Proxy admin endpoint, proxy configuration rendering, and the source of
//! live consistency settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{self, SidecarConfig};
use crate::error::CollaboratorError;
use crate::identity::Identity;

/// Timeout for admin HTTP calls.
pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Operating state the proxy can be switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Normal,
    Standby,
    WritesOnly,
}

impl ProxyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyState::Normal => "normal",
            ProxyState::Standby => "standby",
            ProxyState::WritesOnly => "writes_only",
        }
    }
}

/// Which side of the consistency pair a setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyKind {
    Read,
    Write,
}

impl ConsistencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyKind::Read => "read",
            ConsistencyKind::Write => "write",
        }
    }
}

#[async_trait]
pub trait ProxyAdmin: Send + Sync {
    async fn set_state(&self, state: ProxyState) -> Result<(), CollaboratorError>;

    async fn set_consistency(
        &self,
        kind: ConsistencyKind,
        level: &str,
    ) -> Result<(), CollaboratorError>;

    /// Raw stats document served by the admin port.
    async fn stats(&self) -> Result<serde_json::Value, CollaboratorError>;
}

/// [`ProxyAdmin`] over the proxy's local admin HTTP port.
#[derive(Debug, Clone)]
pub struct HttpProxyAdmin {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProxyAdmin {
    pub fn new(admin_port: u16) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder().timeout(ADMIN_TIMEOUT).build()?;
        Ok(HttpProxyAdmin {
            client,
            base_url: format!("http://127.0.0.1:{}", admin_port),
        })
    }

    async fn get_ok(&self, path: &str) -> Result<(), CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "proxy admin call");
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Rejected(format!("{} returned HTTP {}", path, resp.status())))
        }
    }
}

#[async_trait]
impl ProxyAdmin for HttpProxyAdmin {
    async fn set_state(&self, state: ProxyState) -> Result<(), CollaboratorError> {
        self.get_ok(&format!("/state/{}", state.as_str())).await
    }

    async fn set_consistency(
        &self,
        kind: ConsistencyKind,
        level: &str,
    ) -> Result<(), CollaboratorError> {
        self.get_ok(&format!("/set_consistency/{}/{}", kind.as_str(), level)).await
    }

    async fn stats(&self) -> Result<serde_json::Value, CollaboratorError> {
        let resp = self.client.get(format!("{}/info", self.base_url)).send().await?;
        if !resp.status().is_success() {
            return Err(CollaboratorError::Rejected(format!(
                "stats returned HTTP {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONFIG WRITER
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait ConfigWriter: Send + Sync {
    /// Regenerate the proxy configuration file from current config, token
    /// and seed list.
    async fn write_config(&self) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ProxyPool {
    pub listen: String,
    pub dyn_listen: String,
    pub stats_listen: String,
    pub dyn_seeds: Vec<String>,
    pub tokens: String,
    pub servers: Vec<String>,
    pub read_consistency: String,
    pub write_consistency: String,
    pub data_store: u8,
}

/// Renders the proxy YAML and writes it atomically.
pub struct ProxyConfigWriter {
    cluster_name: String,
    cfg: config::ProcessConfig,
    peer_port: u16,
    consistency: config::ConsistencyConfig,
    identity: Arc<dyn Identity>,
}

impl ProxyConfigWriter {
    pub fn new(cfg: &SidecarConfig, identity: Arc<dyn Identity>) -> Self {
        ProxyConfigWriter {
            cluster_name: cfg.cluster_name.clone(),
            cfg: cfg.processes.clone(),
            peer_port: cfg.cluster.peer_port,
            consistency: cfg.consistency.clone(),
            identity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.cfg.proxy_config_path
    }

    pub fn pool(&self) -> ProxyPool {
        ProxyPool {
            listen: format!("0.0.0.0:{}", self.cfg.proxy_port),
            dyn_listen: format!("0.0.0.0:{}", self.peer_port),
            stats_listen: format!("0.0.0.0:{}", self.cfg.proxy_admin_port),
            dyn_seeds: self.identity.seeds(),
            tokens: self.identity.token(),
            servers: vec![format!("127.0.0.1:{}:1", self.cfg.storage_port)],
            read_consistency: self.consistency.read.clone(),
            write_consistency: self.consistency.write.clone(),
            data_store: 0,
        }
    }

    pub fn render(&self) -> Result<String, CollaboratorError> {
        let mut doc = BTreeMap::new();
        doc.insert(self.cluster_name.clone(), self.pool());
        serde_yaml::to_string(&doc).map_err(|e| CollaboratorError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl ConfigWriter for ProxyConfigWriter {
    async fn write_config(&self) -> Result<(), CollaboratorError> {
        let rendered = self.render()?;
        let path = self.path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp: PathBuf = path.with_extension("yml.tmp");
        tokio::fs::write(&tmp, rendered.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "proxy configuration written");
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONSISTENCY SOURCE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyLevels {
    pub read: String,
    pub write: String,
}

/// Provider of the consistency levels operators want right now.
#[async_trait]
pub trait ConsistencySource: Send + Sync {
    async fn current(&self) -> Result<ConsistencyLevels, CollaboratorError>;
}

/// Re-reads the sidecar config file on every poll.
#[derive(Debug, Clone)]
pub struct FileConsistencySource {
    path: PathBuf,
}

impl FileConsistencySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConsistencySource { path: path.into() }
    }
}

#[async_trait]
impl ConsistencySource for FileConsistencySource {
    async fn current(&self) -> Result<ConsistencyLevels, CollaboratorError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let cfg = SidecarConfig::from_toml_str(&text)
            .map_err(|e| CollaboratorError::Protocol(e.to_string()))?;
        Ok(ConsistencyLevels {
            read: cfg.consistency.read,
            write: cfg.consistency.write,
        })
    }
}
