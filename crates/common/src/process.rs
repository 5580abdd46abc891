//! Process control for the storage engine and the proxy.
//!
//! Launching is delegated to operator-provided scripts. Liveness is a TCP
//! connect to the process port, which is what clients would observe.

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;

/// Timeout for a single liveness connect.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Which managed process a handle controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Storage,
    Proxy,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Storage => "storage",
            ProcessKind::Proxy => "proxy",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn start(&self) -> Result<(), CollaboratorError>;

    async fn stop(&self) -> Result<(), CollaboratorError>;

    async fn is_alive(&self) -> bool;
}

/// [`ProcessControl`] backed by launch / kill scripts.
#[derive(Debug, Clone)]
pub struct ScriptProcess {
    kind: ProcessKind,
    start_script: String,
    stop_script: String,
    addr: SocketAddr,
}

impl ScriptProcess {
    pub fn new(
        kind: ProcessKind,
        start_script: impl Into<String>,
        stop_script: impl Into<String>,
        port: u16,
    ) -> Self {
        ScriptProcess {
            kind,
            start_script: start_script.into(),
            stop_script: stop_script.into(),
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    async fn run_script(&self, script: &str) -> Result<(), CollaboratorError> {
        debug!(process = %self.kind, script, "running script");
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(CollaboratorError::Script {
                script: script.to_string(),
                status: status.code().unwrap_or(-1),
            })
        }
    }
}

#[async_trait]
impl ProcessControl for ScriptProcess {
    async fn start(&self) -> Result<(), CollaboratorError> {
        info!(process = %self.kind, "starting process");
        self.run_script(&self.start_script).await
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        info!(process = %self.kind, "stopping process");
        self.run_script(&self.stop_script).await
    }

    async fn is_alive(&self) -> bool {
        match tokio::time::timeout(LIVENESS_TIMEOUT, TcpStream::connect(self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(process = %self.kind, error = %e, "liveness connect refused");
                false
            }
            Err(_) => {
                warn!(process = %self.kind, "liveness connect timed out");
                false
            }
        }
    }
}
