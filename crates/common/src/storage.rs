//! Storage engine probe.
//!
//! The storage engine speaks RESP on its local port. The probe needs only a
//! handful of commands, so it carries a minimal request encoder and reply
//! parser instead of a full client:
//!
//! | Probe call       | Command                         | Interpretation                     |
//! |------------------|---------------------------------|------------------------------------|
//! | `is_alive`       | `PING`                          | `+PONG`                            |
//! | `loading_data`   | `INFO persistence`              | `loading:1` while a load runs      |
//! | `take_snapshot`  | `BGREWRITEAOF` / `BGSAVE`       | started, then polled to completion |
//! | `info`           | `INFO`                          | `key:value` lines                  |
//!
//! Warm resynchronisation additionally uses `REPLICAOF` and
//! `INFO replication` through inherent methods on [`RespStorageProbe`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::CollaboratorError;

/// Per-command I/O timeout.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls of `INFO persistence` while a background snapshot runs.
pub const SNAPSHOT_POLL_ATTEMPTS: u32 = 60;

pub const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn is_alive(&self) -> bool;

    /// `true` while the engine is still loading its data set from disk.
    async fn loading_data(&self) -> Result<bool, CollaboratorError>;

    /// Ask the engine to persist its data set. Returns `true` once the
    /// snapshot has completed successfully.
    async fn take_snapshot(&self) -> Result<bool, CollaboratorError>;

    /// Raw `INFO` key/value pairs.
    async fn info(&self) -> Result<HashMap<String, String>, CollaboratorError>;
}

// ════════════════════════════════════════════════════════════════════════════
// RESP CODEC
// ════════════════════════════════════════════════════════════════════════════

/// A single RESP reply. Arrays are not needed by any probe command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespReply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

impl RespReply {
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespReply::Simple(s) => Some(s.clone()),
            RespReply::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse one reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the reply and
/// the number of bytes consumed.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(RespReply, usize)>, CollaboratorError> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    if line_end == 0 {
        return Err(CollaboratorError::Protocol("empty reply line".to_string()));
    }
    let line = String::from_utf8_lossy(&buf[1..line_end]).into_owned();
    let header_len = line_end + 2;

    let reply = match buf[0] {
        b'+' => RespReply::Simple(line),
        b'-' => RespReply::Error(line),
        b':' => RespReply::Integer(
            line.parse()
                .map_err(|_| CollaboratorError::Protocol(format!("bad integer reply: {}", line)))?,
        ),
        b'$' => {
            let len: i64 = line
                .parse()
                .map_err(|_| CollaboratorError::Protocol(format!("bad bulk length: {}", line)))?;
            if len < 0 {
                return Ok(Some((RespReply::Bulk(None), header_len)));
            }
            let len = len as usize;
            let total = header_len + len + 2;
            if buf.len() < total {
                return Ok(None);
            }
            let body = buf[header_len..header_len + len].to_vec();
            return Ok(Some((RespReply::Bulk(Some(body)), total)));
        }
        other => {
            return Err(CollaboratorError::Protocol(format!(
                "unsupported reply type byte 0x{:02x}",
                other
            )))
        }
    };
    Ok(Some((reply, header_len)))
}

/// Parse `INFO` output into key/value pairs, skipping section headers.
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ════════════════════════════════════════════════════════════════════════════
// RESP PROBE
// ════════════════════════════════════════════════════════════════════════════

/// Which background persistence command produces the file we back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    AppendOnly,
    Rdb,
}

impl SnapshotMode {
    /// Append-only files end in `.aof`; anything else is treated as RDB.
    pub fn for_file(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("aof") => SnapshotMode::AppendOnly,
            _ => SnapshotMode::Rdb,
        }
    }

    fn command(&self) -> &'static str {
        match self {
            SnapshotMode::AppendOnly => "BGREWRITEAOF",
            SnapshotMode::Rdb => "BGSAVE",
        }
    }

    fn in_progress_key(&self) -> &'static str {
        match self {
            SnapshotMode::AppendOnly => "aof_rewrite_in_progress",
            SnapshotMode::Rdb => "rdb_bgsave_in_progress",
        }
    }

    fn status_key(&self) -> &'static str {
        match self {
            SnapshotMode::AppendOnly => "aof_last_bgrewrite_status",
            SnapshotMode::Rdb => "rdb_last_bgsave_status",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RespStorageProbe {
    addr: SocketAddr,
    mode: SnapshotMode,
}

impl RespStorageProbe {
    pub fn new(port: u16, mode: SnapshotMode) -> Self {
        RespStorageProbe {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            mode,
        }
    }

    async fn exchange(&self, args: &[&str]) -> Result<RespReply, CollaboratorError> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&encode_command(args)).await?;

        let mut buf = Vec::with_capacity(512);
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((reply, _)) = parse_reply(&buf)? {
                return Ok(reply);
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(CollaboratorError::Protocol("connection closed mid-reply".to_string()));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn command(&self, args: &[&str]) -> Result<RespReply, CollaboratorError> {
        tokio::time::timeout(COMMAND_TIMEOUT, self.exchange(args))
            .await
            .map_err(|_| CollaboratorError::Timeout(COMMAND_TIMEOUT.as_millis() as u64))?
    }

    async fn info_section(
        &self,
        section: Option<&str>,
    ) -> Result<HashMap<String, String>, CollaboratorError> {
        let reply = match section {
            Some(s) => self.command(&["INFO", s]).await?,
            None => self.command(&["INFO"]).await?,
        };
        match reply {
            RespReply::Error(e) => Err(CollaboratorError::Rejected(e)),
            other => other
                .as_text()
                .map(|t| parse_info(&t))
                .ok_or_else(|| {
                    CollaboratorError::Protocol(format!("unexpected INFO reply: {:?}", other))
                }),
        }
    }

    async fn expect_ok(&self, args: &[&str]) -> Result<(), CollaboratorError> {
        match self.command(args).await? {
            RespReply::Simple(_) => Ok(()),
            RespReply::Error(e) => Err(CollaboratorError::Rejected(e)),
            other => Err(CollaboratorError::Protocol(format!(
                "unexpected reply to {}: {:?}",
                args[0], other
            ))),
        }
    }

    /// Start replicating from a peer engine (`REPLICAOF host port`).
    pub async fn replicate_from(&self, host: &str, port: u16) -> Result<(), CollaboratorError> {
        let port = port.to_string();
        self.expect_ok(&["REPLICAOF", host, &port]).await
    }

    /// Detach from the peer and keep the replicated data (`REPLICAOF NO ONE`).
    pub async fn stop_replication(&self) -> Result<(), CollaboratorError> {
        self.expect_ok(&["REPLICAOF", "NO", "ONE"]).await
    }

    pub async fn replication_info(&self) -> Result<HashMap<String, String>, CollaboratorError> {
        self.info_section(Some("replication")).await
    }
}

#[async_trait]
impl StorageProbe for RespStorageProbe {
    async fn is_alive(&self) -> bool {
        matches!(self.command(&["PING"]).await, Ok(RespReply::Simple(ref s)) if s == "PONG")
    }

    async fn loading_data(&self) -> Result<bool, CollaboratorError> {
        let info = self.info_section(Some("persistence")).await?;
        Ok(info.get("loading").map(|v| v == "1").unwrap_or(false))
    }

    async fn take_snapshot(&self) -> Result<bool, CollaboratorError> {
        match self.command(&[self.mode.command()]).await? {
            RespReply::Simple(msg) => debug!(reply = %msg, "snapshot started"),
            RespReply::Error(e) => {
                warn!(error = %e, "storage engine refused snapshot");
                return Ok(false);
            }
            other => {
                return Err(CollaboratorError::Protocol(format!(
                    "unexpected snapshot reply: {:?}",
                    other
                )))
            }
        }

        for _ in 0..SNAPSHOT_POLL_ATTEMPTS {
            tokio::time::sleep(SNAPSHOT_POLL_INTERVAL).await;
            let info = self.info_section(Some("persistence")).await?;
            if info.get(self.mode.in_progress_key()).map(|v| v == "0").unwrap_or(false) {
                return Ok(info.get(self.mode.status_key()).map(|v| v == "ok").unwrap_or(false));
            }
        }
        warn!("snapshot still in progress after {} polls", SNAPSHOT_POLL_ATTEMPTS);
        Ok(false)
    }

    async fn info(&self) -> Result<HashMap<String, String>, CollaboratorError> {
        self.info_section(None).await
    }
}
