//! Error types shared by the collaborator adapters.
//!
//! Collaborator failures are never handled at this layer. They travel up
//! into the job that made the call, where the scheduler records them as a
//! job error. The only exception is malformed input (an unparseable restore
//! date, for example), which adapters log and surface as a `false` return.

use thiserror::Error;

/// Failure raised by an external collaborator (process scripts, storage
/// engine, ACL backend, backup destination, proxy admin port).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Local I/O failure (file copy, socket, script spawn).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote side answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The call did not complete within the collaborator's own timeout.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// HTTP transport failure talking to an admin endpoint.
    #[error("http error: {0}")]
    Http(String),

    /// A launch script exited with a non-zero status.
    #[error("script `{script}` exited with status {status}")]
    Script { script: String, status: i32 },
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        CollaboratorError::Http(e.to_string())
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
