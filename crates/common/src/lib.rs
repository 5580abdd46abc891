//! # Ringside Common Crate
//!
//! Configuration, error types, and the collaborator seams the node sidecar
//! drives: process control, storage probing, ACL membership, backup and
//! restore, proxy admin, and node identity.
//!
//! ## Modules
//! - `config`: TOML configuration with env overrides
//! - `error`: `CollaboratorError`, `ConfigError`
//! - `process`: `ProcessControl` + script-backed implementation
//! - `storage`: `StorageProbe` + RESP client
//! - `membership`: `Membership` / `MembershipDirectory` + in-memory backends
//! - `backup`: `Backup` / `Restore` + local filesystem backends
//! - `proxy`: `ProxyAdmin`, `ConfigWriter`, `ConsistencySource`
//! - `identity`: `Identity` + static implementation
//! - `mock`: recording doubles for tests
//!
//! ## Collaborator Layout
//! ```text
//!                ┌──────────────────┐
//!                │  ringside_node   │  jobs, scheduler, orchestrator
//!                └────────┬─────────┘
//!                         │ Arc<dyn Trait>
//!   ┌──────────┬──────────┼──────────┬───────────┬──────────┐
//!   │          │          │          │           │          │
//! ┌─▼──────┐ ┌─▼──────┐ ┌─▼──────┐ ┌─▼───────┐ ┌─▼──────┐ ┌─▼──────┐
//! │Process │ │Storage │ │Member- │ │Backup / │ │Proxy   │ │Identity│
//! │Control │ │Probe   │ │ship    │ │Restore  │ │Admin   │ │        │
//! └────────┘ └────────┘ └────────┘ └─────────┘ └────────┘ └────────┘
//! ```

pub mod backup;
pub mod config;
pub mod error;
pub mod identity;
pub mod membership;
pub mod mock;
pub mod process;
pub mod proxy;
pub mod storage;

pub use backup::{parse_restore_date, Backup, LocalBackup, LocalRestore, Restore};
pub use config::{BackupSchedule, SidecarConfig};
pub use error::{CollaboratorError, ConfigError};
pub use identity::{Identity, StaticIdentity};
pub use membership::{InMemoryAcl, Instance, Membership, MembershipDirectory, StaticDirectory};
pub use process::{ProcessControl, ProcessKind, ScriptProcess};
pub use proxy::{
    ConfigWriter, ConsistencyKind, ConsistencyLevels, ConsistencySource, FileConsistencySource,
    HttpProxyAdmin, ProxyAdmin, ProxyConfigWriter, ProxyState,
};
pub use storage::{RespStorageProbe, SnapshotMode, StorageProbe};
