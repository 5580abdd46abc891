//! # Ringside Node Crate
//!
//! Per-node sidecar for a token-ring datastore: decides how the local
//! storage engine and proxy come up, then keeps them supervised, backed
//! up, and reachable by peers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                               │
//! │   out-of-service? ─▶ restore | warm bootstrap | cold start           │
//! └──────────────┬───────────────────────────────────────────┬───────────┘
//!                │ register / run_now                        │ state
//!                ▼                                           ▼
//! ┌──────────────────────────────┐              ┌─────────────────────────┐
//! │          Scheduler           │              │        NodeState        │
//! │  JobHandle (single-flight)   │─── jobs ────▶│  alive flags, backup /  │
//! │  Interval │ Calendar │ OnDemand             │  restore / bootstrap    │
//! └──────────────┬───────────────┘              └────────────┬────────────┘
//!                │                                           │
//!    ┌───────────┼───────────┬──────────────┐                │
//!    ▼           ▼           ▼              ▼                ▼
//! ┌────────┐ ┌────────┐ ┌──────────┐ ┌────────────┐   ┌─────────────┐
//! │Security│ │Backup /│ │ Process  │ │ Metrics /  │   │ HTTP status │
//! │Reconc. │ │Restore │ │ monitors │ │ config /   │   │ + admin     │
//! │        │ │ / Warm │ │ commands │ │ consistency│   │ (axum)      │
//! └────────┘ └────────┘ └──────────┘ └────────────┘   └─────────────┘
//! ```
//!
//! # Job Model
//!
//! Every unit of work implements [`Job`]. A [`JobHandle`] wraps it with a
//! state machine (`idle → running → done | error`) and drops a fire that
//! arrives while the previous one is still running. Failures and panics
//! are caught, logged, and counted; they never reach the scheduler.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `job` | `Job`, `JobHandle`, `JobState` |
//! | `schedule` | `Schedule` and next-fire computation |
//! | `scheduler` | `Scheduler`, `JobSnapshot` |
//! | `node_state` | `NodeState`, `NodeStatus`, `BootstrapOutcome` |
//! | `security` | peer-port ACL reconciliation |
//! | `backup_job` / `restore_job` | persistence file upload and restore |
//! | `warm_bootstrap` | resync from peers before serving |
//! | `process_jobs` | proxy reset, monitors, admin start/stop, snapshot |
//! | `metrics` | gauges + Prometheus export |
//! | `config_refresh` / `consistency` | proxy config upkeep |
//! | `orchestrator` | startup sequence |
//! | `handlers` | axum router |

pub mod backup_job;
pub mod config_refresh;
pub mod consistency;
pub mod handlers;
pub mod job;
pub mod metrics;
pub mod node_state;
pub mod orchestrator;
pub mod process_jobs;
pub mod restore_job;
pub mod schedule;
pub mod scheduler;
pub mod security;
pub mod warm_bootstrap;

pub use backup_job::BackupJob;
pub use config_refresh::ConfigRefreshJob;
pub use consistency::ConsistencyWatcher;
pub use handlers::{build_router, AppState};
pub use job::{FireOutcome, Job, JobHandle, JobState, JobStats};
pub use metrics::{MetricsRegistry, ProxyStatsJob, StorageInfoJob};
pub use node_state::{BootstrapOutcome, NodeState, NodeStatus, SubsystemStatus};
pub use orchestrator::{BootPath, Collaborators, Orchestrator, OrchestratorError};
pub use process_jobs::{
    ProcessAction, ProcessCommandJob, ProcessMonitorJob, ProxyResetJob, SnapshotJob,
};
pub use restore_job::RestoreJob;
pub use schedule::Schedule;
pub use scheduler::{JobSnapshot, Scheduler, SchedulerError};
pub use security::SecurityReconciler;
pub use warm_bootstrap::{PeerSync, ReplicaPeerSync, WarmBootstrapJob};
