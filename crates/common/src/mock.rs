//! Recording doubles for every collaborator trait.
//!
//! Each mock counts calls, returns configurable results, and can share a
//! [`CallLog`] with the others so tests can assert cross-collaborator
//! ordering (e.g. storage started before proxy).
//!
//! ```ignore
//! let log = CallLog::new();
//! let storage = MockProcess::new(ProcessKind::Storage).with_log(&log);
//! let proxy = MockProcess::new(ProcessKind::Proxy).with_log(&log);
//! // ... run something ...
//! assert_eq!(log.entries(), vec!["storage.start", "proxy.start"]);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::backup::{Backup, Restore};
use crate::error::CollaboratorError;
use crate::membership::{InMemoryAcl, Instance, Membership, MembershipDirectory};
use crate::process::{ProcessControl, ProcessKind};
use crate::proxy::{
    ConfigWriter, ConsistencyKind, ConsistencyLevels, ConsistencySource, ProxyAdmin, ProxyState,
};
use crate::storage::StorageProbe;

/// Ordered record of collaborator calls shared between mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

fn injected(what: &str) -> CollaboratorError {
    CollaboratorError::Rejected(format!("injected failure: {}", what))
}

// ════════════════════════════════════════════════════════════════════════════
// PROCESS
// ════════════════════════════════════════════════════════════════════════════

/// Process whose liveness follows start / stop calls.
#[derive(Debug)]
pub struct MockProcess {
    kind: ProcessKind,
    alive: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    log: CallLog,
}

impl MockProcess {
    pub fn new(kind: ProcessKind) -> Self {
        MockProcess {
            kind,
            alive: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
            log: CallLog::new(),
        }
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for MockProcess {
    async fn start(&self) -> Result<(), CollaboratorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}.start", self.kind));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(injected("start"));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}.stop", self.kind));
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STORAGE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct MockStorage {
    alive: AtomicBool,
    loading: AtomicBool,
    snapshot_result: AtomicBool,
    snapshots: AtomicU64,
    info: Mutex<HashMap<String, String>>,
    log: CallLog,
}

impl Default for MockStorage {
    fn default() -> Self {
        MockStorage {
            alive: AtomicBool::new(true),
            loading: AtomicBool::new(false),
            snapshot_result: AtomicBool::new(true),
            snapshots: AtomicU64::new(0),
            info: Mutex::new(HashMap::new()),
            log: CallLog::new(),
        }
    }
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }

    pub fn set_snapshot_result(&self, ok: bool) {
        self.snapshot_result.store(ok, Ordering::SeqCst);
    }

    pub fn set_info(&self, key: &str, value: &str) {
        self.info.lock().insert(key.to_string(), value.to_string());
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProbe for MockStorage {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn loading_data(&self) -> Result<bool, CollaboratorError> {
        self.log.push("storage.loading_data");
        Ok(self.loading.load(Ordering::SeqCst))
    }

    async fn take_snapshot(&self) -> Result<bool, CollaboratorError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.log.push("storage.snapshot");
        Ok(self.snapshot_result.load(Ordering::SeqCst))
    }

    async fn info(&self) -> Result<HashMap<String, String>, CollaboratorError> {
        Ok(self.info.lock().clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BACKUP / RESTORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct MockBackup {
    result: AtomicBool,
    fail: AtomicBool,
    uploads: Mutex<Vec<(PathBuf, DateTime<Utc>)>>,
    log: CallLog,
}

impl Default for MockBackup {
    fn default() -> Self {
        MockBackup {
            result: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            uploads: Mutex::new(Vec::new()),
            log: CallLog::new(),
        }
    }
}

impl MockBackup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_result(&self, ok: bool) {
        self.result.store(ok, Ordering::SeqCst);
    }

    /// Make `upload` return an error instead of a result.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(PathBuf, DateTime<Utc>)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl Backup for MockBackup {
    async fn upload(&self, file: &Path, day: DateTime<Utc>) -> Result<bool, CollaboratorError> {
        self.uploads.lock().push((file.to_path_buf(), day));
        self.log.push("backup.upload");
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("upload"));
        }
        Ok(self.result.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
pub struct MockRestore {
    result: AtomicBool,
    dates: Mutex<Vec<String>>,
    log: CallLog,
}

impl Default for MockRestore {
    fn default() -> Self {
        MockRestore {
            result: AtomicBool::new(true),
            dates: Mutex::new(Vec::new()),
            log: CallLog::new(),
        }
    }
}

impl MockRestore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_result(&self, ok: bool) {
        self.result.store(ok, Ordering::SeqCst);
    }

    pub fn dates(&self) -> Vec<String> {
        self.dates.lock().clone()
    }
}

#[async_trait]
impl Restore for MockRestore {
    async fn restore_data(&self, date: &str) -> Result<bool, CollaboratorError> {
        self.dates.lock().push(date.to_string());
        self.log.push("restore.restore_data");
        Ok(self.result.load(Ordering::SeqCst))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MEMBERSHIP
// ════════════════════════════════════════════════════════════════════════════

/// ACL store that counts batch calls on top of [`InMemoryAcl`].
#[derive(Debug, Default)]
pub struct MockMembership {
    acl: InMemoryAcl,
    add_calls: Mutex<Vec<Vec<String>>>,
    remove_calls: Mutex<Vec<Vec<String>>>,
    fail_list: AtomicBool,
    log: CallLog,
}

impl MockMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ranges<I, S>(port_from: u16, port_to: u16, ranges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockMembership {
            acl: InMemoryAcl::with_ranges(port_from, port_to, ranges),
            ..Self::default()
        }
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn add_calls(&self) -> Vec<Vec<String>> {
        self.add_calls.lock().clone()
    }

    pub fn remove_calls(&self) -> Vec<Vec<String>> {
        self.remove_calls.lock().clone()
    }

    pub fn ranges(&self, port_from: u16, port_to: u16) -> BTreeSet<String> {
        self.acl.snapshot(port_from, port_to)
    }
}

#[async_trait]
impl Membership for MockMembership {
    async fn list_acl(
        &self,
        port_from: u16,
        port_to: u16,
    ) -> Result<BTreeSet<String>, CollaboratorError> {
        self.log.push("membership.list_acl");
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("list_acl"));
        }
        self.acl.list_acl(port_from, port_to).await
    }

    async fn add_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError> {
        self.add_calls.lock().push(ranges.to_vec());
        self.log.push("membership.add_acl");
        self.acl.add_acl(ranges, port_from, port_to).await
    }

    async fn remove_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError> {
        self.remove_calls.lock().push(ranges.to_vec());
        self.log.push("membership.remove_acl");
        self.acl.remove_acl(ranges, port_from, port_to).await
    }
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    instances: Mutex<Vec<Instance>>,
    fail: AtomicBool,
}

impl MockDirectory {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockDirectory {
            instances: Mutex::new(hosts.into_iter().map(Instance::new).collect()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_hosts<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.instances.lock() = hosts.into_iter().map(Instance::new).collect();
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipDirectory for MockDirectory {
    async fn get_all_instances(
        &self,
        _cluster_name: &str,
    ) -> Result<Vec<Instance>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("get_all_instances"));
        }
        Ok(self.instances.lock().clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROXY
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MockProxyAdmin {
    states: Mutex<Vec<ProxyState>>,
    consistency: Mutex<Vec<(ConsistencyKind, String)>>,
    stats: Mutex<serde_json::Value>,
    log: CallLog,
}

impl MockProxyAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_stats(&self, stats: serde_json::Value) {
        *self.stats.lock() = stats;
    }

    pub fn states(&self) -> Vec<ProxyState> {
        self.states.lock().clone()
    }

    pub fn consistency_calls(&self) -> Vec<(ConsistencyKind, String)> {
        self.consistency.lock().clone()
    }
}

#[async_trait]
impl ProxyAdmin for MockProxyAdmin {
    async fn set_state(&self, state: ProxyState) -> Result<(), CollaboratorError> {
        self.states.lock().push(state);
        self.log.push(format!("proxy.state.{}", state.as_str()));
        Ok(())
    }

    async fn set_consistency(
        &self,
        kind: ConsistencyKind,
        level: &str,
    ) -> Result<(), CollaboratorError> {
        self.consistency.lock().push((kind, level.to_string()));
        self.log.push(format!("proxy.consistency.{}", kind.as_str()));
        Ok(())
    }

    async fn stats(&self) -> Result<serde_json::Value, CollaboratorError> {
        Ok(self.stats.lock().clone())
    }
}

#[derive(Debug, Default)]
pub struct MockConfigWriter {
    writes: AtomicU64,
    fail: AtomicBool,
    log: CallLog,
}

impl MockConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigWriter for MockConfigWriter {
    async fn write_config(&self) -> Result<(), CollaboratorError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.log.push("config.write");
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("write_config"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockConsistencySource {
    levels: Mutex<ConsistencyLevels>,
}

impl MockConsistencySource {
    pub fn new(read: &str, write: &str) -> Self {
        MockConsistencySource {
            levels: Mutex::new(ConsistencyLevels {
                read: read.to_string(),
                write: write.to_string(),
            }),
        }
    }

    pub fn set(&self, read: &str, write: &str) {
        *self.levels.lock() = ConsistencyLevels {
            read: read.to_string(),
            write: write.to_string(),
        };
    }
}

#[async_trait]
impl ConsistencySource for MockConsistencySource {
    async fn current(&self) -> Result<ConsistencyLevels, CollaboratorError> {
        Ok(self.levels.lock().clone())
    }
}
