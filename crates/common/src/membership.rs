//! Cluster membership and peer-port ACL interfaces.
//!
//! ```text
//! MembershipDirectory ──▶ desired = { hostIP/32 for every registered instance }
//! Membership          ──▶ actual  = ACL ranges currently open on the peer port
//! ```
//!
//! The reconciler in the node crate diffs the two sets. Both traits are
//! async and object-safe so cloud backends can be plugged in without
//! touching the orchestration logic.

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CollaboratorError;

/// One registered instance of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub host_ip: String,
}

impl Instance {
    pub fn new(host_ip: impl Into<String>) -> Self {
        Instance { host_ip: host_ip.into() }
    }

    /// Single-host CIDR range admitting this instance.
    pub fn acl_range(&self) -> String {
        format!("{}/32", self.host_ip)
    }
}

/// Network ACL backend for the peer-to-peer port range.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn list_acl(
        &self,
        port_from: u16,
        port_to: u16,
    ) -> Result<BTreeSet<String>, CollaboratorError>;

    async fn add_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError>;

    async fn remove_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError>;
}

/// Registry of instances registered under a cluster name.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn get_all_instances(
        &self,
        cluster_name: &str,
    ) -> Result<Vec<Instance>, CollaboratorError>;
}

// ════════════════════════════════════════════════════════════════════════════
// IN-PROCESS IMPLEMENTATIONS
// ════════════════════════════════════════════════════════════════════════════

/// ACL set kept in memory, one range set per port span.
///
/// Used by standalone deployments where the peer port is not fronted by a
/// cloud firewall, and as the backing store of the recording mock.
#[derive(Debug, Default)]
pub struct InMemoryAcl {
    rules: RwLock<Vec<((u16, u16), BTreeSet<String>)>>,
}

impl InMemoryAcl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the rule set for a port span.
    pub fn with_ranges<I, S>(port_from: u16, port_to: u16, ranges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let acl = Self::new();
        acl.rules.write().push((
            (port_from, port_to),
            ranges.into_iter().map(Into::into).collect(),
        ));
        acl
    }

    pub fn snapshot(&self, port_from: u16, port_to: u16) -> BTreeSet<String> {
        self.rules
            .read()
            .iter()
            .find(|(span, _)| *span == (port_from, port_to))
            .map(|(_, set)| set.clone())
            .unwrap_or_default()
    }

    fn update<F: FnOnce(&mut BTreeSet<String>)>(&self, port_from: u16, port_to: u16, f: F) {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|(span, _)| *span == (port_from, port_to)) {
            Some((_, set)) => f(set),
            None => {
                let mut set = BTreeSet::new();
                f(&mut set);
                rules.push(((port_from, port_to), set));
            }
        }
    }
}

#[async_trait]
impl Membership for InMemoryAcl {
    async fn list_acl(
        &self,
        port_from: u16,
        port_to: u16,
    ) -> Result<BTreeSet<String>, CollaboratorError> {
        Ok(self.snapshot(port_from, port_to))
    }

    async fn add_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError> {
        self.update(port_from, port_to, |set| set.extend(ranges.iter().cloned()));
        Ok(())
    }

    async fn remove_acl(
        &self,
        ranges: &[String],
        port_from: u16,
        port_to: u16,
    ) -> Result<(), CollaboratorError> {
        self.update(port_from, port_to, |set| {
            for r in ranges {
                set.remove(r);
            }
        });
        Ok(())
    }
}

/// Directory returning a fixed host list regardless of cluster name.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    instances: Vec<Instance>,
}

impl StaticDirectory {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticDirectory {
            instances: hosts.into_iter().map(Instance::new).collect(),
        }
    }
}

#[async_trait]
impl MembershipDirectory for StaticDirectory {
    async fn get_all_instances(
        &self,
        _cluster_name: &str,
    ) -> Result<Vec<Instance>, CollaboratorError> {
        Ok(self.instances.clone())
    }
}
