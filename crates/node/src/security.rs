//! Peer-port ACL reconciliation.
//!
//! Desired set: one `{host_ip}/32` range per instance registered under the
//! cluster name. Actual set: the ACL ranges currently open on the peer port.
//!
//! ```text
//!   to_add    = desired − actual   ──▶ one add_acl batch
//!   to_remove = actual − desired   ──▶ one remove_acl batch
//! ```
//!
//! Collaborator failures propagate to the job wrapper. A partially applied
//! diff converges on the next run, which recomputes it from scratch.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ringside_common::membership::{Membership, MembershipDirectory};
use tracing::{debug, info};

use crate::job::Job;

pub const JOB_NAME: &str = "security-reconciler";

pub struct SecurityReconciler {
    cluster_name: String,
    peer_port: u16,
    directory: Arc<dyn MembershipDirectory>,
    membership: Arc<dyn Membership>,
}

impl SecurityReconciler {
    pub fn new(
        cluster_name: impl Into<String>,
        peer_port: u16,
        directory: Arc<dyn MembershipDirectory>,
        membership: Arc<dyn Membership>,
    ) -> Self {
        SecurityReconciler {
            cluster_name: cluster_name.into(),
            peer_port,
            directory,
            membership,
        }
    }

    /// Converge the peer-port ACL with current membership.
    ///
    /// Returns `true` when at least one add or remove batch was issued.
    pub async fn reconcile(&self) -> anyhow::Result<bool> {
        let port = self.peer_port;
        let instances = self
            .directory
            .get_all_instances(&self.cluster_name)
            .await
            .with_context(|| format!("listing instances of {}", self.cluster_name))?;
        let desired: BTreeSet<String> = instances.iter().map(|i| i.acl_range()).collect();
        let actual = self
            .membership
            .list_acl(port, port)
            .await
            .context("listing peer-port ACL")?;

        let to_add: Vec<String> = desired.difference(&actual).cloned().collect();
        let to_remove: Vec<String> = actual.difference(&desired).cloned().collect();

        if !to_add.is_empty() {
            self.membership
                .add_acl(&to_add, port, port)
                .await
                .context("adding ACL ranges")?;
            info!(ranges = ?to_add, port, "ACL ranges added");
        }
        if !to_remove.is_empty() {
            self.membership
                .remove_acl(&to_remove, port, port)
                .await
                .context("removing ACL ranges")?;
            info!(ranges = ?to_remove, port, "ACL ranges removed");
        }

        let changed = !to_add.is_empty() || !to_remove.is_empty();
        if !changed {
            debug!(port, ranges = desired.len(), "ACL already converged");
        }
        Ok(changed)
    }
}

#[async_trait]
impl Job for SecurityReconciler {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.reconcile().await.map(|_| ())
    }
}
