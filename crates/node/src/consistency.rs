//! Live read/write consistency reconfiguration.
//!
//! A polling watcher: each run reads the wanted levels from a
//! [`ConsistencySource`], compares them with what was last pushed to the
//! proxy, and calls the admin endpoint only for the side that changed.
//! The first run pushes both sides.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use ringside_common::proxy::{ConsistencyKind, ConsistencyLevels, ConsistencySource, ProxyAdmin};
use tracing::info;

use crate::job::Job;

pub const JOB_NAME: &str = "consistency-watcher";

pub struct ConsistencyWatcher {
    source: Arc<dyn ConsistencySource>,
    admin: Arc<dyn ProxyAdmin>,
    applied: Mutex<Option<ConsistencyLevels>>,
}

impl ConsistencyWatcher {
    pub fn new(source: Arc<dyn ConsistencySource>, admin: Arc<dyn ProxyAdmin>) -> Self {
        ConsistencyWatcher {
            source,
            admin,
            applied: Mutex::new(None),
        }
    }

    pub fn applied(&self) -> Option<ConsistencyLevels> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl Job for ConsistencyWatcher {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let wanted = self.source.current().await.context("reading consistency levels")?;
        let previous = self.applied();

        if previous.as_ref().map(|p| p.read != wanted.read).unwrap_or(true) {
            self.admin
                .set_consistency(ConsistencyKind::Read, &wanted.read)
                .await
                .context("setting read consistency")?;
            info!(level = %wanted.read, "read consistency applied");
        }
        if previous.as_ref().map(|p| p.write != wanted.write).unwrap_or(true) {
            self.admin
                .set_consistency(ConsistencyKind::Write, &wanted.write)
                .await
                .context("setting write consistency")?;
            info!(level = %wanted.write, "write consistency applied");
        }

        // Only record once both calls went through, so a failure is retried.
        *self.applied.lock() = Some(wanted);
        Ok(())
    }
}
