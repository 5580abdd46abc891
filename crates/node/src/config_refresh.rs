//! Periodic proxy configuration rewrite, so a manual restart of the proxy
//! picks up current tokens and seeds.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ringside_common::proxy::ConfigWriter;

use crate::job::Job;

pub const JOB_NAME: &str = "config-refresh";

pub struct ConfigRefreshJob {
    writer: Arc<dyn ConfigWriter>,
}

impl ConfigRefreshJob {
    pub fn new(writer: Arc<dyn ConfigWriter>) -> Self {
        ConfigRefreshJob { writer }
    }
}

#[async_trait]
impl Job for ConfigRefreshJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.writer.write_config().await.context("rewriting proxy configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringside_common::mock::MockConfigWriter;

    #[tokio::test]
    async fn test_rewrites_and_surfaces_failure() {
        let writer = Arc::new(MockConfigWriter::new());
        let job = ConfigRefreshJob::new(writer.clone());
        job.execute().await.unwrap();

        writer.set_fail(true);
        assert!(job.execute().await.is_err());
        assert_eq!(writer.writes(), 2);
    }
}
