//! Job abstraction and the single-flight execution wrapper.
//!
//! A [`Job`] is a named body of work. The scheduler never calls it
//! directly; every fire goes through a [`JobHandle`], which owns:
//!
//! - the single-flight guard (a fire while `Running` is dropped),
//! - the execution and error counters (monotonic, never reset),
//! - the catch-all that turns both `Err` and panics into a recorded error.
//!
//! ## State Machine
//!
//! ```text
//!   Idle ──fire──▶ Running ──Ok──▶ Done
//!                     ▲   └──Err/panic──▶ Error
//!                     │                     │
//!                     └──────fire───────────┘ (from Done or Error)
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

/// A named unit of recurring or one-shot work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Done,
    Error,
}

/// What happened to one fire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    /// Dropped because the job was already running.
    Skipped,
}

/// Counters and state of one job at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub name: String,
    pub state: JobState,
    pub executions: u64,
    pub errors: u64,
}

/// Single-flight wrapper around a [`Job`].
pub struct JobHandle {
    job: Arc<dyn Job>,
    state: Mutex<JobState>,
    executions: AtomicU64,
    errors: AtomicU64,
}

impl JobHandle {
    pub fn new(job: Arc<dyn Job>) -> Self {
        JobHandle {
            job,
            state: Mutex::new(JobState::Idle),
            executions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            name: self.name().to_string(),
            state: self.state(),
            executions: self.executions(),
            errors: self.errors(),
        }
    }

    /// Run the job body once unless it is already running.
    ///
    /// Never returns an error and never unwinds: failures of the body are
    /// counted, logged and folded into [`FireOutcome::Failed`].
    pub async fn fire(&self) -> FireOutcome {
        {
            let mut state = self.state.lock();
            if *state == JobState::Running {
                debug!(job = self.name(), "still running, fire dropped");
                return FireOutcome::Skipped;
            }
            *state = JobState::Running;
        }
        self.executions.fetch_add(1, Ordering::SeqCst);

        let result = AssertUnwindSafe(self.job.execute()).catch_unwind().await;
        let (next, outcome) = match result {
            Ok(Ok(())) => (JobState::Done, FireOutcome::Completed),
            Ok(Err(e)) => {
                error!(job = self.name(), error = %format!("{:#}", e), "job failed");
                (JobState::Error, FireOutcome::Failed)
            }
            Err(panic) => {
                error!(job = self.name(), panic = %panic_message(&panic), "job panicked");
                (JobState::Error, FireOutcome::Failed)
            }
        };
        if next == JobState::Error {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        *self.state.lock() = next;
        outcome
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("executions", &self.executions())
            .field("errors", &self.errors())
            .finish()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_jobs {
    use super::*;
    use tokio::sync::Notify;

    /// Job that waits on a gate before finishing, so tests can hold it in
    /// `Running`.
    pub struct GatedJob {
        pub name: String,
        pub entered: Arc<Notify>,
        pub gate: Arc<Notify>,
        pub runs: AtomicU64,
    }

    impl GatedJob {
        pub fn new(name: &str) -> Self {
            GatedJob {
                name: name.to_string(),
                entered: Arc::new(Notify::new()),
                gate: Arc::new(Notify::new()),
                runs: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Job for GatedJob {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(())
        }
    }

    /// Job whose body is a fixed behaviour.
    pub enum FixedJob {
        Ok(&'static str, AtomicU64),
        Fail(&'static str),
        Panic(&'static str),
    }

    #[async_trait]
    impl Job for FixedJob {
        fn name(&self) -> &str {
            match self {
                FixedJob::Ok(n, _) | FixedJob::Fail(n) | FixedJob::Panic(n) => n,
            }
        }

        async fn execute(&self) -> anyhow::Result<()> {
            match self {
                FixedJob::Ok(_, runs) => {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                FixedJob::Fail(_) => anyhow::bail!("collaborator unavailable"),
                FixedJob::Panic(_) => panic!("bug in job body"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_jobs::*;
    use super::*;

    #[tokio::test]
    async fn test_success_sets_done() {
        let handle = JobHandle::new(Arc::new(FixedJob::Ok("ok", AtomicU64::new(0))));
        assert_eq!(handle.state(), JobState::Idle);
        assert_eq!(handle.fire().await, FireOutcome::Completed);
        assert_eq!(handle.state(), JobState::Done);
        assert_eq!((handle.executions(), handle.errors()), (1, 0));
    }

    #[tokio::test]
    async fn test_error_is_counted_not_propagated() {
        let handle = JobHandle::new(Arc::new(FixedJob::Fail("fail")));
        assert_eq!(handle.fire().await, FireOutcome::Failed);
        assert_eq!(handle.fire().await, FireOutcome::Failed);
        assert_eq!(handle.state(), JobState::Error);
        assert_eq!((handle.executions(), handle.errors()), (2, 2));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let handle = JobHandle::new(Arc::new(FixedJob::Panic("boom")));
        assert_eq!(handle.fire().await, FireOutcome::Failed);
        assert_eq!(handle.state(), JobState::Error);
        assert_eq!(handle.errors(), 1);
    }

    #[tokio::test]
    async fn test_fire_while_running_is_dropped() {
        let job = Arc::new(GatedJob::new("gated"));
        let handle = Arc::new(JobHandle::new(job.clone()));

        let h = handle.clone();
        let first = tokio::spawn(async move { h.fire().await });
        job.entered.notified().await;

        assert_eq!(handle.state(), JobState::Running);
        assert_eq!(handle.fire().await, FireOutcome::Skipped);
        assert_eq!(handle.state(), JobState::Running);
        assert_eq!((handle.executions(), handle.errors()), (1, 0));

        job.gate.notify_one();
        assert_eq!(first.await.unwrap(), FireOutcome::Completed);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), JobState::Done);
    }
}
