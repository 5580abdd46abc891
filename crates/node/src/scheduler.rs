//! In-process job scheduler.
//!
//! The scheduler is a registry of `(JobHandle, Schedule)` pairs plus one
//! driver task per schedule once started. Drivers never run a job body
//! inline: each fire is spawned, so a long execution does not delay the
//! ticker, and the handle's single-flight guard drops overlapping fires.
//!
//! ## Lifecycle
//!
//! ```text
//!  register(..)*  ──▶  run_now(..) queued  ──▶  start()  ──▶ queued fires, then drivers
//!                                                 │
//!                                                 └── register / run_now after
//!                                                     start act immediately
//! ```
//!
//! There is no `stop`. Driver tasks live until the runtime shuts down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::job::{Job, JobHandle, JobState};
use crate::schedule::Schedule;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job `{0}` is already registered")]
    DuplicateJob(String),

    #[error("no job named `{0}`")]
    UnknownJob(String),

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Registry row exposed to the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub state: JobState,
    pub executions: u64,
    pub errors: u64,
    pub schedule: String,
}

struct Entry {
    handle: Arc<JobHandle>,
    schedule: Schedule,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: RwLock<BTreeMap<String, Entry>>,
    started: AtomicBool,
    /// Names passed to `run_now` before `start`. The lock also orders
    /// `run_now` and `register` against `start`. Lock order: `pending`
    /// before `jobs`.
    pending: Mutex<Vec<String>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Add a job. Registering after `start` begins driving it at once.
    pub fn register(&self, job: Arc<dyn Job>, schedule: Schedule) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        let handle = Arc::new(JobHandle::new(job));
        // Held across insert and the started check so `start` either sees
        // this entry or leaves its driver to us, never both.
        let _pending = self.pending.lock();
        {
            let mut jobs = self.jobs.write();
            if jobs.contains_key(&name) {
                return Err(SchedulerError::DuplicateJob(name));
            }
            jobs.insert(
                name.clone(),
                Entry {
                    handle: handle.clone(),
                    schedule: schedule.clone(),
                },
            );
        }
        info!(job = %name, schedule = %schedule.describe(), "job registered");

        if self.is_started() {
            spawn_driver(handle, schedule);
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().contains_key(name)
    }

    /// Fire a job now without waiting for it.
    ///
    /// Before `start` the request is queued and fired when `start` runs.
    /// The single-flight guard applies as for scheduled fires.
    pub fn run_now(&self, name: &str) -> Result<(), SchedulerError> {
        let handle = self
            .jobs
            .read()
            .get(name)
            .map(|e| e.handle.clone())
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;

        let mut pending = self.pending.lock();
        if !self.is_started() {
            debug!(job = name, "scheduler not started, run queued");
            pending.push(name.to_string());
            return Ok(());
        }
        drop(pending);

        info!(job = name, "running job on demand");
        spawn_fire(handle);
        Ok(())
    }

    /// Flush queued runs, then begin driving every registered schedule.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut pending = self.pending.lock();
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let queued = std::mem::take(&mut *pending);

        let jobs = self.jobs.read();
        for name in &queued {
            if let Some(entry) = jobs.get(name) {
                spawn_fire(entry.handle.clone());
            }
        }
        for entry in jobs.values() {
            spawn_driver(entry.handle.clone(), entry.schedule.clone());
        }
        info!(jobs = jobs.len(), queued = queued.len(), "scheduler started");
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs
            .read()
            .values()
            .map(|e| {
                let stats = e.handle.stats();
                JobSnapshot {
                    name: stats.name,
                    state: stats.state,
                    executions: stats.executions,
                    errors: stats.errors,
                    schedule: e.schedule.describe(),
                }
            })
            .collect()
    }

    /// Handle of a registered job, for inspection.
    pub fn handle(&self, name: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().get(name).map(|e| e.handle.clone())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs.read().keys().collect::<Vec<_>>())
            .field("started", &self.is_started())
            .finish()
    }
}

fn spawn_fire(handle: Arc<JobHandle>) {
    tokio::spawn(async move {
        handle.fire().await;
    });
}

fn spawn_driver(handle: Arc<JobHandle>, schedule: Schedule) {
    match schedule {
        Schedule::OnDemand => {}
        Schedule::Interval { period, .. } => {
            let delay = schedule
                .initial_delay(&mut rand::thread_rng())
                .unwrap_or(Duration::ZERO);
            tokio::spawn(drive_interval(handle, period, delay));
        }
        Schedule::Calendar { .. } => {
            tokio::spawn(drive_calendar(handle, schedule));
        }
    }
}

async fn drive_interval(handle: Arc<JobHandle>, period: Duration, delay: Duration) {
    if period.is_zero() {
        warn!(job = handle.name(), "zero interval, job will not be scheduled");
        return;
    }
    if !delay.is_zero() {
        debug!(job = handle.name(), delay_secs = delay.as_secs(), "initial jitter");
        tokio::time::sleep(delay).await;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        spawn_fire(handle.clone());
    }
}

async fn drive_calendar(handle: Arc<JobHandle>, schedule: Schedule) {
    let mut last: Option<DateTime<Local>> = None;
    loop {
        let now = Local::now();
        // A timer that wakes a little early must not produce a second fire
        // for the same slot.
        let from = match last {
            Some(l) if l > now => l,
            _ => now,
        };
        let Some(next) = schedule.next_fire_after(&from) else {
            warn!(
                job = handle.name(),
                schedule = %schedule.describe(),
                "no next fire time, job stops"
            );
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(job = handle.name(), next = %next, "calendar wait");
        tokio::time::sleep(wait).await;
        spawn_fire(handle.clone());
        last = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_jobs::{FixedJob, GatedJob};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    fn counting(name: &'static str) -> Arc<FixedJob> {
        Arc::new(FixedJob::Ok(name, AtomicU64::new(0)))
    }

    fn runs(job: &FixedJob) -> u64 {
        match job {
            FixedJob::Ok(_, n) => n.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let s = Scheduler::new();
        s.register(counting("a"), Schedule::OnDemand).unwrap();
        assert_eq!(
            s.register(counting("a"), Schedule::OnDemand),
            Err(SchedulerError::DuplicateJob("a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_run_now_unknown_job() {
        let s = Scheduler::new();
        assert_eq!(s.run_now("nope"), Err(SchedulerError::UnknownJob("nope".to_string())));
    }

    #[tokio::test]
    async fn test_start_is_one_shot() {
        let s = Scheduler::new();
        s.start().unwrap();
        assert_eq!(s.start(), Err(SchedulerError::AlreadyStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_before_start_is_queued() {
        let s = Scheduler::new();
        let job = counting("restore");
        s.register(job.clone(), Schedule::OnDemand).unwrap();

        s.run_now("restore").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs(&job), 0);

        s.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs(&job), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_every_period() {
        let s = Scheduler::new();
        let job = counting("tick");
        s.register(job.clone(), Schedule::every(Duration::from_secs(10))).unwrap();
        s.start().unwrap();

        // Immediate first fire, then at 10s and 20s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs(&job), 3);
        let snap = s.snapshot();
        assert_eq!(snap[0].executions, 3);
        assert_eq!(snap[0].schedule, "every 10s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_interval_first_fire_within_window() {
        let s = Scheduler::new();
        let job = counting("seed-acl");
        s.register(
            job.clone(),
            Schedule::every_with_jitter(Duration::from_secs(1000), Duration::from_secs(240)),
        )
        .unwrap();
        s.start().unwrap();

        tokio::time::sleep(Duration::from_secs(241)).await;
        assert_eq!(runs(&job), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fires_are_dropped() {
        let s = Scheduler::new();
        let job = Arc::new(GatedJob::new("slow"));
        s.register(job.clone(), Schedule::every(Duration::from_secs(1))).unwrap();
        s.start().unwrap();

        job.entered.notified().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let handle = s.handle("slow").unwrap();
        assert_eq!(handle.state(), JobState::Running);
        assert_eq!(handle.executions(), 1);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        job.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_does_not_stop_others() {
        let s = Scheduler::new();
        let good = counting("good");
        s.register(Arc::new(FixedJob::Panic("bad")), Schedule::every(Duration::from_secs(5)))
            .unwrap();
        s.register(good.clone(), Schedule::every(Duration::from_secs(5))).unwrap();
        s.start().unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runs(&good), 3);
        let bad = s.handle("bad").unwrap();
        assert_eq!(bad.errors(), 3);
        assert_eq!(bad.state(), JobState::Error);
    }

    /// Records whether the flag was already set when it first ran.
    struct FlagJob {
        name: &'static str,
        flag: Arc<AtomicBool>,
        set: bool,
        seen: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Job for FlagJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self) -> anyhow::Result<()> {
            self.seen.lock().push(self.flag.load(Ordering::SeqCst));
            if self.set {
                self.flag.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_fires_run_before_first_ticks() {
        let s = Scheduler::new();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_job = |name, set| {
            Arc::new(FlagJob {
                name,
                flag: flag.clone(),
                set,
                seen: Mutex::new(Vec::new()),
            })
        };
        let monitor = flag_job("monitor", false);
        let restore = flag_job("restore", true);
        s.register(monitor.clone(), Schedule::every(Duration::from_secs(60))).unwrap();
        s.register(restore.clone(), Schedule::OnDemand).unwrap();

        s.run_now("restore").unwrap();
        s.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*restore.seen.lock(), vec![false]);
        assert_eq!(*monitor.seen.lock(), vec![true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_register_racing_start_spawns_one_driver() {
        for _ in 0..50 {
            let s = Arc::new(Scheduler::new());
            let job = counting("raced");
            let registering = {
                let s = s.clone();
                let job = job.clone();
                tokio::spawn(async move {
                    s.register(job, Schedule::every(Duration::from_secs(3600))).unwrap();
                })
            };
            s.start().unwrap();
            registering.await.unwrap();

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(runs(&job), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_after_start_is_driven() {
        let s = Scheduler::new();
        s.start().unwrap();
        let job = counting("late");
        s.register(job.clone(), Schedule::every(Duration::from_secs(60))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs(&job), 1);
    }
}
