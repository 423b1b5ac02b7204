//! Named periodic jobs.
//!
//! Every recurring activity (generator tick, role tick, keepalive, spawn
//! flush) is registered here under a name with its interval, so what runs
//! how often is decided in one place. Each job runs on its own background
//! task; a failing run is logged and the job keeps its schedule. Jobs stop
//! when the shared [`ShutdownState`] is initiated.

use crate::error::WorldError;
use crate::shutdown::ShutdownState;
use crate::utils::lock;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const GENERATOR_TICK: &str = "generator_tick";
pub const ROLE_TICK: &str = "role_tick";
pub const KEEPALIVE: &str = "keepalive";
pub const SPAWN_FLUSH: &str = "spawn_flush";

/// Body of a periodic job.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), WorldError>> + Send + Sync>;

#[derive(Clone)]
struct Job {
    interval: Duration,
    run: JobFn,
}

/// Registry and runner of named periodic jobs.
pub struct Scheduler {
    jobs: Mutex<BTreeMap<String, Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: ShutdownState,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_names())
            .finish()
    }
}

impl Scheduler {
    pub fn new(shutdown: ShutdownState) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            handles: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Registers a job. A second registration under the same name replaces
    /// the first if the scheduler has not started yet.
    pub fn register<F>(&self, name: impl Into<String>, interval: Duration, job: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), WorldError>> + Send + Sync + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            warn!(job = %name, "refusing to register job with zero interval");
            return;
        }
        debug!(job = %name, ?interval, "job registered");
        lock(&self.jobs).insert(
            name,
            Job {
                interval,
                run: Arc::new(job),
            },
        );
    }

    pub fn job_names(&self) -> Vec<String> {
        lock(&self.jobs).keys().cloned().collect()
    }

    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        lock(&self.jobs).get(name).map(|job| job.interval)
    }

    /// Runs a job once, immediately, on the caller's task.
    /// Returns `None` for an unknown job.
    pub async fn run_now(&self, name: &str) -> Option<Result<(), WorldError>> {
        let run = lock(&self.jobs).get(name).map(|job| job.run.clone())?;
        Some(run().await)
    }

    /// Spawns one background task per registered job.
    pub fn start(&self) {
        let jobs: Vec<(String, Job)> = lock(&self.jobs)
            .iter()
            .map(|(name, job)| (name.clone(), job.clone()))
            .collect();

        let mut handles = lock(&self.handles);
        for (name, job) in jobs {
            let shutdown = self.shutdown.clone();
            info!("⏱️ Scheduling '{}' every {:?}", name, job.interval);
            handles.push(tokio::spawn(run_job(name, job, shutdown)));
        }
    }

    /// Waits for every job task to observe shutdown and exit.
    pub async fn stop(&self) {
        self.shutdown.initiate_shutdown();
        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("❌ Scheduled job task terminated abnormally: {}", e);
            }
        }
        debug!("scheduler stopped");
    }
}

async fn run_job(name: String, job: Job, shutdown: ShutdownState) {
    let mut interval = tokio::time::interval(job.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick of a tokio interval fires immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => {
                if shutdown.is_shutdown_initiated() {
                    break;
                }
                if let Err(e) = (job.run)().await {
                    error!(job = %name, error = %e, "❌ Scheduled job failed");
                }
            }
        }
    }
    debug!(job = %name, "job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<(), WorldError>> + Send + Sync + 'static {
        let counter = counter.clone();
        move || -> BoxFuture<'static, Result<(), WorldError>> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_fire_at_their_interval_until_shutdown() {
        let shutdown = ShutdownState::new();
        let scheduler = Scheduler::new(shutdown.clone());
        let fast = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(AtomicUsize::new(0));
        scheduler.register(ROLE_TICK, Duration::from_millis(500), counting_job(&fast));
        scheduler.register(GENERATOR_TICK, Duration::from_millis(1000), counting_job(&slow));
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 4);
        assert_eq!(slow.load(Ordering::SeqCst), 2);

        scheduler.stop().await;
        let after = fast.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fast.load(Ordering::SeqCst), after);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_keeps_its_schedule() {
        let scheduler = Scheduler::new(ShutdownState::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.register(KEEPALIVE, Duration::from_secs(1), move || -> BoxFuture<'static, Result<(), WorldError>> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WorldError::Internal("peer gone".into()))
            })
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn run_now_executes_by_name() {
        let scheduler = Scheduler::new(ShutdownState::new());
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.register(SPAWN_FLUSH, Duration::from_millis(200), counting_job(&runs));
        scheduler.register("ignored", Duration::ZERO, counting_job(&runs));

        assert!(scheduler.run_now(SPAWN_FLUSH).await.unwrap().is_ok());
        assert!(scheduler.run_now("missing").await.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.job_names(), vec![SPAWN_FLUSH.to_string()]);
        assert_eq!(scheduler.interval_of(SPAWN_FLUSH), Some(Duration::from_millis(200)));
    }
}
