//! Cooperative job scheduler.
//!
//! Jobs are keyed by id; spawning under an existing id cancels and replaces
//! the previous instance, so identical jobs never run concurrently. Every
//! job receives a child of the root cancellation token and is expected to
//! observe it at each suspension point. Shutdown cancels the root and
//! awaits every job.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Job {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, Job>>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Spawn a job, replacing any previous instance with the same id.
    pub fn spawn_job<F, Fut>(&self, id: &str, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock();

        if let Some(previous) = jobs.remove(id) {
            debug!(id, "replacing previous job instance");
            previous.token.cancel();
            previous.handle.abort();
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(job(token.clone()));
        jobs.insert(id.to_string(), Job { token, handle });
    }

    /// Run `task` every `period`, optionally once immediately at spawn.
    pub fn spawn_periodic<F, Fut>(&self, id: &str, period: Duration, run_immediately: bool, task: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn_job(id, move |token| async move {
            if !run_immediately && !sleep_or_cancel(period, &token).await {
                return;
            }
            loop {
                if token.is_cancelled() {
                    return;
                }
                task(token.clone()).await;
                if !sleep_or_cancel(period, &token).await {
                    return;
                }
            }
        });
    }

    /// Run `task` once after `delay`, unless cancelled first.
    pub fn spawn_once_after<F, Fut>(&self, id: &str, delay: Duration, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn_job(id, move |token| async move {
            if sleep_or_cancel(delay, &token).await {
                task(token.clone()).await;
            }
        });
    }

    /// Cancel everything and wait for jobs to unwind.
    pub async fn shutdown(&self) {
        info!("cancelling scheduler jobs");
        self.root.cancel();

        let jobs: Vec<Job> = self.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in jobs {
            let _ = job.handle.await;
        }
        info!("scheduler stopped");
    }
}

/// Sleep unless cancelled; false means the job should exit.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}
