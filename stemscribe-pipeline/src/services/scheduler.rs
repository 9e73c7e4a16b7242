//! Job scheduler
//!
//! Fixed pool of async workers that admits, runs and retires pipeline jobs.
//!
//! - Admission (shutdown flag, duplicate id, active count) is checked under
//!   one mutex, so the pool never holds more than `capacity` active ids.
//! - A job id is active from `submit` until its task finishes, including
//!   time spent waiting for a free worker.
//! - `cancel` only succeeds before a worker has picked the task up.
//! - Task errors and panics are logged here and never reach the submitter;
//!   the job record is the source of truth for outcomes.
//! - `shutdown(true)` may be dropped and called again; worker handles stay
//!   owned by the scheduler until they have been joined.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Work submitted for one job
pub type JobTask = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Snapshot of scheduler occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub active_count: usize,
    pub capacity: usize,
    pub can_accept: bool,
    pub active_ids: Vec<Uuid>,
}

struct Dispatch {
    job_id: Uuid,
    ticket: u64,
    task: JobTask,
}

struct Entry {
    /// Distinguishes a resubmitted id from a cancelled earlier submission
    ticket: u64,
    started: bool,
}

struct Registry {
    active: HashMap<Uuid, Entry>,
    /// `None` once shutdown has begun
    sender: Option<mpsc::UnboundedSender<Dispatch>>,
    next_ticket: u64,
}

struct SharedState {
    registry: Mutex<Registry>,
    capacity: usize,
    /// Signalled whenever an active id is released or shutdown begins
    slot_freed: Notify,
}

impl SharedState {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim a dispatched task for execution; false if it was cancelled
    fn mark_started(&self, job_id: Uuid, ticket: u64) -> bool {
        let mut registry = self.registry();
        match registry.active.get_mut(&job_id) {
            Some(entry) if entry.ticket == ticket => {
                entry.started = true;
                true
            }
            _ => false,
        }
    }

    fn finish(&self, job_id: Uuid, ticket: u64) {
        let mut registry = self.registry();
        if registry.active.get(&job_id).map(|e| e.ticket) == Some(ticket) {
            registry.active.remove(&job_id);
        }
        drop(registry);
        self.slot_freed.notify_waiters();
    }
}

/// Bounded-concurrency job scheduler
///
/// Must be created inside a tokio runtime.
pub struct JobScheduler {
    shared: Arc<SharedState>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Start `max_concurrent_jobs` workers (at least one)
    pub fn new(max_concurrent_jobs: usize) -> Self {
        let capacity = max_concurrent_jobs.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Dispatch>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let shared = Arc::new(SharedState {
            registry: Mutex::new(Registry {
                active: HashMap::new(),
                sender: Some(sender),
                next_ticket: 0,
            }),
            capacity,
            slot_freed: Notify::new(),
        });

        let workers = (0..capacity)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(Self::worker_loop(worker_id, shared, receiver))
            })
            .collect();

        info!(workers = capacity, "Job scheduler started");

        Self {
            shared,
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// True while accepting work and below capacity
    pub fn can_accept(&self) -> bool {
        let registry = self.shared.registry();
        registry.sender.is_some() && registry.active.len() < self.shared.capacity
    }

    /// Wait until a slot is free
    ///
    /// Returns `ShuttingDown` once shutdown has begun, including while waiting.
    pub async fn wait_for_slot(&self) -> Result<(), SchedulerError> {
        loop {
            let notified = self.shared.slot_freed.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            {
                let registry = self.shared.registry();
                if registry.sender.is_none() {
                    return Err(SchedulerError::ShuttingDown);
                }
                if registry.active.len() < self.shared.capacity {
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Admit a job and hand its task to the worker pool
    pub fn submit(&self, job_id: Uuid, task: JobTask) -> Result<(), SchedulerError> {
        let mut registry = self.shared.registry();

        let Some(sender) = registry.sender.clone() else {
            return Err(SchedulerError::ShuttingDown);
        };
        if registry.active.contains_key(&job_id) {
            return Err(SchedulerError::AlreadyActive(job_id));
        }
        let active = registry.active.len();
        if active >= self.shared.capacity {
            return Err(SchedulerError::CapacityExceeded {
                active,
                capacity: self.shared.capacity,
            });
        }

        let ticket = registry.next_ticket;
        registry.next_ticket += 1;

        if sender.send(Dispatch { job_id, ticket, task }).is_err() {
            // Every worker has exited
            return Err(SchedulerError::ShuttingDown);
        }
        registry.active.insert(job_id, Entry { ticket, started: false });

        debug!(job_id = %job_id, active = active + 1, capacity = self.shared.capacity, "Job submitted");
        Ok(())
    }

    /// Withdraw a job that no worker has started yet
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut registry = self.shared.registry();
        match registry.active.get(&job_id) {
            Some(entry) if !entry.started => {
                registry.active.remove(&job_id);
                drop(registry);
                self.shared.slot_freed.notify_waiters();
                info!(job_id = %job_id, "Job cancelled before start");
                true
            }
            Some(_) => {
                debug!(job_id = %job_id, "Cancel refused: job already running");
                false
            }
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let registry = self.shared.registry();
        let mut active_ids: Vec<Uuid> = registry.active.keys().copied().collect();
        active_ids.sort();
        SchedulerStatus {
            active_count: registry.active.len(),
            capacity: self.shared.capacity,
            can_accept: registry.sender.is_some() && registry.active.len() < self.shared.capacity,
            active_ids,
        }
    }

    /// Stop accepting work
    ///
    /// Tasks already admitted still run. With `wait_for_drain` this returns
    /// once every worker has finished them.
    pub async fn shutdown(&self, wait_for_drain: bool) {
        let pending = {
            let mut registry = self.shared.registry();
            registry.sender.take();
            registry.active.len()
        };
        self.shared.slot_freed.notify_waiters();
        info!(pending, wait_for_drain, "Job scheduler shutting down");

        if !wait_for_drain {
            return;
        }

        // A handle leaves the vec only once joined, so a dropped call leaves
        // the rest for the next one
        let mut workers = self.workers.lock().await;
        while let Some(handle) = workers.last_mut() {
            let joined = handle.await;
            workers.pop();
            if let Err(e) = joined {
                warn!(error = %e, "Scheduler worker ended abnormally");
            }
        }
        info!("Job scheduler drained");
    }

    async fn worker_loop(
        worker_id: usize,
        shared: Arc<SharedState>,
        receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Dispatch>>>,
    ) {
        debug!(worker_id, "Scheduler worker started");

        loop {
            let next = { receiver.lock().await.recv().await };
            let Some(Dispatch { job_id, ticket, task }) = next else {
                break;
            };

            if !shared.mark_started(job_id, ticket) {
                debug!(worker_id, job_id = %job_id, "Skipping cancelled job");
                continue;
            }

            info!(worker_id, job_id = %job_id, "Job running");

            // Run on its own task so a panic surfaces as a JoinError
            let outcome = tokio::spawn(task).await;
            shared.finish(job_id, ticket);

            match outcome {
                Ok(Ok(())) => info!(worker_id, job_id = %job_id, "Job finished"),
                Ok(Err(e)) => error!(worker_id, job_id = %job_id, error = %format!("{:#}", e), "Job failed"),
                Err(e) if e.is_panic() => error!(worker_id, job_id = %job_id, "Job panicked"),
                Err(e) => error!(worker_id, job_id = %job_id, error = %e, "Job aborted"),
            }
        }

        debug!(worker_id, "Scheduler worker stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit
        self.shared.registry().sender.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn blocked_task(release: oneshot::Receiver<()>) -> JobTask {
        Box::pin(async move {
            let _ = release.await;
            Ok::<(), anyhow::Error>(())
        })
    }

    async fn wait_until_idle(scheduler: &JobScheduler) {
        for _ in 0..200 {
            if scheduler.status().active_count == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler did not become idle");
    }

    #[tokio::test]
    async fn test_duplicate_submit_is_rejected_without_state_change() {
        let scheduler = JobScheduler::new(2);
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        scheduler.submit(id, blocked_task(rx)).unwrap();
        let before = scheduler.status();

        let (_tx2, rx2) = oneshot::channel();
        let err = scheduler.submit(id, blocked_task(rx2)).unwrap_err();
        assert_eq!(err, SchedulerError::AlreadyActive(id));
        assert_eq!(scheduler.status(), before);

        tx.send(()).unwrap();
        wait_until_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn test_failing_and_panicking_tasks_are_retired() {
        let scheduler = JobScheduler::new(2);

        scheduler
            .submit(Uuid::new_v4(), Box::pin(async { Err::<(), _>(anyhow::anyhow!("stage exploded")) }))
            .unwrap();
        scheduler
            .submit(Uuid::new_v4(), Box::pin(async {
                if true {
                    panic!("worker bug");
                }
                Ok::<(), anyhow::Error>(())
            }))
            .unwrap();

        wait_until_idle(&scheduler).await;
        assert!(scheduler.can_accept());
    }

    // #[tokio::test] uses a current-thread runtime: workers only run once
    // the test yields, so a task submitted and cancelled without an await in
    // between has deterministically not started.
    #[tokio::test]
    async fn test_cancelled_task_never_runs() {
        let scheduler = JobScheduler::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        let ran_clone = Arc::clone(&ran);
        scheduler
            .submit(id, Box::pin(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }))
            .unwrap();
        assert!(scheduler.cancel(id));
        assert_eq!(scheduler.status().active_count, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_running_task_cannot_be_cancelled() {
        let scheduler = JobScheduler::new(1);
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        scheduler.submit(id, blocked_task(rx)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.status().active_ids, vec![id]);

        tx.send(()).unwrap();
        wait_until_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_id() {
        let scheduler = JobScheduler::new(1);
        assert!(!scheduler.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_resubmit_after_cancel_runs_new_task_once() {
        let scheduler = JobScheduler::new(1);
        let id = Uuid::new_v4();
        let ran = Arc::new(AtomicUsize::new(0));

        scheduler
            .submit(id, Box::pin(async {
                if true {
                    panic!("cancelled task must not run");
                }
                Ok::<(), anyhow::Error>(())
            }))
            .unwrap();
        assert!(scheduler.cancel(id));

        let ran_clone = Arc::clone(&ran);
        scheduler
            .submit(id, Box::pin(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }))
            .unwrap();

        wait_until_idle(&scheduler).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interrupted_shutdown_still_drains_on_retry() {
        let scheduler = JobScheduler::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        let done_clone = Arc::clone(&done);
        scheduler
            .submit(Uuid::new_v4(), Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                done_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }))
            .unwrap();

        tokio::select! {
            _ = scheduler.shutdown(true) => panic!("drain finished before the task"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert_eq!(done.load(Ordering::SeqCst), 0);

        scheduler.shutdown(true).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.status().active_count, 0);
    }

    #[tokio::test]
    async fn test_wait_for_slot_resumes_when_a_job_finishes() {
        let scheduler = JobScheduler::new(1);
        let (tx, rx) = oneshot::channel();
        scheduler.submit(Uuid::new_v4(), blocked_task(rx)).unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), scheduler.wait_for_slot()).await;
        assert!(waited.is_err(), "no slot while the only worker is busy");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), scheduler.wait_for_slot())
            .await
            .expect("slot freed")
            .unwrap();
        assert!(scheduler.can_accept());
    }

    #[tokio::test]
    async fn test_wait_for_slot_ends_on_shutdown() {
        let scheduler = Arc::new(JobScheduler::new(1));
        let (_hold, rx) = oneshot::channel();
        scheduler.submit(Uuid::new_v4(), blocked_task(rx)).unwrap();

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.wait_for_slot().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.shutdown(false).await;

        let result = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(SchedulerError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_drains() {
        let scheduler = JobScheduler::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let done = Arc::clone(&done);
            scheduler
                .submit(Uuid::new_v4(), Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }))
                .unwrap();
        }

        scheduler.shutdown(true).await;

        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(!scheduler.can_accept());
        let err = scheduler
            .submit(Uuid::new_v4(), Box::pin(async { Ok::<(), anyhow::Error>(()) }))
            .unwrap_err();
        assert_eq!(err, SchedulerError::ShuttingDown);
    }
}
