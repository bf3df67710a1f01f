//! Scheduler: priority queue + resource-aware worker pool
//!
//! ```text
//!  schedule_batch ──► TaskQueue (tier, seq) ──► worker 1..N ──► job(token, deadline)
//!        │                 ▲                        │
//!        │   cancel(id) ───┘ O(1) removal           ├─► TaskEvent::Started
//!        ▼                                          └─► TaskEvent::Finished(report)
//!   Saturated when queue is at capacity
//!
//!  monitor ── every poll_interval ──► ResourceProbe ──► next_worker_target
//! ```
//!
//! Workers are tokio tasks. The queue and its admission flag share one
//! coarse mutex that is never held across an await. A worker whose live
//! count exceeds the current target retires between tasks.

mod queue;
pub mod resources;
pub mod task;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use vigil_core::config::SchedulerConfig;
use vigil_core::domain::AdapterError;

use queue::TaskQueue;
pub use resources::{FixedProbe, ResourceProbe, ResourceSample, SystemProbe, next_worker_target};
pub use task::{
    ScheduledTask, TaskEvent, TaskHandle, TaskId, TaskJob, TaskOutcome, TaskReport, TaskResult,
    TaskSuccess,
};

/// Smallest accepted resource polling interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error(
        "Scheduler saturated: {queued} tasks queued, {requested} requested, capacity {capacity}"
    )]
    Saturated {
        queued: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    pub queue_depth: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub target_workers: usize,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub tasks_cancelled: u64,
}

struct QueueState {
    tasks: TaskQueue,
    accepting: bool,
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

struct Inner {
    config: SchedulerConfig,
    termination_grace: Duration,
    queue: Mutex<QueueState>,
    notify: Notify,
    live_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    target_workers: AtomicUsize,
    next_worker_id: AtomicUsize,
    counters: Counters,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Priority scheduler with an autoscaling worker pool.
///
/// Must be created inside a tokio runtime.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Start the pool at `max_workers` and begin resource monitoring.
    pub fn new(
        config: SchedulerConfig,
        termination_grace: Duration,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        let floor = config.min_workers.max(1);
        let initial = config.max_workers.max(floor);

        let inner = Arc::new(Inner {
            config,
            termination_grace,
            queue: Mutex::new(QueueState {
                tasks: TaskQueue::default(),
                accepting: true,
            }),
            notify: Notify::new(),
            live_workers: AtomicUsize::new(0),
            busy_workers: AtomicUsize::new(0),
            target_workers: AtomicUsize::new(initial),
            next_worker_id: AtomicUsize::new(0),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        inner.spawn_missing_workers();
        inner
            .tracker
            .spawn(Arc::clone(&inner).run_monitor(probe));

        info!(
            workers = initial,
            capacity = inner.config.queue_capacity,
            "Scheduler started"
        );
        Self { inner }
    }

    /// Admit one task.
    pub fn schedule(&self, task: ScheduledTask) -> Result<TaskHandle, SchedulerError> {
        let mut handles = self.schedule_batch(vec![task])?;
        handles.pop().ok_or(SchedulerError::ShuttingDown)
    }

    /// Admit all tasks or none of them.
    pub fn schedule_batch(
        &self,
        tasks: Vec<ScheduledTask>,
    ) -> Result<Vec<TaskHandle>, SchedulerError> {
        let handles: Vec<TaskHandle> = {
            let mut state = self.inner.lock_queue();
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            let queued = state.tasks.len();
            let capacity = self.inner.config.queue_capacity;
            if queued + tasks.len() > capacity {
                return Err(SchedulerError::Saturated {
                    queued,
                    requested: tasks.len(),
                    capacity,
                });
            }
            tasks
                .into_iter()
                .map(|task| {
                    let adapter = task.adapter.clone();
                    let id = state.tasks.push(task);
                    TaskHandle { id, adapter }
                })
                .collect()
        };

        for _ in &handles {
            self.inner.notify.notify_one();
        }
        Ok(handles)
    }

    /// Remove a queued task, reporting it `Cancelled`.
    ///
    /// Returns `false` if the task already left the queue; running tasks are
    /// cancelled through their token instead.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let removed = self.inner.lock_queue().tasks.remove(task_id);
        match removed {
            Some(task) => {
                debug!(%task_id, adapter = %task.adapter, "Queued task cancelled");
                self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                task.report(task_id, TaskOutcome::Cancelled, Duration::ZERO);
                true
            }
            None => false,
        }
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let queue_depth = self.inner.lock_queue().tasks.len();
        let counters = &self.inner.counters;
        SchedulerMetrics {
            queue_depth,
            live_workers: self.inner.live_workers.load(Ordering::SeqCst),
            busy_workers: self.inner.busy_workers.load(Ordering::SeqCst),
            target_workers: self.inner.target_workers.load(Ordering::SeqCst),
            tasks_executed: counters.executed.load(Ordering::Relaxed),
            tasks_failed: counters.failed.load(Ordering::Relaxed),
            tasks_timed_out: counters.timed_out.load(Ordering::Relaxed),
            tasks_cancelled: counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Stop admission, cancel queued tasks and wait for in-flight tasks.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.lock_queue();
            state.accepting = false;
            state.tasks.drain()
        };
        info!(cancelled = drained.len(), "Scheduler shutting down");
        for (task_id, task) in drained {
            self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            task.report(task_id, TaskOutcome::Cancelled, Duration::ZERO);
        }

        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Scheduler stopped");
    }
}

impl Inner {
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        // Queue mutations cannot leave the state inconsistent mid-way, so a
        // poisoned lock is still usable.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_missing_workers(self: &Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let live = self.live_workers.load(Ordering::SeqCst);
            if live >= self.target_workers.load(Ordering::SeqCst) {
                return;
            }
            if self
                .live_workers
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
                self.tracker.spawn(Arc::clone(self).run_worker(worker_id));
            }
        }
    }

    /// Give up this worker's slot if the pool is above target.
    fn try_retire(&self) -> bool {
        let target = self.target_workers.load(Ordering::SeqCst);
        self.live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > target).then(|| live - 1)
            })
            .is_ok()
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Worker started");
        loop {
            if self.try_retire() {
                debug!(worker_id, "Worker retired");
                return;
            }

            let next = self.lock_queue().tasks.pop();
            match next {
                Some((task_id, task)) => self.execute(task_id, task).await,
                None => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
            }
        }
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
        debug!(worker_id, "Worker stopped");
    }

    async fn execute(&self, task_id: TaskId, task: ScheduledTask) {
        if task.cancel.is_cancelled() {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            task.report(task_id, TaskOutcome::Cancelled, Duration::ZERO);
            return;
        }

        let ScheduledTask {
            scan_id,
            adapter,
            tier,
            timeout,
            cancel,
            job,
            events,
        } = task;

        self.busy_workers.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(TaskEvent::Started {
            task_id,
            adapter: adapter.clone(),
        });

        let span = info_span!("task", %scan_id, %task_id, adapter = %adapter, tier = tier.as_str());
        let started = Instant::now();
        let run_token = cancel.child_token();
        let mut run = AssertUnwindSafe(job(run_token.clone(), started + timeout))
            .catch_unwind()
            .instrument(span.clone());

        let outcome = tokio::select! {
            result = &mut run => match result {
                Ok(result) => TaskOutcome::from_result(result),
                Err(_) => TaskOutcome::Failed(AdapterError::failure(adapter.clone(), "adapter panicked")),
            },
            _ = tokio::time::sleep(timeout) => {
                run_token.cancel();
                if tokio::time::timeout(self.termination_grace, &mut run).await.is_err() {
                    span.in_scope(|| warn!("Task ignored cancellation past the grace period"));
                }
                TaskOutcome::TimedOut
            }
            _ = cancel.cancelled() => match tokio::time::timeout(self.termination_grace, &mut run).await {
                Ok(Ok(result)) => TaskOutcome::from_result(result),
                Ok(Err(_)) => TaskOutcome::Failed(AdapterError::failure(adapter.clone(), "adapter panicked")),
                Err(_) => {
                    span.in_scope(|| warn!("Task ignored cancellation past the grace period"));
                    TaskOutcome::Cancelled
                }
            },
        };
        let duration = started.elapsed();

        let counter = match &outcome {
            TaskOutcome::Succeeded(_) => &self.counters.executed,
            TaskOutcome::Failed(_) => &self.counters.failed,
            TaskOutcome::TimedOut => &self.counters.timed_out,
            TaskOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        span.in_scope(|| {
            debug!(
                outcome = outcome.label(),
                duration_ms = duration.as_millis() as u64,
                "Task finished"
            )
        });

        self.busy_workers.fetch_sub(1, Ordering::SeqCst);
        let _ = events.send(TaskEvent::Finished(TaskReport {
            task_id,
            adapter,
            outcome,
            duration,
        }));
    }

    async fn run_monitor(self: Arc<Self>, mut probe: Box<dyn ResourceProbe>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval().max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sample = probe.sample();
            let queue_depth = self.lock_queue().tasks.len();
            let current = self.target_workers.load(Ordering::SeqCst);
            let next = next_worker_target(current, sample, queue_depth, &self.config);

            if next != current {
                info!(
                    from = current,
                    to = next,
                    cpu = sample.cpu,
                    memory = sample.memory,
                    queue_depth,
                    "Adjusting worker target"
                );
                self.target_workers.store(next, Ordering::SeqCst);
                if next < current {
                    // Idle workers re-check the target and retire.
                    self.notify.notify_waiters();
                }
            }
            self.spawn_missing_workers();
        }
        debug!("Resource monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use vigil_core::domain::{NormalizedResult, PriorityTier, ScanId};

    fn quiet_probe() -> Box<dyn ResourceProbe> {
        Box::new(FixedProbe(ResourceSample::new(0.6, 0.7)))
    }

    fn scheduler(workers: usize, capacity: usize) -> Scheduler {
        Scheduler::new(
            SchedulerConfig {
                min_workers: workers,
                max_workers: workers,
                queue_capacity: capacity,
                poll_interval_ms: 50,
                ..Default::default()
            },
            Duration::from_millis(100),
            quiet_probe(),
        )
    }

    fn task(
        adapter: &str,
        tier: PriorityTier,
        timeout: Duration,
        work: Duration,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) -> ScheduledTask {
        ScheduledTask {
            scan_id: ScanId::new(),
            adapter: adapter.to_string(),
            tier,
            timeout,
            cancel: CancellationToken::new(),
            job: Box::new(move |token: CancellationToken, _deadline| {
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(work) => Ok(TaskSuccess {
                            result: NormalizedResult::default(),
                            cache_hit: false,
                        }),
                        _ = token.cancelled() => Err(AdapterError::cancelled("test")),
                    }
                }
                .boxed()
            }),
            events: events.clone(),
        }
    }

    async fn finished(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskReport {
        loop {
            match rx.recv().await.expect("event channel open") {
                TaskEvent::Finished(report) => return report,
                TaskEvent::Started { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_tasks_run_in_tier_order() {
        let sched = scheduler(1, 16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long = Duration::from_secs(5);

        // Occupy the single worker so the rest queue up behind it.
        sched
            .schedule(task("blocker", PriorityTier::Critical, long, Duration::from_millis(100), &tx))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sched
            .schedule_batch(vec![
                task("zap", PriorityTier::Background, long, Duration::ZERO, &tx),
                task("nmap", PriorityTier::Standard, long, Duration::ZERO, &tx),
                task("gitleaks", PriorityTier::Critical, long, Duration::ZERO, &tx),
            ])
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(finished(&mut rx).await.adapter);
        }
        assert_eq!(order, vec!["blocker", "gitleaks", "nmap", "zap"]);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_reports_timed_out() {
        let sched = scheduler(1, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        sched
            .schedule(task(
                "nikto",
                PriorityTier::Background,
                Duration::from_millis(50),
                Duration::from_secs(30),
                &tx,
            ))
            .unwrap();

        let report = finished(&mut rx).await;
        assert!(matches!(report.outcome, TaskOutcome::TimedOut));
        assert!(report.duration < Duration::from_secs(5));
        assert_eq!(sched.metrics().tasks_timed_out, 1);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_task_frees_worker_when_job_ignores_token() {
        let sched = scheduler(1, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut stubborn = task(
            "zap",
            PriorityTier::Background,
            Duration::from_secs(30),
            Duration::ZERO,
            &tx,
        );
        stubborn.cancel = cancel.clone();
        stubborn.job = Box::new(|_token: CancellationToken, _deadline| {
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(TaskSuccess {
                    result: NormalizedResult::default(),
                    cache_hit: false,
                })
            }
            .boxed()
        });
        sched.schedule(stubborn).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sched.metrics().busy_workers, 1);

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(1), finished(&mut rx))
            .await
            .expect("cancelled task never reported");
        assert!(matches!(report.outcome, TaskOutcome::Cancelled));
        assert_eq!(sched.metrics().busy_workers, 0);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let sched = scheduler(1, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long = Duration::from_secs(5);

        sched
            .schedule(task("blocker", PriorityTier::Critical, long, Duration::from_millis(200), &tx))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let handle = sched
            .schedule(task("zap", PriorityTier::Background, long, Duration::ZERO, &tx))
            .unwrap();

        assert!(sched.cancel(handle.id));
        assert!(!sched.cancel(handle.id));

        let report = finished(&mut rx).await;
        assert_eq!(report.adapter, "zap");
        assert!(matches!(report.outcome, TaskOutcome::Cancelled));
        assert_eq!(report.duration, Duration::ZERO);
        sched.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_rejected_when_it_would_exceed_capacity() {
        let sched = scheduler(1, 2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let long = Duration::from_secs(5);

        sched
            .schedule(task("blocker", PriorityTier::Critical, long, Duration::from_secs(2), &tx))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sched
            .schedule(task("a", PriorityTier::High, long, Duration::ZERO, &tx))
            .unwrap();

        let err = sched
            .schedule_batch(vec![
                task("b", PriorityTier::High, long, Duration::ZERO, &tx),
                task("c", PriorityTier::High, long, Duration::ZERO, &tx),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::Saturated {
                queued: 1,
                requested: 2,
                capacity: 2
            }
        );
        // Nothing from the rejected batch was admitted.
        assert_eq!(sched.metrics().queue_depth, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_and_rejects_new_work() {
        let sched = scheduler(1, 8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long = Duration::from_secs(5);

        sched
            .schedule(task("blocker", PriorityTier::Critical, long, Duration::from_millis(100), &tx))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sched
            .schedule(task("queued", PriorityTier::Background, long, Duration::ZERO, &tx))
            .unwrap();

        sched.shutdown().await;

        let mut cancelled = Vec::new();
        let mut succeeded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TaskEvent::Finished(report) = event {
                match report.outcome {
                    TaskOutcome::Cancelled => cancelled.push(report.adapter),
                    TaskOutcome::Succeeded(_) => succeeded.push(report.adapter),
                    _ => {}
                }
            }
        }
        assert_eq!(cancelled, vec!["queued"]);
        assert_eq!(succeeded, vec!["blocker"]);

        let err = sched
            .schedule(task("late", PriorityTier::High, long, Duration::ZERO, &tx))
            .unwrap_err();
        assert_eq!(err, SchedulerError::ShuttingDown);
        assert_eq!(sched.metrics().live_workers, 0);
    }

    #[tokio::test]
    async fn test_pool_shrinks_under_pressure() {
        let sched = Scheduler::new(
            SchedulerConfig {
                min_workers: 1,
                max_workers: 3,
                poll_interval_ms: 10,
                ..Default::default()
            },
            Duration::from_millis(100),
            Box::new(FixedProbe(ResourceSample::new(0.99, 0.5))),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        let metrics = sched.metrics();
        assert_eq!(metrics.target_workers, 1);
        assert_eq!(metrics.live_workers, 1);
        sched.shutdown().await;
    }
}
