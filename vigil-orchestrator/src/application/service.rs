//! Scan control surface
//!
//! [`ScanService`] owns the scheduler, result cache, progress broadcaster and
//! store for the lifetime of the process. Starting a scan selects adapters,
//! admits one task per adapter to the scheduler as a single batch and hands
//! the scan to a driver task. The driver is the scan's only writer: it
//! settles runs from scheduler events, advances progress, and finalizes the
//! scan once every task has settled or the cancellation grace ran out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use vigil_core::Config;
use vigil_core::domain::{
    AdapterConfig, PriorityTier, ProgressEvent, RunState, Scan, ScanId, ScanProfile, ScannerRun,
    TargetIdentity, progress_percent,
};

use crate::application::aggregator::{AdapterOutput, ResultAggregator};
use crate::application::selection::{AdmittedAdapter, select_adapters};
use crate::application::workflow::{ScanWorkflow, WorkflowError};
use crate::domain::{AdapterInfo, ScanProgress, ScanRequest, ScanResults, ScanServiceError};
use crate::infrastructure::broadcaster::{ProgressBroadcaster, ProgressSubscription};
use crate::infrastructure::cache::{CacheKey, CacheStats, ResultCache, content_fingerprint};
use crate::infrastructure::registry::AdapterRegistry;
use crate::infrastructure::scheduler::{
    ResourceProbe, ScheduledTask, Scheduler, SchedulerError, SchedulerMetrics, SystemProbe,
    TaskEvent, TaskId, TaskJob, TaskOutcome, TaskReport, TaskSuccess,
};
use crate::infrastructure::store::ScanStore;

struct ActiveScan {
    cancel: CancellationToken,
}

struct ServiceInner {
    config: Config,
    registry: AdapterRegistry,
    scheduler: Scheduler,
    cache: Arc<ResultCache>,
    broadcaster: Arc<ProgressBroadcaster>,
    store: Arc<dyn ScanStore>,
    workflow: ScanWorkflow,
    aggregator: ResultAggregator,
    active: Mutex<HashMap<ScanId, ActiveScan>>,
    shutdown: CancellationToken,
    drivers: TaskTracker,
}

impl ServiceInner {
    fn active(&self) -> MutexGuard<'_, HashMap<ScanId, ActiveScan>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scan orchestration entry point.
///
/// Cheap to clone. Must be created inside a tokio runtime and shut down with
/// [`ScanService::shutdown`].
#[derive(Clone)]
pub struct ScanService {
    inner: Arc<ServiceInner>,
}

impl ScanService {
    pub fn new(config: Config, registry: AdapterRegistry, store: Arc<dyn ScanStore>) -> Self {
        Self::with_probe(config, registry, store, Box::new(SystemProbe::new()))
    }

    /// Build with a custom resource probe for the scheduler's autoscaler.
    pub fn with_probe(
        config: Config,
        registry: AdapterRegistry,
        store: Arc<dyn ScanStore>,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            config.scan.termination_grace(),
            probe,
        );
        let cache = Arc::new(ResultCache::new(&config.cache));
        let broadcaster = Arc::new(ProgressBroadcaster::new(config.scan.event_buffer));
        let workflow = ScanWorkflow::new(Arc::clone(&store), Arc::clone(&broadcaster));
        let aggregator = ResultAggregator::new(Arc::clone(&store));

        info!(
            adapters = ?registry.names(),
            cache_enabled = cache.is_enabled(),
            "Scan service initialized"
        );

        Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                scheduler,
                cache,
                broadcaster,
                store,
                workflow,
                aggregator,
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                drivers: TaskTracker::new(),
            }),
        }
    }

    pub async fn start_scan(
        &self,
        target: TargetIdentity,
        profile: ScanProfile,
    ) -> Result<ScanId, ScanServiceError> {
        self.start_scan_with(ScanRequest::new(target, profile)).await
    }

    /// Start a scan and return its id without waiting for it to run.
    ///
    /// A scan with no admittable adapter is recorded as failed and its id is
    /// still returned. A saturated scheduler rejects the request before any
    /// record is created.
    #[instrument(skip(self, request), fields(target = %request.target, profile = %request.profile))]
    pub async fn start_scan_with(&self, request: ScanRequest) -> Result<ScanId, ScanServiceError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown.into());
        }
        if let Some(names) = &request.adapters
            && let Some(unknown) = names.iter().find(|n| !inner.registry.contains(n))
        {
            return Err(ScanServiceError::UnknownAdapter(unknown.clone()));
        }

        let selection = select_adapters(&inner.registry, &inner.config.profiles, &request);
        let mut scan = Scan::new(request.target.clone(), request.profile);
        let skipped: Vec<ScannerRun> = selection
            .skipped
            .iter()
            .map(|s| ScannerRun::skipped(scan.id, s.adapter.as_str(), s.tier, s.reason.as_str()))
            .collect();

        if let Some(reason) = selection.failure() {
            inner.workflow.create(&scan, &skipped).await?;
            inner.workflow.fail(&mut scan, reason).await?;
            inner.broadcaster.forget(scan.id);
            return Ok(scan.id);
        }

        scan.adapters = selection.admitted_names();
        let contents = self.repository_fingerprint(&scan.target).await;
        let cancel = inner.shutdown.child_token();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tasks: Vec<ScheduledTask> = selection
            .admitted
            .iter()
            .map(|admitted| {
                self.build_task(&scan, admitted, contents.as_deref(), &cancel, events_tx.clone())
            })
            .collect();
        drop(events_tx);

        let handles = inner.scheduler.schedule_batch(tasks).inspect_err(|e| {
            warn!(scan_id = %scan.id, error = %e, "Scan rejected by scheduler");
        })?;

        let mut runs = Vec::with_capacity(handles.len() + skipped.len());
        let mut tasks = HashMap::with_capacity(handles.len());
        let mut priorities = Vec::with_capacity(handles.len());
        for (handle, admitted) in handles.iter().zip(&selection.admitted) {
            tasks.insert(handle.id, runs.len());
            priorities.push((admitted.tier, admitted.position));
            runs.push(ScannerRun::queued(scan.id, admitted.name(), admitted.tier));
        }
        runs.extend(skipped);

        inner
            .active()
            .insert(scan.id, ActiveScan { cancel: cancel.clone() });

        let persisted = async {
            inner.workflow.create(&scan, &runs).await?;
            inner.workflow.start(&mut scan).await
        }
        .await;
        if let Err(e) = persisted {
            cancel.cancel();
            for task_id in tasks.keys() {
                inner.scheduler.cancel(*task_id);
            }
            inner.active().remove(&scan.id);
            return Err(e.into());
        }

        let scan_id = scan.id;
        let driver = ScanDriver {
            inner: Arc::clone(inner),
            scan,
            runs,
            tasks,
            priorities,
            outputs: Vec::new(),
            settled: 0,
            events: events_rx,
            cancel,
        };
        inner.drivers.spawn(driver.run());

        Ok(scan_id)
    }

    /// Fingerprint of a local repository's files, so edits miss the cache.
    async fn repository_fingerprint(&self, target: &TargetIdentity) -> Option<String> {
        if !self.inner.cache.is_enabled() {
            return None;
        }
        let target = target.clone();
        tokio::task::spawn_blocking(move || content_fingerprint(&target))
            .await
            .inspect_err(|e| warn!(error = %e, "Repository fingerprint failed"))
            .ok()
            .flatten()
    }

    fn build_task(
        &self,
        scan: &Scan,
        admitted: &AdmittedAdapter,
        contents: Option<&str>,
        scan_cancel: &CancellationToken,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> ScheduledTask {
        let name = admitted.name().to_string();
        let settings = self.inner.config.adapter_settings(&name);
        let adapter_config = AdapterConfig {
            profile: scan.profile,
            options: settings.options,
            extra_args: settings.args,
        };
        let key = CacheKey::new(&scan.target, &name, &adapter_config).with_contents(contents);
        let adapter = Arc::clone(&admitted.adapter);
        let cache = Arc::clone(&self.inner.cache);
        let target = scan.target.clone();
        let adapter_name = name.clone();

        let job: TaskJob = Box::new(move |token, deadline| {
            async move {
                let (result, cache_hit) = cache
                    .get_or_compute(&key, &target, &adapter_name, &token, || {
                        adapter.run(&target, &adapter_config, token.clone(), deadline)
                    })
                    .await?;
                Ok(TaskSuccess { result, cache_hit })
            }
            .boxed()
        });

        ScheduledTask {
            scan_id: scan.id,
            timeout: self.inner.config.adapter_timeout(&name),
            adapter: name,
            tier: admitted.tier,
            cancel: scan_cancel.child_token(),
            job,
            events,
        }
    }

    pub async fn get_progress(&self, scan_id: ScanId) -> Result<ScanProgress, ScanServiceError> {
        let scan = self.load_scan(scan_id).await?;
        Ok(ScanProgress::from(&scan))
    }

    /// Scan, runs and findings; partial while the scan is still running.
    pub async fn get_results(&self, scan_id: ScanId) -> Result<ScanResults, ScanServiceError> {
        let scan = self.load_scan(scan_id).await?;
        let store = &self.inner.store;
        let runs = store.get_runs(scan_id).await?;
        let findings = store.get_findings(scan_id).await?;
        let summary = store.get_summary(scan_id).await?;
        Ok(ScanResults {
            still_running: !scan.is_terminal(),
            scan,
            runs,
            findings,
            summary,
        })
    }

    /// Request cancellation. Terminal scans acknowledge without change.
    pub async fn cancel_scan(&self, scan_id: ScanId) -> Result<(), ScanServiceError> {
        let token = self
            .inner
            .active()
            .get(&scan_id)
            .map(|active| active.cancel.clone());
        if let Some(token) = token {
            info!(%scan_id, "Scan cancellation requested");
            token.cancel();
            return Ok(());
        }

        let mut scan = self.load_scan(scan_id).await?;
        if scan.is_terminal() {
            debug!(%scan_id, status = %scan.status, "Cancel on terminal scan ignored");
            return Ok(());
        }
        self.inner
            .workflow
            .cancel(&mut scan, "Cancelled before execution")
            .await?;
        Ok(())
    }

    /// Progress events for a scan, starting from its current state.
    pub async fn subscribe(&self, scan_id: ScanId) -> Result<ProgressSubscription, ScanServiceError> {
        if let Some(subscription) = self.inner.broadcaster.subscribe(scan_id) {
            return Ok(subscription);
        }
        let scan = self.load_scan(scan_id).await?;
        Ok(ProgressSubscription::completed(ProgressEvent::from_scan(
            &scan, 0,
        )))
    }

    /// Wait until the scan is terminal and return its final progress.
    pub async fn wait_for_completion(
        &self,
        scan_id: ScanId,
    ) -> Result<ScanProgress, ScanServiceError> {
        let mut subscription = self.subscribe(scan_id).await?;
        while let Some(event) = subscription.next().await {
            if event.is_terminal() {
                return Ok(event.into());
            }
        }
        self.get_progress(scan_id).await
    }

    pub async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, ScanServiceError> {
        Ok(self.inner.store.list_scans(limit).await?)
    }

    pub fn list_adapters(&self) -> Vec<AdapterInfo> {
        self.inner
            .registry
            .iter()
            .map(|adapter| AdapterInfo {
                name: adapter.name().to_string(),
                available: adapter.is_available(),
                descriptor: adapter.descriptor().clone(),
            })
            .collect()
    }

    /// Drop cached results for a target so the next scan re-runs every tool.
    pub async fn invalidate_cache(&self, target: &TargetIdentity) {
        self.inner.cache.invalidate(target).await;
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.inner.scheduler.metrics()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn active_scans(&self) -> usize {
        self.inner.active().len()
    }

    /// Cancel active scans, let their drivers finalize, then stop the scheduler.
    pub async fn shutdown(&self) {
        info!(active = self.active_scans(), "Scan service shutting down");
        self.inner.shutdown.cancel();
        self.inner.drivers.close();
        self.inner.drivers.wait().await;
        self.inner.scheduler.shutdown().await;
        info!("Scan service stopped");
    }

    async fn load_scan(&self, scan_id: ScanId) -> Result<Scan, ScanServiceError> {
        self.inner
            .store
            .get_scan(scan_id)
            .await?
            .ok_or(ScanServiceError::NotFound(scan_id))
    }
}

/// Per-scan driver: the single writer for one running scan
struct ScanDriver {
    inner: Arc<ServiceInner>,
    scan: Scan,
    /// Admitted runs first (indexed by `tasks`), then skipped runs
    runs: Vec<ScannerRun>,
    tasks: HashMap<TaskId, usize>,
    /// (tier, candidate position) per admitted run
    priorities: Vec<(PriorityTier, usize)>,
    outputs: Vec<AdapterOutput>,
    settled: usize,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    cancel: CancellationToken,
}

impl ScanDriver {
    async fn run(mut self) {
        let scan_id = self.scan.id;
        if let Err(e) = self.drive().await {
            error!(%scan_id, error = %e, "Scan driver failed");
            self.abort(&e).await;
        }
        self.inner.active().remove(&scan_id);
        self.inner.broadcaster.forget(scan_id);
    }

    /// Stop outstanding tasks and end the scan after the driver failed.
    ///
    /// Subscribers always receive a terminal event, even when the store
    /// keeps rejecting writes.
    async fn abort(&mut self, cause: &WorkflowError) {
        self.cancel.cancel();
        for task_id in self.tasks.keys() {
            self.inner.scheduler.cancel(*task_id);
        }

        let detail = format!("Scan aborted: {}", cause);
        for run in self.runs.iter_mut().filter(|r| !r.state.is_terminal()) {
            if run
                .settle(RunState::Cancelled, 0, false, Some(detail.clone()))
                .is_err()
            {
                continue;
            }
            if let Err(e) = self.inner.workflow.record_run(run).await {
                debug!(scan_id = %self.scan.id, adapter = %run.adapter, error = %e, "Aborted run not recorded");
            }
        }

        if !self.scan.is_terminal()
            && let Err(e) = self.inner.workflow.cancel(&mut self.scan, &detail).await
        {
            warn!(scan_id = %self.scan.id, error = %e, "Aborted scan could not be persisted");
        }
        if self.scan.is_terminal() {
            self.inner.broadcaster.publish(&self.scan);
        }
    }

    async fn drive(&mut self) -> Result<(), WorkflowError> {
        let total = self.tasks.len();
        let mut grace_deadline: Option<Instant> = None;

        while self.settled < total {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event).await?,
                    None => {
                        warn!(
                            scan_id = %self.scan.id,
                            open = total - self.settled,
                            "Task channel closed before every run settled"
                        );
                        break;
                    }
                },
                _ = self.cancel.cancelled(), if grace_deadline.is_none() => {
                    info!(scan_id = %self.scan.id, open = total - self.settled, "Cancelling scan tasks");
                    for task_id in self.tasks.keys() {
                        // Running tasks are stopped through their tokens.
                        self.inner.scheduler.cancel(*task_id);
                    }
                    grace_deadline = Some(Instant::now() + self.inner.config.scan.cancel_grace());
                }
                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    warn!(
                        scan_id = %self.scan.id,
                        open = total - self.settled,
                        "Cancellation grace elapsed with runs still open"
                    );
                    break;
                }
            }
        }

        self.finalize().await
    }

    async fn handle(&mut self, event: TaskEvent) -> Result<(), WorkflowError> {
        match event {
            TaskEvent::Started { task_id, adapter } => {
                let Some(&index) = self.tasks.get(&task_id) else {
                    return Ok(());
                };
                let run = &mut self.runs[index];
                run.start()?;
                self.inner.workflow.record_run(run).await?;
                let progress = self.scan.progress;
                self.inner
                    .workflow
                    .progress(
                        &mut self.scan,
                        progress,
                        Some(format!("Running {} analysis", adapter)),
                    )
                    .await
            }
            TaskEvent::Finished(report) => self.settle(report).await,
        }
    }

    async fn settle(&mut self, report: TaskReport) -> Result<(), WorkflowError> {
        let Some(&index) = self.tasks.get(&report.task_id) else {
            return Ok(());
        };
        if self.runs[index].state.is_terminal() {
            return Ok(());
        }

        let duration_ms = report.duration.as_millis() as u64;
        let cancelled = self.cancel.is_cancelled();
        let (state, cache_hit, error) = match report.outcome {
            TaskOutcome::Succeeded(_) if cancelled => (
                RunState::Cancelled,
                false,
                Some("Result discarded: scan was cancelled".to_string()),
            ),
            TaskOutcome::Succeeded(TaskSuccess { result, cache_hit }) => {
                let (tier, position) = self.priorities[index];
                self.runs[index].finding_count = result.findings.len();
                self.outputs.push(AdapterOutput {
                    adapter: report.adapter.clone(),
                    tier,
                    position,
                    result,
                });
                (RunState::Succeeded, cache_hit, None)
            }
            TaskOutcome::Failed(e) => (RunState::Failed, false, Some(e.to_string())),
            TaskOutcome::TimedOut => {
                let timeout = self.inner.config.adapter_timeout(&report.adapter);
                (
                    RunState::TimedOut,
                    false,
                    Some(format!("Exceeded {}s timeout", timeout.as_secs())),
                )
            }
            TaskOutcome::Cancelled => (RunState::Cancelled, false, None),
        };

        let run = &mut self.runs[index];
        run.settle(state, duration_ms, cache_hit, error)?;
        self.inner.workflow.record_run(run).await?;
        self.settled += 1;

        let progress = progress_percent(self.settled, self.tasks.len());
        self.inner
            .workflow
            .progress(&mut self.scan, progress, None)
            .await
    }

    async fn finalize(&mut self) -> Result<(), WorkflowError> {
        for run in self.runs.iter_mut().filter(|r| !r.state.is_terminal()) {
            let duration_ms = run
                .started_at
                .map(|started| {
                    (chrono::Utc::now() - started)
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .as_millis() as u64
                })
                .unwrap_or(0);
            run.settle(
                RunState::Cancelled,
                duration_ms,
                false,
                Some("Did not settle before the scan finished".to_string()),
            )?;
            self.inner.workflow.record_run(run).await?;
        }

        let summary = self
            .inner
            .aggregator
            .aggregate(self.scan.id, &self.outputs, &self.runs)
            .await?;

        if self.cancel.is_cancelled() {
            self.inner
                .workflow
                .cancel(&mut self.scan, "Cancelled on request")
                .await
        } else {
            self.inner.workflow.complete(&mut self.scan, &summary).await
        }
    }
}
