//! Job admission and the fixed worker pool.
//!
//! `W` worker tasks share one FIFO queue. Each worker takes the next job,
//! runs it to completion through a [`JobRunner`], records the outcome on the
//! job and sends it down the job's one-shot reply channel. The submitting
//! caller holds the receiving end inside a [`JobHandle`] and waits on it
//! with its own budget; only the caller's task is suspended.
//!
//! Tracking entries live in a concurrent map keyed by job id. The handle's
//! `Drop` removes the entry whether the result was delivered, timed out or
//! simply abandoned, so the map cannot grow without bound. When the caller
//! gives up and `cancel_on_timeout` is set, dropping the handle also fires
//! the job's cancellation token and the pipeline stops at its next stage
//! boundary.

use crate::error::ServiceError;
use crate::job::{ConversionJob, JobId};
use crate::output::ConversionOutput;
use crate::path::ResourcePath;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// What a worker needs to run one job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub input: ResourcePath,
    pub output: ResourcePath,
    /// Fires when the caller stops waiting (or on shutdown).
    pub cancel: CancellationToken,
}

/// Executes one job from start to finish.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: JobContext) -> Result<ConversionOutput, ServiceError>;
}

/// A job record shared between its worker and observers.
pub type SharedJob = Arc<parking_lot::Mutex<ConversionJob>>;

type JobResult = Result<ConversionOutput, ServiceError>;

struct QueuedJob {
    ctx: JobContext,
    record: SharedJob,
    reply: oneshot::Sender<JobResult>,
}

struct Inner {
    queue: mpsc::UnboundedSender<QueuedJob>,
    jobs: Arc<DashMap<JobId, SharedJob>>,
    shutdown: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel_on_timeout: bool,
    worker_count: usize,
}

/// Cheap-to-clone handle on the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.inner.worker_count)
            .field("tracked", &self.inner.jobs.len())
            .field("cancel_on_timeout", &self.inner.cancel_on_timeout)
            .finish()
    }
}

impl Dispatcher {
    /// Spawn `workers` worker tasks (at least one) on the current runtime.
    pub fn start(runner: Arc<dyn JobRunner>, workers: usize, cancel_on_timeout: bool) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let handles = (0..workers)
            .map(|n| {
                tokio::spawn(worker_loop(
                    n,
                    Arc::clone(&runner),
                    Arc::clone(&rx),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!("Dispatcher started with {} workers", workers);

        Self {
            inner: Arc::new(Inner {
                queue: tx,
                jobs: Arc::new(DashMap::new()),
                shutdown,
                workers: parking_lot::Mutex::new(handles),
                cancel_on_timeout,
                worker_count: workers,
            }),
        }
    }

    /// Admit a job and queue it for the next free worker.
    pub fn submit(
        &self,
        input: ResourcePath,
        output: ResourcePath,
    ) -> Result<JobHandle, ServiceError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ServiceError::Internal("dispatcher is shutting down".into()));
        }

        let job = ConversionJob::new(input.clone(), output.clone());
        let id = job.id;
        let record: SharedJob = Arc::new(parking_lot::Mutex::new(job));
        let cancel = self.inner.shutdown.child_token();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.inner.jobs.insert(id, Arc::clone(&record));

        let queued = QueuedJob {
            ctx: JobContext {
                id,
                input,
                output,
                cancel: cancel.clone(),
            },
            record: Arc::clone(&record),
            reply: reply_tx,
        };

        if self.inner.queue.send(queued).is_err() {
            self.inner.jobs.remove(&id);
            return Err(ServiceError::Internal("dispatcher queue is closed".into()));
        }

        debug!("Job {} queued ({} tracked)", id, self.inner.jobs.len());

        Ok(JobHandle {
            id,
            record,
            cancel,
            reply: reply_rx,
            jobs: Arc::clone(&self.inner.jobs),
            delivered: false,
            cancel_on_timeout: self.inner.cancel_on_timeout,
        })
    }

    /// Number of jobs whose handles are still alive.
    pub fn tracked(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Copies of every tracked job, oldest first.
    pub fn snapshots(&self) -> Vec<ConversionJob> {
        let mut jobs: Vec<ConversionJob> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    pub fn workers(&self) -> usize {
        self.inner.worker_count
    }

    /// Stop accepting jobs and wait for workers to finish their current job.
    ///
    /// Jobs still queued are dropped; their callers observe `Cancelled`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        for h in handles {
            if let Err(e) = h.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
        info!("Dispatcher stopped");
    }
}

async fn worker_loop(
    n: usize,
    runner: Arc<dyn JobRunner>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", n);
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = next else { break };
        let span = tracing::info_span!("job", job_id = %job.ctx.id, worker = n);
        run_one(&runner, job).instrument(span).await;
    }
    debug!("Worker {} stopped", n);
}

async fn run_one(runner: &Arc<dyn JobRunner>, job: QueuedJob) {
    let QueuedJob { ctx, record, reply } = job;
    let id = ctx.id;

    // Abandoned while queued.
    if ctx.cancel.is_cancelled() {
        let err = ServiceError::Cancelled;
        if let Err(e) = record.lock().fail(&err) {
            warn!("{}", e);
        }
        debug!("Job {} cancelled before start", id);
        let _ = reply.send(Err(err));
        return;
    }

    if let Err(e) = record.lock().start() {
        error!("{}", e);
        let _ = reply.send(Err(e));
        return;
    }
    info!("Job {} running: {} → {}", id, ctx.input, ctx.output);

    // Run inside its own task so a panic fails this job only.
    let task_runner = Arc::clone(runner);
    let result = match tokio::spawn(async move { task_runner.run(ctx).await }.in_current_span())
        .await
    {
        Ok(result) => result,
        Err(join_err) => Err(ServiceError::Internal(format!(
            "job task failed: {join_err}"
        ))),
    };

    {
        let mut rec = record.lock();
        let recorded = match &result {
            Ok(out) => rec.succeed(out.markdown.clone()),
            Err(e) => rec.fail(e),
        };
        if let Err(e) = recorded {
            warn!("{}", e);
        }
    }

    match &result {
        Ok(out) => info!(
            "Job {} succeeded: {} pages, {} regions in {}ms",
            id, out.stats.total_pages, out.stats.total_regions, out.stats.total_duration_ms
        ),
        Err(e) => error!("Job {} failed: {}", id, e),
    }

    if reply.send(result).is_err() {
        debug!("Job {}: caller stopped waiting, result dropped", id);
    }
}

/// The caller's side of a submitted job.
pub struct JobHandle {
    id: JobId,
    record: SharedJob,
    cancel: CancellationToken,
    reply: oneshot::Receiver<JobResult>,
    jobs: Arc<DashMap<JobId, SharedJob>>,
    delivered: bool,
    cancel_on_timeout: bool,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The live job record. Stays valid after the handle is dropped.
    pub fn record(&self) -> SharedJob {
        Arc::clone(&self.record)
    }

    /// Cancel the job explicitly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait up to `budget` for the job's outcome.
    ///
    /// On elapse returns `Timeout`; the job itself is cancelled when the
    /// handle drops if the dispatcher was started with `cancel_on_timeout`.
    pub async fn wait(mut self, budget: Duration) -> Result<ConversionOutput, ServiceError> {
        match tokio::time::timeout(budget, &mut self.reply).await {
            Ok(Ok(result)) => {
                self.delivered = true;
                result
            }
            Ok(Err(_)) => {
                // Worker pool shut down before the job ran.
                self.delivered = true;
                Err(ServiceError::Cancelled)
            }
            Err(_) => {
                warn!("Job {}: no result within {:?}", self.id, budget);
                Err(ServiceError::Timeout {
                    budget_ms: budget.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.jobs.remove(&self.id);
        if !self.delivered && self.cancel_on_timeout {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::output::ConversionStats;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn output_for(job: &JobContext) -> ConversionOutput {
        ConversionOutput {
            job_id: job.id,
            markdown: format!("converted {}", job.input),
            output_path: job.output.clone(),
            markdown_path: job.output.with_key_suffix(".md"),
            json_path: job.output.with_key_suffix(".json"),
            stats: ConversionStats::default(),
        }
    }

    /// Sleeps, honouring cancellation, and tracks peak concurrency.
    struct SleepyRunner {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        order: parking_lot::Mutex<Vec<String>>,
    }

    impl SleepyRunner {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                order: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobRunner for SleepyRunner {
        async fn run(&self, job: JobContext) -> Result<ConversionOutput, ServiceError> {
            self.order.lock().push(job.input.to_string());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = job.cancel.cancelled() => Err(ServiceError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(output_for(&job)),
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl JobRunner for PanickingRunner {
        async fn run(&self, _job: JobContext) -> Result<ConversionOutput, ServiceError> {
            panic!("boom");
        }
    }

    async fn wait_terminal(record: &SharedJob) -> JobState {
        for _ in 0..200 {
            let state = record.lock().state;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        record.lock().state
    }

    #[tokio::test]
    async fn result_is_delivered_and_entry_removed() {
        let d = Dispatcher::start(Arc::new(SleepyRunner::new(Duration::from_millis(5))), 2, true);
        let h = d.submit(p("s3://b/a.pdf"), p("s3://b/a.pdf")).unwrap();
        assert_eq!(d.tracked(), 1);
        let out = h.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.markdown, "converted s3://b/a.pdf");
        assert_eq!(d.tracked(), 0);
    }

    #[tokio::test]
    async fn single_worker_is_fifo() {
        let runner = Arc::new(SleepyRunner::new(Duration::from_millis(2)));
        let d = Dispatcher::start(runner.clone(), 1, true);
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let path = p(&format!("s3://b/{i}.pdf"));
                d.submit(path.clone(), path).unwrap()
            })
            .collect();
        for h in handles {
            h.wait(Duration::from_secs(5)).await.unwrap();
        }
        let order = runner.order.lock().clone();
        let expected: Vec<String> = (0..5).map(|i| format!("s3://b/{i}.pdf")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let runner = Arc::new(SleepyRunner::new(Duration::from_millis(30)));
        let d = Dispatcher::start(runner.clone(), 3, true);
        let handles: Vec<_> = (0..9)
            .map(|i| {
                let path = p(&format!("s3://b/{i}.pdf"));
                d.submit(path.clone(), path).unwrap()
            })
            .collect();
        for h in handles {
            h.wait(Duration::from_secs(5)).await.unwrap();
        }
        assert_eq!(runner.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_cancels_job_when_configured() {
        let d = Dispatcher::start(Arc::new(SleepyRunner::new(Duration::from_secs(30))), 1, true);
        let h = d.submit(p("s3://b/slow.pdf"), p("s3://b/slow.pdf")).unwrap();
        let record = h.record();

        let started = std::time::Instant::now();
        let err = h.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { budget_ms: 50 }));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(wait_terminal(&record).await, JobState::Failed);
        assert_eq!(d.tracked(), 0);
    }

    #[tokio::test]
    async fn timeout_without_cancel_lets_job_finish() {
        let d = Dispatcher::start(
            Arc::new(SleepyRunner::new(Duration::from_millis(100))),
            1,
            false,
        );
        let h = d.submit(p("s3://b/slow.pdf"), p("s3://b/slow.pdf")).unwrap();
        let record = h.record();
        let err = h.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
        assert_eq!(wait_terminal(&record).await, JobState::Succeeded);
    }

    #[tokio::test]
    async fn panicking_job_fails_without_killing_worker() {
        let d = Dispatcher::start(Arc::new(PanickingRunner), 1, true);
        for _ in 0..2 {
            let h = d.submit(p("s3://b/x.pdf"), p("s3://b/x.pdf")).unwrap();
            let err = h.wait(Duration::from_secs(5)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Internal(_)));
        }
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let d = Dispatcher::start(Arc::new(SleepyRunner::new(Duration::from_millis(1))), 1, true);
        d.shutdown().await;
        assert!(d.submit(p("s3://b/x.pdf"), p("s3://b/x.pdf")).is_err());
    }

    #[tokio::test]
    async fn snapshots_list_tracked_jobs() {
        let d = Dispatcher::start(Arc::new(SleepyRunner::new(Duration::from_millis(200))), 1, true);
        let a = d.submit(p("s3://b/a.pdf"), p("s3://b/a.pdf")).unwrap();
        let b = d.submit(p("s3://b/b.pdf"), p("s3://b/b.pdf")).unwrap();
        let snaps = d.snapshots();
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().any(|j| j.id == a.id()));
        assert!(snaps.iter().any(|j| j.id == b.id()));
        drop(a);
        drop(b);
        assert_eq!(d.tracked(), 0);
    }
}
