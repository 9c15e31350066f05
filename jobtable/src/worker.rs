use std::{any::Any, fmt::Debug, panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{event, instrument, span, Instrument, Level};

use crate::{
    job_registry::JobRegistry, producer::DEFAULT_QUEUE, store::ReservedRow, Job, Result, Store,
};

/// Settings for a worker run.
///
/// Negative durations are treated as zero and a negative `max_jobs` as unlimited.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// The queue to reserve jobs from. Defaults to [DEFAULT_QUEUE].
    pub queue: String,
    /// Stop after this many jobs complete successfully. 0, the default, means no limit.
    pub max_jobs: i64,
    /// How long to wait before polling again when the queue is empty. When this is 0,
    /// [Worker::work] returns as soon as the queue is empty. Defaults to 5 seconds.
    pub sleep_seconds: i64,
    /// How old a reservation must be before it is considered abandoned and the job can be
    /// reserved again. Defaults to 90 seconds.
    pub retry_after_seconds: i64,
    /// How long a failed job waits before it can be retried. Defaults to 30 seconds.
    pub backoff_seconds: i64,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_jobs: 0,
            sleep_seconds: 5,
            retry_after_seconds: 90,
            backoff_seconds: 30,
        }
    }
}

impl WorkerOptions {
    /// Create options with default values for the given queue.
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    fn job_limit(&self) -> usize {
        usize::try_from(self.max_jobs.max(0)).unwrap_or(usize::MAX)
    }

    fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds.max(0) as u64)
    }
}

/// What happened when a worker tried to run one job. Returned by [Worker::run_next].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No job was available.
    Idle,
    /// A job ran and was deleted.
    Completed,
    /// A job was reserved but failed, and was either released or marked as failed.
    Failed,
}

/// Identifying details of a reserved job, used to record a failure.
struct Attempt<'a> {
    id: i64,
    kind: &'a str,
    queue: &'a str,
    attempts: i32,
    max_attempts: i32,
    is_final: bool,
}

impl<'a> Attempt<'a> {
    fn from_row(row: &'a ReservedRow, kind: &'a str) -> Self {
        Attempt {
            id: row.id,
            kind,
            queue: &row.queue,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            is_final: row.is_final_attempt(),
        }
    }
}

/// Reserves jobs from a [Store] and runs them, one at a time.
///
/// To process a queue with more parallelism, run several workers, in one process or many,
/// against the same database. The store's reservations keep them from running the same job.
pub struct Worker<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    store: Store,
    registry: JobRegistry<CONTEXT>,
    context: CONTEXT,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<CONTEXT> Worker<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    /// Create a [WorkerBuilder] for a worker on `store`. The `context` is passed to every job
    /// that the worker runs.
    pub fn builder(store: &Store, context: CONTEXT) -> WorkerBuilder<CONTEXT> {
        WorkerBuilder::new(store, context)
    }

    /// Reserve and run at most one job.
    ///
    /// Returns true if a job ran successfully, and false if the queue had no available job or the
    /// job failed. Failures of the job itself are recorded in the store and never returned
    /// as an error; errors from the store are.
    ///
    /// Use [Worker::run_next] to tell an empty queue apart from a failed job.
    pub async fn run_once(&self, options: &WorkerOptions) -> Result<bool> {
        let outcome = self.run_next(options).await?;
        Ok(outcome == RunOutcome::Completed)
    }

    /// Run jobs until `max_jobs` have completed, or until the queue is empty when
    /// `sleep_seconds` is 0, or until shutdown is signalled. When the queue is empty the worker
    /// sleeps for `sleep_seconds` and polls again.
    ///
    /// Returns the number of jobs that completed successfully.
    #[instrument(skip(self), fields(queue = %options.queue))]
    pub async fn work(&self, options: &WorkerOptions) -> Result<usize> {
        let max_jobs = options.job_limit();
        let sleep = options.idle_sleep();
        let mut processed = 0;

        loop {
            if self.shutdown_requested() {
                event!(Level::INFO, "shutdown requested, stopping worker");
                break;
            }

            match self.run_next(options).await? {
                RunOutcome::Completed => {
                    processed += 1;
                    if max_jobs > 0 && processed >= max_jobs {
                        break;
                    }
                }
                RunOutcome::Failed => {}
                RunOutcome::Idle => {
                    if sleep.is_zero() {
                        event!(Level::DEBUG, "queue is empty, stopping worker");
                        break;
                    }

                    event!(Level::TRACE, ?sleep, "no job available, polling again later");
                    if !self.idle(sleep).await {
                        event!(Level::INFO, "shutdown requested, stopping worker");
                        break;
                    }
                }
            }
        }

        Ok(processed)
    }

    /// Reserve and run at most one job, and report what happened to it.
    ///
    /// Like [Worker::run_once], job failures are recorded in the store and only store errors
    /// are returned.
    pub async fn run_next(&self, options: &WorkerOptions) -> Result<RunOutcome> {
        let Some(row) = self
            .store
            .reserve_next_row(&options.queue, options.retry_after_seconds)
            .await?
        else {
            return Ok(RunOutcome::Idle);
        };

        let job = match row.hydrate(&self.registry) {
            Ok(job) => job,
            Err(e) => {
                let error = e.to_string();
                let attempt = Attempt::from_row(&row, "unknown");
                self.reject(&attempt, &error, options.backoff_seconds)
                    .await?;
                return Ok(RunOutcome::Failed);
            }
        };

        let span = span!(Level::INFO, "run_job", job = %job);
        let result = AssertUnwindSafe(job.job.run(self.context.clone()).instrument(span))
            .catch_unwind()
            .await;

        let error = match result {
            Ok(Ok(())) => {
                self.store.mark_completed(job.id).await?;
                event!(
                    Level::INFO,
                    job_id = %job.id,
                    kind = job.job.kind(),
                    queue = %job.queue,
                    attempts = job.attempts,
                    "job completed"
                );
                return Ok(RunOutcome::Completed);
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic),
        };

        let attempt = Attempt {
            id: job.id,
            kind: job.job.kind(),
            queue: &job.queue,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            is_final: job.is_final_attempt(),
        };
        self.reject(&attempt, &error, options.backoff_seconds)
            .await?;
        Ok(RunOutcome::Failed)
    }

    /// Record a failed attempt, either failing the job for good or scheduling a retry.
    async fn reject(&self, attempt: &Attempt<'_>, error: &str, backoff_seconds: i64) -> Result<()> {
        if attempt.is_final {
            self.store.mark_failed(attempt.id, error).await?;
            event!(
                Level::ERROR,
                job_id = %attempt.id,
                kind = attempt.kind,
                queue = attempt.queue,
                attempts = attempt.attempts,
                max_attempts = attempt.max_attempts,
                %error,
                "job failed permanently"
            );
        } else {
            let backoff = backoff_seconds.max(0);
            self.store.release(attempt.id, backoff).await?;
            event!(
                Level::WARN,
                job_id = %attempt.id,
                kind = attempt.kind,
                queue = attempt.queue,
                attempts = attempt.attempts,
                max_attempts = attempt.max_attempts,
                backoff,
                %error,
                "job failed, will retry"
            );
        }

        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Sleep while the queue is empty. Returns false if shutdown was signalled during the sleep.
    async fn idle(&self, duration: Duration) -> bool {
        let Some(shutdown) = self.shutdown.as_ref() else {
            tokio::time::sleep(duration).await;
            return true;
        };

        let mut shutdown = shutdown.clone();
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => true,
            stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                if !stopped {
                    // The sender is gone, so no shutdown can arrive. Finish the sleep.
                    sleep.await;
                }
                !stopped
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Job panicked: {s}")
    } else {
        "Job panicked".to_string()
    }
}

/// A builder object for a [Worker].
pub struct WorkerBuilder<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    store: Store,
    context: CONTEXT,
    registry: JobRegistry<CONTEXT>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<CONTEXT> WorkerBuilder<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    /// Create a new builder.
    pub fn new(store: &Store, context: CONTEXT) -> Self {
        Self {
            store: store.clone(),
            context,
            registry: JobRegistry::new(),
            shutdown: None,
        }
    }

    /// Use the jobs from this registry, replacing any jobs that were already added.
    pub fn registry(mut self, registry: &JobRegistry<CONTEXT>) -> Self {
        self.registry = registry.clone();
        self
    }

    /// Add a job type for the worker to run.
    pub fn job<J>(mut self) -> Self
    where
        J: Job<Context = CONTEXT>,
    {
        self.registry.add::<J>();
        self
    }

    /// Stop the worker when this channel's value becomes `true`. The worker checks between jobs
    /// and while idle. A running job is never interrupted.
    pub fn shutdown_signal(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the [Worker].
    pub fn build(self) -> Worker<CONTEXT> {
        Worker {
            store: self.store,
            registry: self.registry,
            context: self.context,
            shutdown: self.shutdown,
        }
    }
}
