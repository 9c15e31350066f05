use tracing::instrument;

use crate::{Job, Result, Store};

/// The queue name used when no specific queue is specified.
pub const DEFAULT_QUEUE: &str = "default";

/// How a job should be enqueued.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// The queue to add the job to. Defaults to [DEFAULT_QUEUE].
    pub queue: String,
    /// How many seconds to wait before the job can run. Defaults to 0.
    pub delay_seconds: i64,
    /// How many times the job may be reserved before it fails permanently. Defaults to 1, so a
    /// job is not retried unless this is raised.
    pub max_attempts: i32,
    /// Jobs with higher `priority` are reserved first. Defaults to 0.
    pub priority: i32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            delay_seconds: 0,
            max_attempts: 1,
            priority: 0,
        }
    }
}

impl EnqueueOptions {
    /// Create options with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the delay before the job becomes available.
    pub fn delay_seconds(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Adds jobs to the queue.
///
/// This is the write path for code that produces work, such as request handlers. It does no
/// validation of its own; the [Store] clamps out-of-range values.
#[derive(Clone)]
pub struct Producer {
    store: Store,
}

impl Producer {
    /// Create a producer that writes to `store`.
    pub fn new(store: &Store) -> Self {
        Producer {
            store: store.clone(),
        }
    }

    /// Enqueue a job with the default [EnqueueOptions], returning its id.
    pub async fn enqueue<J: Job>(&self, job: &J) -> Result<i64> {
        self.enqueue_with(job, &EnqueueOptions::default()).await
    }

    /// Enqueue a job, returning its id.
    #[instrument(skip(self, job), fields(kind = J::KIND))]
    pub async fn enqueue_with<J: Job>(&self, job: &J, options: &EnqueueOptions) -> Result<i64> {
        self.store
            .enqueue(
                job,
                &options.queue,
                options.delay_seconds,
                options.max_attempts,
                options.priority,
            )
            .await
    }
}
