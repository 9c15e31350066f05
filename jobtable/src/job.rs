use std::fmt::{Debug, Display};

use futures::{future::BoxFuture, Future, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use time::OffsetDateTime;

/// A unit of work that can be stored in the queue and run later by a [Worker](crate::Worker).
///
/// The job's fields are its payload. They are serialized with `serde` when the job is
/// enqueued and deserialized again when a worker reserves it, so the value that runs is a copy
/// of the value that was enqueued, not the original.
///
/// ```
/// # use serde::{Deserialize, Serialize};
/// use jobtable::Job;
///
/// #[derive(Serialize, Deserialize)]
/// struct SendReminder {
///     email: String,
/// }
///
/// impl Job for SendReminder {
///     const KIND: &'static str = "send_reminder";
///     type Context = ();
///
///     async fn run(&self, _context: ()) -> eyre::Result<()> {
///         // send the email here
///         Ok(())
///     }
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The tag stored with the payload, used to find this type again when decoding.
    ///
    /// This must be unique among the jobs registered in a [JobRegistry](crate::JobRegistry).
    const KIND: &'static str;

    /// Application data provided to the job when it runs, such as a database pool or an HTTP
    /// client. All jobs in a registry share the same context type.
    type Context: Send + Sync + Debug + Clone + 'static;

    /// Do the work. Returning an error marks this attempt as failed.
    fn run(&self, context: Self::Context) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// A decoded job with its concrete type erased.
pub(crate) trait ErasedJob<CONTEXT>: Send + Sync {
    fn kind_name(&self) -> &'static str;

    fn execute(&self, context: CONTEXT) -> BoxFuture<'_, eyre::Result<()>>;
}

impl<J: Job> ErasedJob<J::Context> for J {
    fn kind_name(&self) -> &'static str {
        J::KIND
    }

    fn execute(&self, context: J::Context) -> BoxFuture<'_, eyre::Result<()>> {
        Job::run(self, context).boxed()
    }
}

/// A job value reconstructed from a payload by a [JobRegistry](crate::JobRegistry).
pub struct DecodedJob<CONTEXT> {
    pub(crate) inner: Box<dyn ErasedJob<CONTEXT>>,
}

impl<CONTEXT> DecodedJob<CONTEXT> {
    /// The [Job::KIND] of the decoded job.
    pub fn kind(&self) -> &'static str {
        self.inner.kind_name()
    }

    /// Run the job.
    pub async fn run(&self, context: CONTEXT) -> eyre::Result<()> {
        self.inner.execute(context).await
    }
}

impl<CONTEXT> Debug for DecodedJob<CONTEXT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedJob")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// A job that a worker has reserved from the queue.
#[derive(Debug)]
pub struct QueueJob<CONTEXT> {
    /// The id of the job's row.
    pub id: i64,
    /// The queue the job was reserved from.
    pub queue: String,
    /// The decoded job.
    pub job: DecodedJob<CONTEXT>,
    /// The earliest time at which the job could be reserved.
    pub available_at: OffsetDateTime,
    /// When the current reservation was made.
    pub reserved_at: Option<OffsetDateTime>,
    /// How many times the job has been reserved, including the current reservation.
    pub attempts: i32,
    /// The number of reservations allowed before the job fails permanently.
    pub max_attempts: i32,
    /// The error from the last failed attempt, if there was one.
    pub last_error: Option<String>,
}

impl<CONTEXT> QueueJob<CONTEXT> {
    /// Returns true if a failure of this attempt is final.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl<CONTEXT> Display for QueueJob<CONTEXT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Job {{ id: {}, kind: {}, queue: {}, attempt: {}/{} }}",
            self.id,
            self.job.kind(),
            self.queue,
            self.attempts,
            self.max_attempts
        )
    }
}
