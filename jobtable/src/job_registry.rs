use std::{fmt::Debug, sync::Arc};

use ahash::HashMap;
use serde_json::value::RawValue;

use crate::{
    codec,
    job::{DecodedJob, ErasedJob},
    Error, Job, Result, SmartString,
};

type DecodeFn<CONTEXT> =
    Arc<dyn Fn(&RawValue) -> serde_json::Result<Box<dyn ErasedJob<CONTEXT>>> + Send + Sync>;

/// The closed set of job kinds that a worker knows how to decode and run.
///
/// Payloads tagged with any kind that is not in the registry are rejected with
/// [Error::InvalidPayload].
///
/// ```
/// # use serde::{Deserialize, Serialize};
/// # use jobtable::{Job, JobRegistry};
/// # #[derive(Serialize, Deserialize)]
/// # struct SendReminder;
/// # impl Job for SendReminder {
/// #     const KIND: &'static str = "send_reminder";
/// #     type Context = ();
/// #     async fn run(&self, _context: ()) -> eyre::Result<()> { Ok(()) }
/// # }
/// let registry = JobRegistry::new().register::<SendReminder>();
/// assert!(registry.contains("send_reminder"));
/// ```
pub struct JobRegistry<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    pub(crate) jobs: HashMap<SmartString, DecodeFn<CONTEXT>>,
}

impl<CONTEXT> Clone for JobRegistry<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    fn clone(&self) -> Self {
        JobRegistry {
            jobs: self.jobs.clone(),
        }
    }
}

impl<CONTEXT> Default for JobRegistry<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    fn default() -> Self {
        JobRegistry {
            jobs: HashMap::default(),
        }
    }
}

impl<CONTEXT> Debug for JobRegistry<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.jobs.keys()).finish()
    }
}

impl<CONTEXT> JobRegistry<CONTEXT>
where
    CONTEXT: Send + Sync + Debug + Clone + 'static,
{
    /// Create an empty registry.
    pub fn new() -> JobRegistry<CONTEXT> {
        Self::default()
    }

    /// Add a job type to the registry, returning the registry.
    pub fn register<J>(mut self) -> Self
    where
        J: Job<Context = CONTEXT>,
    {
        self.add::<J>();
        self
    }

    /// Add a job type to an existing registry.
    ///
    /// Panics if a job with the same [Job::KIND] was already registered.
    pub fn add<J>(&mut self)
    where
        J: Job<Context = CONTEXT>,
    {
        let decode: DecodeFn<CONTEXT> = Arc::new(
            |data: &RawValue| -> serde_json::Result<Box<dyn ErasedJob<CONTEXT>>> {
                let job = serde_json::from_str::<J>(data.get())?;
                Ok(Box::new(job))
            },
        );

        self.jobs
            .entry(SmartString::from(J::KIND))
            .and_modify(|_| {
                panic!("Job {} already exists", J::KIND);
            })
            .or_insert(decode);
    }

    /// Returns true if a job with this kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.jobs.contains_key(kind)
    }

    /// The registered job kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(|k| k.as_str())
    }

    /// Reconstruct a job from a payload created by [encode](crate::encode).
    pub fn decode(&self, payload: &str) -> Result<DecodedJob<CONTEXT>> {
        let envelope = codec::open(payload)?;
        let decode = self.jobs.get(envelope.kind.as_str()).ok_or_else(|| {
            Error::invalid_payload(format!("unknown job kind {}", envelope.kind))
        })?;

        let inner = decode(&envelope.data).map_err(|e| {
            Error::invalid_payload(format!("data for job kind {}: {e}", envelope.kind))
        })?;

        Ok(DecodedJob { inner })
    }
}
