#![warn(missing_docs)]
//! A job queue stored in a single SQLite table, with atomic reservations, retries and backoff.
//!
//! Producers insert jobs with [Producer]. Workers, in one process or many, reserve them with
//! [Worker]. Each reservation counts as an attempt; a job that fails is retried after a backoff
//! until it runs out of attempts, and is then kept in the table for inspection.
//!
//! ```no_run
//! # use std::path::Path;
//! # use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use jobtable::{EnqueueOptions, Job, Producer, Store, Worker, WorkerOptions};
//!
//! #[derive(Debug)]
//! pub struct JobContext {
//!    // database pool or other things here
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct RemindMe {
//!   email: String,
//!   message: String,
//! }
//!
//! impl Job for RemindMe {
//!     const KIND: &'static str = "remind_me";
//!     type Context = Arc<JobContext>;
//!
//!     async fn run(&self, context: Arc<JobContext>) -> eyre::Result<()> {
//!         // send the reminder
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), jobtable::Error> {
//!   let store = Store::new(Path::new("jobtable.db")).await?;
//!
//!   // Submit a job to run in an hour.
//!   let producer = Producer::new(&store);
//!   let job_id = producer
//!     .enqueue_with(
//!       &RemindMe {
//!         email: "me@example.com".to_string(),
//!         message: "Time to go!".to_string(),
//!       },
//!       &EnqueueOptions::new().delay_seconds(3600).max_attempts(3),
//!     )
//!     .await?;
//!
//!   // Run jobs until the queue is empty.
//!   let context = Arc::new(JobContext {});
//!   let worker = Worker::builder(&store, context).job::<RemindMe>().build();
//!   let options = WorkerOptions {
//!     sleep_seconds: 0,
//!     ..Default::default()
//!   };
//!   let processed = worker.work(&options).await?;
//!
//!   Ok(())
//! }
//! ```

mod clock;
mod codec;
mod error;
mod job;
mod job_registry;
mod job_status;
mod migrations;
mod producer;
mod store;
mod worker;

#[cfg(test)]
mod test_util;

pub use clock::Time;
pub use codec::encode;
pub use error::{Error, Result};
pub use job::{DecodedJob, Job, QueueJob};
pub use job_registry::JobRegistry;
pub use job_status::{JobRecord, JobState, QueueCounts};
pub use producer::{EnqueueOptions, Producer, DEFAULT_QUEUE};
pub use store::{Store, StoreOptions};
pub use worker::{RunOutcome, Worker, WorkerBuilder, WorkerOptions};

pub(crate) type SmartString = smartstring::SmartString<smartstring::LazyCompact>;
