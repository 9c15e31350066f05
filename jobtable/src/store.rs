use std::{path::Path, sync::Arc, time::Duration};

use deadpool_sqlite::{Hook, HookError};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{event, instrument, Level};

use crate::{
    clock::Time, codec, error::*, job_registry::JobRegistry, job_status::JobRecord, Job,
    QueueCounts, QueueJob,
};

pub(crate) mod complete;
pub(crate) mod enqueue;
pub(crate) mod inspect;
pub(crate) mod reserve;

pub(crate) use reserve::ReservedRow;

/// Options used to configure a [Store] instance.
pub struct StoreOptions<'a> {
    path: &'a Path,
    busy_timeout: Duration,
    pool_size: Option<usize>,
    retry_after: Duration,
}

impl<'a> StoreOptions<'a> {
    /// Create a new options object for a [Store]
    pub fn new(path: &'a Path) -> Self {
        StoreOptions {
            path,
            busy_timeout: Duration::from_secs(5),
            pool_size: None,
            retry_after: Duration::from_secs(90),
        }
    }

    /// How long a connection waits for another connection's write transaction to finish before
    /// giving up with a "database is locked" error. Defaults to 5 seconds.
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// The maximum number of pooled connections. Defaults to the `deadpool` default.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be at least 1");
        self.pool_size = Some(pool_size);
        self
    }

    /// How old a reservation must be before [Store::record], [Store::counts],
    /// [Store::failed_jobs] and [Store::retry_failed] treat it as abandoned. A job whose last
    /// attempt was abandoned is reported as failed. This should match the workers'
    /// `retry_after_seconds`. Defaults to 90 seconds.
    pub fn retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Build a [Store] from this options object.
    pub async fn build(self) -> Result<Store> {
        Store::with_options(self).await
    }
}

pub(crate) struct StoreData {
    pub pool: deadpool_sqlite::Pool,
    pub time: Time,
    pub retry_after_seconds: i64,
}

/// A handle to the jobs table. This is the only way to read or change queue state.
///
/// Cloning a `Store` is cheap, and all clones share the same connection pool. Several
/// processes may open a `Store` on the same database file; reservations stay exclusive across
/// all of them.
#[derive(Clone)]
pub struct Store(pub(crate) Arc<StoreData>);

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "synchronous", "normal")?;
    Ok(())
}

impl Store {
    /// Open or create a job database at the given path.
    pub async fn new(file: &Path) -> Result<Store> {
        Store::with_options(StoreOptions::new(file)).await
    }

    /// Create a builder object for a Store
    pub fn builder(path: &Path) -> StoreOptions {
        StoreOptions::new(path)
    }

    /// Open or create a job database with the given [StoreOptions].
    pub async fn with_options(options: StoreOptions<'_>) -> Result<Store> {
        let busy_timeout = options.busy_timeout;
        let retry_after_seconds = i64::try_from(options.retry_after.as_secs()).unwrap_or(i64::MAX);

        let mut conn = Connection::open(options.path).map_err(Error::open_database)?;
        conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get::<_, String>(0))
            .map_err(Error::open_database)?;
        configure_connection(&mut conn, busy_timeout).map_err(Error::open_database)?;
        crate::migrations::migrate(&mut conn)?;
        conn.close().map_err(|(_, e)| Error::open_database(e))?;

        let mut builder = deadpool_sqlite::Config::new(options.path)
            .builder(deadpool_sqlite::Runtime::Tokio1)
            .map_err(Error::open_database)?
            .recycle_timeout(Some(Duration::from_secs(5 * 60)))
            .post_create(Hook::async_fn(move |conn, _| {
                Box::pin(async move {
                    conn.interact(move |conn| configure_connection(conn, busy_timeout))
                        .await
                        .map_err(|e| HookError::Message(e.to_string().into()))?
                        .map_err(HookError::Backend)?;

                    Ok(())
                })
            }));

        if let Some(pool_size) = options.pool_size {
            builder = builder.max_size(pool_size);
        }

        let pool = builder.build().map_err(Error::open_database)?;

        Ok(Store(Arc::new(StoreData {
            pool,
            time: Time::new(),
            retry_after_seconds,
        })))
    }

    /// The clock used to timestamp queue operations.
    pub fn time(&self) -> &Time {
        &self.0.time
    }

    /// Reservations made at or before this timestamp have expired, as far as inspection is
    /// concerned.
    fn expired_before(&self) -> i64 {
        self.0
            .time
            .now_timestamp()
            .saturating_sub(self.0.retry_after_seconds)
    }

    /// Run `f` on a pooled connection inside an immediate transaction.
    ///
    /// The transaction takes the database write lock before running any statement, so no other
    /// connection can change the table between the reads and writes in `f`. If `f` returns an
    /// error the transaction is rolled back.
    pub(crate) async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.0.pool.get().await?;
        conn.interact(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await?
    }

    /// Run a read-only query on a pooled connection.
    pub(crate) async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.0.pool.get().await?;
        conn.interact(move |conn| f(conn)).await?
    }

    /// Add a job to the queue, returning the new row's id.
    ///
    /// The job becomes available `delay_seconds` from now. Negative delays are treated as zero,
    /// and `max_attempts` is raised to at least 1.
    #[instrument(skip(self, job), fields(kind = J::KIND))]
    pub async fn enqueue<J: Job>(
        &self,
        job: &J,
        queue: &str,
        delay_seconds: i64,
        max_attempts: i32,
        priority: i32,
    ) -> Result<i64> {
        let payload = codec::encode(job)?;
        let row = enqueue::NewJobRow {
            queue: queue.to_string(),
            payload,
            delay_seconds,
            max_attempts,
            priority,
        };

        let now = self.0.time.now_timestamp();
        let id = self.write(move |tx| enqueue::insert_job(tx, now, &row)).await?;
        event!(Level::DEBUG, %id, %queue, "enqueued job");
        Ok(id)
    }

    /// Atomically reserve the next eligible job in `queue` and decode it.
    ///
    /// A job is eligible when it is available, has attempts remaining, and is either unreserved
    /// or its reservation is at least `retry_after_seconds` old. Jobs are picked by priority
    /// (highest first), then by availability time, then by id.
    ///
    /// If the stored payload can't be decoded this returns [Error::InvalidPayload], and the row
    /// stays reserved with its attempt counted.
    pub async fn reserve_next<CONTEXT>(
        &self,
        registry: &JobRegistry<CONTEXT>,
        queue: &str,
        retry_after_seconds: i64,
    ) -> Result<Option<QueueJob<CONTEXT>>>
    where
        CONTEXT: Send + Sync + std::fmt::Debug + Clone + 'static,
    {
        self.reserve_next_row(queue, retry_after_seconds)
            .await?
            .map(|row| row.hydrate(registry))
            .transpose()
    }

    #[instrument(level = "debug", skip(self))]
    pub(crate) async fn reserve_next_row(
        &self,
        queue: &str,
        retry_after_seconds: i64,
    ) -> Result<Option<ReservedRow>> {
        let now = self.0.time.now_timestamp();
        let queue = queue.to_string();
        self.write(move |tx| reserve::reserve_next(tx, &queue, now, retry_after_seconds))
            .await
    }

    /// Delete a job after it completed successfully. Deleting a job that no longer exists is not
    /// an error.
    #[instrument(level = "debug", skip(self))]
    pub async fn mark_completed(&self, id: i64) -> Result<()> {
        self.write(move |tx| complete::delete_job(tx, id)).await
    }

    /// Record that a job failed permanently. The row is kept with its reservation cleared and
    /// `error` stored as its last error.
    #[instrument(level = "debug", skip(self, error))]
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let now = self.0.time.now_timestamp();
        let error = complete::truncate_error(error).to_string();
        self.write(move |tx| complete::fail_job(tx, id, now, &error))
            .await
    }

    /// Clear a job's reservation and make it available again after `delay_seconds`.
    #[instrument(level = "debug", skip(self))]
    pub async fn release(&self, id: i64, delay_seconds: i64) -> Result<()> {
        let now = self.0.time.now_timestamp();
        self.write(move |tx| complete::release_job(tx, id, now, delay_seconds))
            .await
    }

    /// Return the row for a job.
    pub async fn record(&self, id: i64) -> Result<JobRecord> {
        let expired_before = self.expired_before();
        self.read(move |conn| inspect::get_record(conn, id, expired_before))
            .await
    }

    /// Return counts of the jobs in a queue.
    pub async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let queue = queue.to_string();
        let expired_before = self.expired_before();
        self.read(move |conn| inspect::count_jobs(conn, &queue, expired_before))
            .await
    }

    /// List permanently failed jobs in a queue, most recently updated first.
    pub async fn failed_jobs(&self, queue: &str, limit: usize) -> Result<Vec<JobRecord>> {
        let queue = queue.to_string();
        let expired_before = self.expired_before();
        self.read(move |conn| inspect::failed_jobs(conn, &queue, limit, expired_before))
            .await
    }

    /// Put a permanently failed job back into circulation with a fresh set of attempts.
    ///
    /// Returns [Error::NotFound] if `id` is not a failed job.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, id: i64) -> Result<()> {
        let now = self.0.time.now_timestamp();
        let expired_before = self.expired_before();
        self.write(move |tx| inspect::retry_failed(tx, id, now, expired_before))
            .await
    }

    /// Delete a job regardless of its state. Returns false if there was no such job.
    #[instrument(skip(self))]
    pub async fn forget(&self, id: i64) -> Result<bool> {
        let deleted = self.write(move |tx| inspect::forget(tx, id)).await?;
        if !deleted {
            event!(Level::DEBUG, %id, "no job to forget");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use temp_dir::TempDir;

    use crate::{
        clock::MAX_TIMESTAMP,
        test_util::{create_test_store, Count, Record, TestEnvironment},
        Error, JobState, Store, DEFAULT_QUEUE,
    };

    #[tokio::test]
    async fn create_store() {
        let dir = TempDir::new().unwrap();
        create_test_store(dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_clamps_parameters() {
        let test = TestEnvironment::new().await;
        let now = test.time().now_timestamp();

        let id = test
            .store
            .enqueue(&Count, DEFAULT_QUEUE, -20, 0, 3)
            .await
            .unwrap();

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.queue, DEFAULT_QUEUE);
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.available_at.unix_timestamp(), now);
        assert_eq!(record.reserved_at, None);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.max_attempts, 1);
        assert_eq!(record.priority, 3);
        assert_eq!(record.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ids_increase() {
        let test = TestEnvironment::new().await;
        let first = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        let second = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_increments_attempts() {
        let test = TestEnvironment::new().await;
        let now = test.time().now_timestamp();
        let id = test.store.enqueue(&Count, "q", 0, 3, 0).await.unwrap();

        let job = test
            .store
            .reserve_next(&test.registry, "q", 90)
            .await
            .unwrap()
            .expect("job is reserved");
        assert_eq!(job.id, id);
        assert_eq!(job.queue, "q");
        assert_eq!(job.job.kind(), "count");
        assert_eq!(job.attempts, 1);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.reserved_at.map(|t| t.unix_timestamp()), Some(now));
        assert!(!job.is_final_attempt());

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Reserved);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_only_from_requested_queue() {
        let test = TestEnvironment::new().await;
        test.store.enqueue(&Count, "mail", 0, 1, 0).await.unwrap();

        let job = test
            .store
            .reserve_next(&test.registry, "reports", 90)
            .await
            .unwrap();
        assert!(job.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_is_not_available_early() {
        let test = TestEnvironment::new().await;
        test.store.enqueue(&Count, "q", 10, 1, 0).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(test.reserve("q", 90).await.is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(test.reserve("q", 90).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_order() {
        let test = TestEnvironment::new().await;

        // B is inserted first but becomes available a second after C.
        let b = test
            .store
            .enqueue(&Record::new("b"), "q", 1, 1, 10)
            .await
            .unwrap();
        let c = test
            .store
            .enqueue(&Record::new("c"), "q", 0, 1, 10)
            .await
            .unwrap();
        let a = test
            .store
            .enqueue(&Record::new("a"), "q", 1, 1, 5)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;

        let mut order = Vec::new();
        while let Some(job) = test.reserve("q", 90).await {
            order.push(job.id);
        }
        assert_eq!(order, vec![c, b, a]);
    }

    #[tokio::test(start_paused = true)]
    async fn ties_broken_by_insertion_order() {
        let test = TestEnvironment::new().await;
        let ids = [
            test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap(),
            test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap(),
            test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap(),
        ];

        for id in ids {
            assert_eq!(test.reserve("q", 90).await.map(|j| j.id), Some(id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_reserved_past_max_attempts() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 2, 0).await.unwrap();

        for attempt in 1..=2 {
            let job = test.reserve("q", 90).await.expect("job is reserved");
            assert_eq!(job.attempts, attempt);
            test.store.release(id, 0).await.unwrap();
        }

        assert!(test.reserve("q", 90).await.is_none());
        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.state, JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_reservation_becomes_eligible() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 3, 0).await.unwrap();

        let job = test.reserve("q", 90).await.expect("job is reserved");
        assert_eq!(job.attempts, 1);

        tokio::time::advance(Duration::from_secs(89)).await;
        assert!(test.reserve("q", 90).await.is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let job = test.reserve("q", 90).await.expect("job is reserved again");
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_schedules_backoff() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 3, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        let released_at = test.time().now_timestamp();
        test.store.release(id, 30).await.unwrap();

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.available_at.unix_timestamp(), released_at + 30);
        assert_eq!(record.reserved_at, None);
        assert_eq!(record.state, JobState::Pending);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(test.reserve("q", 90).await.is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(test.reserve("q", 90).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn release_clamps_negative_delay() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 3, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        test.store.release(id, -30).await.unwrap();
        assert!(test.reserve("q", 90).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_retained() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        test.store.mark_failed(id, "it broke").await.unwrap();

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("it broke"));
        assert_eq!(record.reserved_at, None);

        tokio::time::advance(Duration::from_secs(1000)).await;
        assert!(test.reserve("q", 90).await.is_none());

        let counts = test.store.counts("q").await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.reserved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_message_is_truncated() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        let message = "é".repeat(super::complete::MAX_ERROR_CHARS + 50);
        test.store.mark_failed(id, &message).await.unwrap();

        let record = test.store.record(id).await.unwrap();
        let last_error = record.last_error.unwrap();
        assert_eq!(
            last_error.chars().count(),
            super::complete::MAX_ERROR_CHARS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_idempotent() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        test.store.mark_completed(id).await.unwrap();
        test.store.mark_completed(id).await.unwrap();

        assert!(matches!(
            test.store.record(id).await.unwrap_err(),
            Error::NotFound
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_payload_stays_reserved() {
        let test = TestEnvironment::new().await;
        let now = test.time().now_timestamp();
        let id = test
            .store
            .write(move |tx| {
                let row = super::enqueue::NewJobRow {
                    queue: "q".to_string(),
                    payload: r#"{"kind":"format_disk","data":{}}"#.to_string(),
                    delay_seconds: 0,
                    max_attempts: 1,
                    priority: 0,
                };
                super::enqueue::insert_job(tx, now, &row)
            })
            .await
            .unwrap();

        let err = test
            .store
            .reserve_next(&test.registry, "q", 90)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.state, JobState::Reserved);

        // With its only attempt used, the row is never handed out again.
        tokio::time::advance(Duration::from_secs(91)).await;
        assert!(test.reserve("q", 90).await.is_none());
    }

    #[tokio::test]
    async fn single_winner_for_concurrent_reservations() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 5, 0).await.unwrap();

        let attempts = (0..8)
            .map(|_| {
                let store = test.store.clone();
                tokio::spawn(async move { store.reserve_next_row("q", 90).await })
            })
            .collect::<Vec<_>>();

        let winners = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|result| result.expect("task panicked").expect("reservation failed"))
            .collect::<Vec<_>>();

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, id);
        assert_eq!(test.store.record(id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn single_winner_across_separate_stores() {
        let test = TestEnvironment::new().await;
        let other = Store::new(&test.store.path).await.unwrap();
        let ids = [
            test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap(),
            test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap(),
        ];

        let tasks = (0..6)
            .map(|i| {
                let store = if i % 2 == 0 {
                    test.store.clone()
                } else {
                    other.clone()
                };
                tokio::spawn(async move { store.reserve_next_row("q", 90).await })
            })
            .collect::<Vec<_>>();

        let mut reserved = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|result| result.expect("task panicked").expect("reservation failed"))
            .map(|row| row.id)
            .collect::<Vec<_>>();
        reserved.sort();

        assert_eq!(reserved, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_failed_job() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");
        test.store.mark_failed(id, "boom").await.unwrap();

        let failed = test.store.failed_jobs("q", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);

        test.store.retry_failed(id).await.unwrap();
        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.last_error, None);

        assert!(test.reserve("q", 90).await.is_some());
        assert!(matches!(
            test.store.retry_failed(id).await.unwrap_err(),
            Error::NotFound
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_final_attempt_is_failed_after_expiry() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Reserved);
        assert_eq!(test.store.counts("q").await.unwrap().reserved, 1);
        assert!(test.store.failed_jobs("q", 10).await.unwrap().is_empty());

        // The worker never reports back.
        tokio::time::advance(Duration::from_secs(90)).await;

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        let counts = test.store.counts("q").await.unwrap();
        assert_eq!((counts.pending, counts.reserved, counts.failed), (0, 0, 1));
        let failed = test.store.failed_jobs("q", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
        assert_eq!(failed[0].last_error, None);

        test.store.retry_failed(id).await.unwrap();
        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.reserved_at, None);
        let job = test.reserve("q", 90).await.expect("job is reserved again");
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_retry_after_sets_inspection_window() {
        let test = TestEnvironment::new().await;
        let store = Store::builder(&test.store.path)
            .retry_after(Duration::from_secs(10))
            .build()
            .await
            .unwrap();
        let id = store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        store.reserve_next_row("q", 10).await.unwrap().expect("job is reserved");

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.record(id).await.unwrap().state, JobState::Reserved);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.record(id).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_delay_is_capped() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", i64::MAX, 1, 0).await.unwrap();

        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.available_at.unix_timestamp(), MAX_TIMESTAMP);
        assert!(test.reserve("q", 90).await.is_none());

        let id = test.store.enqueue(&Count, "q", 0, 2, 0).await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");
        test.store.release(id, i64::MAX).await.unwrap();
        let record = test.store.record(id).await.unwrap();
        assert_eq!(record.available_at.unix_timestamp(), MAX_TIMESTAMP);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_job() {
        let test = TestEnvironment::new().await;
        let id = test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();

        assert!(test.store.forget(id).await.unwrap());
        assert!(!test.store.forget(id).await.unwrap());
        assert!(test.reserve("q", 90).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_by_state() {
        let test = TestEnvironment::new().await;
        test.store.enqueue(&Count, "q", 0, 1, 0).await.unwrap();
        test.store.enqueue(&Count, "q", 60, 1, 0).await.unwrap();
        let failing = test.store.enqueue(&Count, "q", 0, 1, 10).await.unwrap();
        test.store.enqueue(&Count, "other", 0, 1, 0).await.unwrap();

        let job = test.reserve("q", 90).await.expect("job is reserved");
        assert_eq!(job.id, failing);
        test.store.mark_failed(failing, "boom").await.unwrap();
        test.reserve("q", 90).await.expect("job is reserved");

        let counts = test.store.counts("q").await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.reserved, 1);
        assert_eq!(counts.failed, 1);
    }
}
