use std::{
    ops::Deref,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use temp_dir::TempDir;
use tokio::sync::Mutex;

use crate::{
    clock::Time,
    job_registry::JobRegistry,
    worker::{Worker, WorkerBuilder},
    Job, QueueJob, Store,
};

#[derive(Debug)]
pub struct TestContext {
    pub counter: AtomicUsize,
    pub runs: AtomicUsize,
    pub values: Mutex<Vec<String>>,
}

impl TestContext {
    pub fn new() -> Arc<TestContext> {
        Arc::new(TestContext {
            counter: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            values: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    pub async fn push_str(&self, s: impl ToString) {
        let mut values = self.values.lock().await;
        values.push(s.to_string());
    }

    pub async fn get_values(&self) -> Vec<String> {
        let values = self.values.lock().await;
        values.clone()
    }
}

/// Adds one to the context's counter.
#[derive(Debug, Serialize, Deserialize)]
pub struct Count;

impl Job for Count {
    const KIND: &'static str = "count";
    type Context = Arc<TestContext>;

    async fn run(&self, context: Arc<TestContext>) -> eyre::Result<()> {
        context.counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Appends its label to the context's values.
#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub label: String,
}

impl Record {
    pub fn new(label: impl Into<String>) -> Self {
        Record {
            label: label.into(),
        }
    }
}

impl Job for Record {
    const KIND: &'static str = "record";
    type Context = Arc<TestContext>;

    async fn run(&self, context: Arc<TestContext>) -> eyre::Result<()> {
        context.push_str(&self.label).await;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlwaysFail {
    pub message: String,
}

impl Job for AlwaysFail {
    const KIND: &'static str = "always_fail";
    type Context = Arc<TestContext>;

    async fn run(&self, context: Arc<TestContext>) -> eyre::Result<()> {
        context.runs.fetch_add(1, Ordering::Relaxed);
        Err(eyre::eyre!("{}", self.message).wrap_err("job gave up"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Panics {
    pub message: String,
}

impl Job for Panics {
    const KIND: &'static str = "panics";
    type Context = Arc<TestContext>;

    async fn run(&self, _context: Arc<TestContext>) -> eyre::Result<()> {
        panic!("{}", self.message);
    }
}

/// Fails until it has run `failures` times, then succeeds.
#[derive(Debug, Serialize, Deserialize)]
pub struct Flaky {
    pub failures: usize,
}

impl Job for Flaky {
    const KIND: &'static str = "flaky";
    type Context = Arc<TestContext>;

    async fn run(&self, context: Arc<TestContext>) -> eyre::Result<()> {
        let run = context.runs.fetch_add(1, Ordering::Relaxed) + 1;
        if run > self.failures {
            context.counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(eyre::eyre!("fail on run {run}"))
        }
    }
}

/// Sleeps for the given number of seconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct Sleep {
    pub seconds: u64,
}

impl Job for Sleep {
    const KIND: &'static str = "sleep";
    type Context = Arc<TestContext>;

    async fn run(&self, context: Arc<TestContext>) -> eyre::Result<()> {
        tokio::time::sleep(Duration::from_secs(self.seconds)).await;
        context.counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub fn job_registry() -> JobRegistry<Arc<TestContext>> {
    JobRegistry::new()
        .register::<Count>()
        .register::<Record>()
        .register::<AlwaysFail>()
        .register::<Panics>()
        .register::<Flaky>()
        .register::<Sleep>()
}

pub struct TestStore {
    store: Store,
    pub path: PathBuf,
    #[allow(dead_code)]
    dir: TempDir,
}

impl Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

pub fn store_db_path(dir: &TempDir) -> PathBuf {
    dir.child("test.sqlite")
}

pub async fn create_test_store(dir: TempDir) -> TestStore {
    let path = store_db_path(&dir);
    let store = Store::new(&path).await.unwrap();

    TestStore { store, path, dir }
}

pub(crate) struct TestEnvironment {
    pub store: TestStore,
    pub registry: JobRegistry<Arc<TestContext>>,
    pub context: Arc<TestContext>,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Lazy::force(&TRACING);
        let dir = TempDir::new().unwrap();
        let store = create_test_store(dir).await;

        TestEnvironment {
            store,
            registry: job_registry(),
            context: TestContext::new(),
        }
    }

    pub fn time(&self) -> &Time {
        self.store.time()
    }

    pub fn worker(&self) -> WorkerBuilder<Arc<TestContext>> {
        Worker::builder(&self.store, self.context.clone()).registry(&self.registry)
    }

    /// Reserve the next job, panicking on store errors.
    pub async fn reserve(
        &self,
        queue: &str,
        retry_after_seconds: i64,
    ) -> Option<QueueJob<Arc<TestContext>>> {
        self.store
            .reserve_next(&self.registry, queue, retry_after_seconds)
            .await
            .unwrap()
    }
}

pub static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        configure_tracing();
    }
});

fn configure_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    let tree = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    let subscriber = tracing_subscriber::Registry::default().with(tree);

    tracing::subscriber::set_global_default(subscriber).unwrap();
}
