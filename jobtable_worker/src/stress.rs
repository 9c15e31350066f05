use std::{path::Path, time::Duration};

use eyre::{eyre, Result};
use futures::future::try_join_all;
use jobtable::{Producer, Store, Worker, WorkerOptions, DEFAULT_QUEUE};
use tracing::{event, Level};

use crate::jobs::{self, DemoContext, Noop};

#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub num_jobs: usize,
    pub num_workers: usize,
    pub num_submit_tasks: usize,
}

#[derive(Debug)]
pub struct StressReport {
    pub processed: usize,
    pub elapsed: Duration,
}

async fn submit_task(store: Store, start: usize, count: usize) -> Result<()> {
    let producer = Producer::new(&store);
    for tag in start..start + count {
        producer
            .enqueue(&Noop {
                tag: Some(tag as u64),
            })
            .await?;
    }
    Ok(())
}

/// Split `num_jobs` tags into one `(start, count)` range per task. The first tasks take one
/// extra job each when the split is uneven.
fn task_ranges(num_jobs: usize, num_tasks: usize) -> impl Iterator<Item = (usize, usize)> {
    let num_tasks = num_tasks.max(1);
    let base = num_jobs / num_tasks;
    let extra = num_jobs % num_tasks;
    (0..num_tasks).map(move |i| {
        let start = i * base + i.min(extra);
        let count = base + usize::from(i < extra);
        (start, count)
    })
}

/// Fill the queue at `path`, then drain it with several workers that each open their own
/// [Store], and check that every job ran exactly once.
pub async fn run(path: &Path, options: StressOptions) -> Result<StressReport> {
    let store = Store::new(path).await?;
    let expected = options.num_jobs;

    let submit_tasks = task_ranges(expected, options.num_submit_tasks)
        .map(|(start, count)| tokio::spawn(submit_task(store.clone(), start, count)))
        .collect::<Vec<_>>();
    for task in try_join_all(submit_tasks).await? {
        task?;
    }
    event!(Level::INFO, jobs = expected, "submitted jobs");

    let context = DemoContext::new();
    let registry = jobs::registry();
    let worker_options = WorkerOptions {
        sleep_seconds: 0,
        ..Default::default()
    };

    let start = tokio::time::Instant::now();
    let mut worker_tasks = Vec::with_capacity(options.num_workers);
    for _ in 0..options.num_workers.max(1) {
        let worker_store = Store::new(path).await?;
        let worker = Worker::builder(&worker_store, context.clone())
            .registry(&registry)
            .build();
        let worker_options = worker_options.clone();
        worker_tasks.push(tokio::spawn(
            async move { worker.work(&worker_options).await },
        ));
    }

    let mut processed = 0;
    for count in try_join_all(worker_tasks).await? {
        processed += count?;
    }
    let elapsed = start.elapsed();

    let runs = context.runs();
    let duplicates = runs.values().filter(|&&count| count > 1).count();
    if duplicates > 0 {
        return Err(eyre!("{duplicates} jobs ran more than once"));
    }
    if runs.len() != expected || processed != expected {
        return Err(eyre!(
            "expected {expected} jobs to run, but {} ran and workers reported {processed}",
            runs.len()
        ));
    }

    let counts = store.counts(DEFAULT_QUEUE).await?;
    if counts.pending + counts.reserved + counts.failed > 0 {
        return Err(eyre!("jobs left in the queue: {counts:?}"));
    }

    Ok(StressReport { processed, elapsed })
}

impl StressReport {
    pub fn rate(&self) -> u64 {
        let millis = self.elapsed.as_millis().max(1) as u64;
        self.processed as u64 * 1000 / millis
    }
}
