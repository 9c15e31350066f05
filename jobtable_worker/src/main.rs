use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use jobtable::{
    EnqueueOptions, Producer, RunOutcome, Store, Worker, WorkerOptions, DEFAULT_QUEUE,
};
use temp_dir::TempDir;
use tokio::sync::watch;
use tracing::{event, Level};
use tracing_subscriber::EnvFilter;

mod jobs;
mod stress;

use jobs::{DemoContext, DemoKind, Fail, Noop, Sleep};

#[derive(Parser, Debug)]
#[command(about = "Run and manage jobs in a jobtable database")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "JOBTABLE_DB", default_value = "jobtable.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reserve and run jobs from a queue
    Work(WorkArgs),
    /// Add one of the built-in demo jobs to a queue
    Enqueue(EnqueueArgs),
    /// List jobs that failed permanently
    Failed(FailedArgs),
    /// Give a failed job a fresh set of attempts
    Retry(RetryArgs),
    /// Run many workers against a temporary database and check that no job runs twice
    Stress(StressArgs),
}

#[derive(Args, Debug)]
struct WorkArgs {
    #[arg(long, default_value = DEFAULT_QUEUE)]
    queue: String,

    /// Run at most one job and exit
    #[arg(long)]
    once: bool,

    /// Stop after this many jobs succeed. 0 means no limit.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    max_jobs: i64,

    /// Seconds to wait when the queue is empty. 0 exits once the queue is drained.
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    sleep: i64,

    /// Seconds after which a reservation is considered abandoned
    #[arg(long, default_value_t = 90, allow_negative_numbers = true)]
    retry_after: i64,

    /// Seconds to wait before retrying a failed job
    #[arg(long, default_value_t = 30, allow_negative_numbers = true)]
    backoff: i64,
}

#[derive(Args, Debug)]
struct EnqueueArgs {
    kind: DemoKind,

    #[arg(long, default_value = DEFAULT_QUEUE)]
    queue: String,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    delay: i64,

    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    max_attempts: i32,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i32,

    /// The job's fields, as a JSON object
    #[arg(long, default_value = "{}")]
    payload: String,
}

#[derive(Args, Debug)]
struct FailedArgs {
    #[arg(long, default_value = DEFAULT_QUEUE)]
    queue: String,

    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Seconds after which a reservation is considered abandoned. A job whose last attempt was
    /// abandoned is listed as failed.
    #[arg(long, default_value_t = 90)]
    retry_after: u64,
}

#[derive(Args, Debug)]
struct RetryArgs {
    /// The id of the failed job
    id: i64,

    /// Seconds after which a reservation is considered abandoned
    #[arg(long, default_value_t = 90)]
    retry_after: u64,
}

#[derive(Args, Debug)]
struct StressArgs {
    #[arg(short, long, default_value_t = 10000)]
    num_jobs: usize,

    #[arg(long, default_value_t = 10)]
    num_workers: usize,

    #[arg(long, default_value_t = 10)]
    num_submit_tasks: usize,
}

fn once_summary(outcome: RunOutcome, queue: &str) -> String {
    match outcome {
        RunOutcome::Idle => "No job available.".to_string(),
        RunOutcome::Completed => format!("Processed 1 job(s) from queue {queue}"),
        RunOutcome::Failed => format!("Processed 0 job(s) from queue {queue}"),
    }
}

async fn work(store: &Store, args: WorkArgs) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            event!(Level::INFO, "received Ctrl-C, stopping after the current job");
            shutdown_tx.send(true).ok();
        }
    });

    let worker = Worker::builder(store, DemoContext::new())
        .registry(&jobs::registry())
        .shutdown_signal(shutdown_rx)
        .build();

    let options = WorkerOptions {
        queue: args.queue,
        max_jobs: args.max_jobs,
        sleep_seconds: args.sleep,
        retry_after_seconds: args.retry_after,
        backoff_seconds: args.backoff,
    };

    if args.once {
        let outcome = worker.run_next(&options).await?;
        println!("{}", once_summary(outcome, &options.queue));
    } else {
        let processed = worker.work(&options).await?;
        println!("Processed {processed} job(s) from queue {}", options.queue);
    }

    Ok(())
}

async fn enqueue(store: &Store, args: EnqueueArgs) -> Result<()> {
    let producer = Producer::new(store);
    let options = EnqueueOptions::new()
        .queue(args.queue)
        .delay_seconds(args.delay)
        .max_attempts(args.max_attempts)
        .priority(args.priority);

    let payload = args.payload.as_str();
    let id = match args.kind {
        DemoKind::Noop => {
            let job: Noop = serde_json::from_str(payload).wrap_err("parsing noop payload")?;
            producer.enqueue_with(&job, &options).await?
        }
        DemoKind::Sleep => {
            let job: Sleep = serde_json::from_str(payload).wrap_err("parsing sleep payload")?;
            producer.enqueue_with(&job, &options).await?
        }
        DemoKind::Fail => {
            let job: Fail = serde_json::from_str(payload).wrap_err("parsing fail payload")?;
            producer.enqueue_with(&job, &options).await?
        }
    };

    println!("Enqueued job {id} on queue {}", options.queue);
    Ok(())
}

async fn failed(store: &Store, args: FailedArgs) -> Result<()> {
    let jobs = store.failed_jobs(&args.queue, args.limit).await?;
    if jobs.is_empty() {
        println!("No failed jobs in queue {}", args.queue);
        return Ok(());
    }

    for job in jobs {
        println!(
            "{}\t{}/{}\t{}\t{}",
            job.id,
            job.attempts,
            job.max_attempts,
            job.updated_at,
            job.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn stress(args: StressArgs) -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("jobtable.db");

    let report = stress::run(
        &path,
        stress::StressOptions {
            num_jobs: args.num_jobs,
            num_workers: args.num_workers,
            num_submit_tasks: args.num_submit_tasks,
        },
    )
    .await?;

    println!(
        "Finished {} jobs in {:?} ({}/sec), each exactly once",
        report.processed,
        report.elapsed,
        report.rate()
    );
    Ok(())
}

async fn open_store(path: &Path) -> Result<Store> {
    Store::new(path)
        .await
        .wrap_err_with(|| format!("opening {}", path.display()))
}

async fn open_store_for_inspection(path: &Path, retry_after: u64) -> Result<Store> {
    Store::builder(path)
        .retry_after(Duration::from_secs(retry_after))
        .build()
        .await
        .wrap_err_with(|| format!("opening {}", path.display()))
}

async fn run() -> Result<()> {
    color_eyre::install()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Work(args) => work(&open_store(&cli.db).await?, args).await,
        Command::Enqueue(args) => enqueue(&open_store(&cli.db).await?, args).await,
        Command::Failed(args) => {
            let store = open_store_for_inspection(&cli.db, args.retry_after).await?;
            failed(&store, args).await
        }
        Command::Retry(args) => {
            let store = open_store_for_inspection(&cli.db, args.retry_after).await?;
            store.retry_failed(args.id).await?;
            println!("Job {} will be retried", args.id);
            Ok(())
        }
        Command::Stress(args) => stress(args).await,
    }
}

#[cfg(not(feature = "rt-multi-thread"))]
#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result<()> {
    run().await
}

#[cfg(feature = "rt-multi-thread")]
#[tokio::main(flavor = "multi_thread")]
pub async fn main() -> Result<()> {
    run().await
}
