use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::ValueEnum;
use eyre::eyre;
use jobtable::{Job, JobRegistry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct DemoContext {
    /// How many times each tagged job ran.
    runs: Mutex<HashMap<u64, usize>>,
}

impl DemoContext {
    pub fn new() -> Arc<DemoContext> {
        Arc::new(DemoContext::default())
    }

    fn record_run(&self, tag: u64) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        *runs.entry(tag).or_default() += 1;
    }

    /// Tags that ran, with the number of times each one ran.
    pub fn runs(&self) -> HashMap<u64, usize> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Does nothing, except remember its tag if it has one.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Noop {
    #[serde(default)]
    pub tag: Option<u64>,
}

impl Job for Noop {
    const KIND: &'static str = "noop";
    type Context = Arc<DemoContext>;

    async fn run(&self, context: Arc<DemoContext>) -> eyre::Result<()> {
        if let Some(tag) = self.tag {
            context.record_run(tag);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Sleep {
    #[serde(default = "default_sleep_seconds")]
    pub seconds: u64,
}

fn default_sleep_seconds() -> u64 {
    1
}

impl Job for Sleep {
    const KIND: &'static str = "sleep";
    type Context = Arc<DemoContext>;

    async fn run(&self, _context: Arc<DemoContext>) -> eyre::Result<()> {
        tokio::time::sleep(Duration::from_secs(self.seconds)).await;
        Ok(())
    }
}

/// Always fails, so that retries and permanent failures can be tried out.
#[derive(Debug, Serialize, Deserialize)]
pub struct Fail {
    #[serde(default = "default_fail_message")]
    pub message: String,
}

fn default_fail_message() -> String {
    "failed on purpose".to_string()
}

impl Job for Fail {
    const KIND: &'static str = "fail";
    type Context = Arc<DemoContext>;

    async fn run(&self, _context: Arc<DemoContext>) -> eyre::Result<()> {
        Err(eyre!("{}", self.message))
    }
}

/// The job kinds that can be enqueued from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoKind {
    Noop,
    Sleep,
    Fail,
}

pub fn registry() -> JobRegistry<Arc<DemoContext>> {
    JobRegistry::new()
        .register::<Noop>()
        .register::<Sleep>()
        .register::<Fail>()
}
