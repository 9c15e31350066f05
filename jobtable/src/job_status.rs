use std::{fmt::Display, str::FromStr};

use rusqlite::Row;
use time::OffsetDateTime;

use crate::{clock::from_timestamp, Error, Result};

/// The current state of a job, as seen by the reservation query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    /// The job is waiting to be reserved. It may not be available yet.
    Pending,
    /// A worker holds a reservation on the job. If attempts remain, the reservation may have
    /// expired and the job is waiting to be reserved again.
    Reserved,
    /// The job used up its attempts and failed, either with a recorded error or because the
    /// worker running its last attempt never finished. It is kept for inspection and will not
    /// run again.
    Failed,
}

impl JobState {
    /// Return a string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Reserved => "reserved",
            JobState::Failed => "failed",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "reserved" => Ok(JobState::Reserved),
            "failed" => Ok(JobState::Failed),
            _ => Err(Error::ColumnType(
                rusqlite::Error::InvalidColumnType(2, s.to_string(), rusqlite::types::Type::Text),
                "state",
            )),
        }
    }
}

/// A row of the jobs table.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The job's ID.
    pub id: i64,
    /// The queue that the job belongs to.
    pub queue: String,
    /// The derived state of the job.
    pub state: JobState,
    /// The encoded job.
    pub payload: String,
    /// The earliest time at which the job can be reserved.
    pub available_at: OffsetDateTime,
    /// When the job was reserved, if it is currently reserved.
    pub reserved_at: Option<OffsetDateTime>,
    /// How many times the job has been reserved.
    pub attempts: i32,
    /// The limit on the number of reservations.
    pub max_attempts: i32,
    /// Higher priority jobs are reserved first.
    pub priority: i32,
    /// The failure detail from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the job was added to the queue.
    pub created_at: OffsetDateTime,
    /// When the row last changed.
    pub updated_at: OffsetDateTime,
}

/// Rows that will never be reserved again: attempts are used up, and no live reservation is
/// still running the last one. Binds `$expired_before`.
pub(crate) const EXHAUSTED: &str =
    "attempts >= max_attempts AND (reserved_at = 0 OR reserved_at <= $expired_before)";

/// Columns to select for [JobRecord::from_row]. Binds `$expired_before`.
pub(crate) const RECORD_COLUMNS: &str = r##"id, queue,
    CASE
        WHEN attempts >= max_attempts AND (reserved_at = 0 OR reserved_at <= $expired_before)
            THEN 'failed'
        WHEN reserved_at != 0 THEN 'reserved'
        ELSE 'pending'
    END AS state,
    payload, available_at, reserved_at, attempts, max_attempts, priority, last_error,
    created_at, updated_at"##;

impl JobRecord {
    pub(crate) fn from_row(row: &Row) -> Result<JobRecord> {
        let reserved_at: i64 = row.get(5)?;
        let record = JobRecord {
            id: row.get(0).map_err(|e| Error::ColumnType(e, "id"))?,
            queue: row.get(1).map_err(|e| Error::ColumnType(e, "queue"))?,
            state: row
                .get_ref(2)?
                .as_str()
                .map_err(|e| Error::ColumnType(e.into(), "state"))?
                .parse()?,
            payload: row.get(3).map_err(|e| Error::ColumnType(e, "payload"))?,
            available_at: from_timestamp(row.get(4)?, "available_at")?,
            reserved_at: (reserved_at != 0)
                .then(|| from_timestamp(reserved_at, "reserved_at"))
                .transpose()?,
            attempts: row.get(6)?,
            max_attempts: row.get(7)?,
            priority: row.get(8)?,
            last_error: row.get(9).map_err(|e| Error::ColumnType(e, "last_error"))?,
            created_at: from_timestamp(row.get(10)?, "created_at")?,
            updated_at: from_timestamp(row.get(11)?, "updated_at")?,
        };

        Ok(record)
    }
}

/// Counts of the jobs in a queue, by state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    /// Jobs waiting to be reserved, including jobs that are not available yet.
    pub pending: u64,
    /// Jobs currently reserved by a worker, or with an expired reservation and attempts left.
    pub reserved: u64,
    /// Jobs that failed permanently, including jobs whose last attempt was abandoned.
    pub failed: u64,
}
