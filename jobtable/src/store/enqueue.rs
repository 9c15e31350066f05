use rusqlite::{named_params, Connection};

use crate::{clock::delayed, Result};

pub(crate) struct NewJobRow {
    pub queue: String,
    pub payload: String,
    pub delay_seconds: i64,
    pub max_attempts: i32,
    pub priority: i32,
}

pub(crate) const INSERT_JOB_QUERY: &str = r##"
    INSERT INTO jobs
    (queue, payload, available_at, reserved_at, attempts, max_attempts, priority,
        last_error, created_at, updated_at)
    VALUES
    ($queue, $payload, $available_at, 0, 0, $max_attempts, $priority, NULL, $now, $now)
    RETURNING id
"##;

pub(crate) fn insert_job(tx: &Connection, now: i64, job: &NewJobRow) -> Result<i64> {
    let mut stmt = tx.prepare_cached(INSERT_JOB_QUERY)?;

    let id = stmt.query_row(
        named_params! {
            "$queue": job.queue,
            "$payload": job.payload,
            "$available_at": delayed(now, job.delay_seconds),
            "$max_attempts": job.max_attempts.max(1),
            "$priority": job.priority,
            "$now": now,
        },
        |row| row.get::<_, i64>(0),
    )?;

    Ok(id)
}
