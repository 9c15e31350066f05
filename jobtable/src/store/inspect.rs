use rusqlite::{named_params, Connection};

use crate::{
    job_status::{JobRecord, EXHAUSTED, RECORD_COLUMNS},
    Error, QueueCounts, Result,
};

/// Reservations made at or before `expired_before` are treated as abandoned.
pub(crate) fn get_record(
    conn: &Connection,
    job_id: i64,
    expired_before: i64,
) -> Result<JobRecord> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM jobs WHERE id = $job_id"
    ))?;

    let record = stmt
        .query_and_then(
            named_params! {
                "$job_id": job_id,
                "$expired_before": expired_before,
            },
            JobRecord::from_row,
        )?
        .next()
        .transpose()?;

    record.ok_or(Error::NotFound)
}

pub(crate) fn count_jobs(
    conn: &Connection,
    queue: &str,
    expired_before: i64,
) -> Result<QueueCounts> {
    let mut stmt = conn.prepare_cached(&format!(
        r##"SELECT
            COUNT(*) FILTER (WHERE reserved_at = 0 AND attempts < max_attempts),
            COUNT(*) FILTER (WHERE reserved_at != 0 AND NOT ({EXHAUSTED})),
            COUNT(*) FILTER (WHERE {EXHAUSTED})
        FROM jobs
        WHERE queue = $queue"##
    ))?;

    let (pending, reserved, failed): (i64, i64, i64) = stmt.query_row(
        named_params! {
            "$queue": queue,
            "$expired_before": expired_before,
        },
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(QueueCounts {
        pending: pending as u64,
        reserved: reserved as u64,
        failed: failed as u64,
    })
}

pub(crate) fn failed_jobs(
    conn: &Connection,
    queue: &str,
    limit: usize,
    expired_before: i64,
) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        r##"SELECT {RECORD_COLUMNS} FROM jobs
        WHERE queue = $queue AND {EXHAUSTED}
        ORDER BY updated_at DESC, id DESC
        LIMIT $limit"##
    ))?;

    let rows = stmt.query_and_then(
        named_params! {
            "$queue": queue,
            "$limit": i64::try_from(limit).unwrap_or(i64::MAX),
            "$expired_before": expired_before,
        },
        JobRecord::from_row,
    )?;

    rows.collect()
}

pub(crate) fn retry_failed(
    tx: &Connection,
    job_id: i64,
    now: i64,
    expired_before: i64,
) -> Result<()> {
    let mut stmt = tx.prepare_cached(&format!(
        r##"UPDATE jobs SET
            attempts = 0,
            reserved_at = 0,
            last_error = NULL,
            available_at = $now,
            updated_at = $now
            WHERE id = $job_id AND {EXHAUSTED}"##
    ))?;

    let altered = stmt.execute(named_params! {
        "$job_id": job_id,
        "$now": now,
        "$expired_before": expired_before,
    })?;

    if altered == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

pub(crate) fn forget(tx: &Connection, job_id: i64) -> Result<bool> {
    let mut stmt = tx.prepare_cached("DELETE FROM jobs WHERE id = ?")?;
    let altered = stmt.execute([job_id])?;
    Ok(altered > 0)
}
