use rusqlite::{named_params, Connection};
use tracing::{event, Level};

use crate::{clock::delayed, Result};

/// The maximum number of characters stored in `last_error`.
pub(crate) const MAX_ERROR_CHARS: usize = 10_000;

pub(crate) fn truncate_error(message: &str) -> &str {
    match message.char_indices().nth(MAX_ERROR_CHARS) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}

pub(crate) fn delete_job(tx: &Connection, job_id: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached("DELETE FROM jobs WHERE id = ?")?;
    let altered = stmt.execute([job_id])?;
    if altered == 0 {
        event!(Level::DEBUG, %job_id, "completed job was already deleted");
    }
    Ok(())
}

pub(crate) fn fail_job(tx: &Connection, job_id: i64, now: i64, error: &str) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        r##"UPDATE jobs SET
            reserved_at = 0,
            last_error = $error,
            updated_at = $now
            WHERE id = $job_id"##,
    )?;

    let altered = stmt.execute(named_params! {
        "$job_id": job_id,
        "$error": error,
        "$now": now,
    })?;
    if altered == 0 {
        event!(Level::WARN, %job_id, "failed job no longer exists");
    }
    Ok(())
}

pub(crate) fn release_job(tx: &Connection, job_id: i64, now: i64, delay_seconds: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        r##"UPDATE jobs SET
            reserved_at = 0,
            available_at = $available_at,
            updated_at = $now
            WHERE id = $job_id"##,
    )?;

    let altered = stmt.execute(named_params! {
        "$job_id": job_id,
        "$available_at": delayed(now, delay_seconds),
        "$now": now,
    })?;
    if altered == 0 {
        event!(Level::WARN, %job_id, "released job no longer exists");
    }
    Ok(())
}
