use std::fmt::Debug;

use rusqlite::{named_params, Connection, OptionalExtension};

use crate::{clock::from_timestamp, job_registry::JobRegistry, QueueJob, Result};

/// A row claimed by [reserve_next], before its payload is decoded.
#[derive(Debug)]
pub(crate) struct ReservedRow {
    pub id: i64,
    pub queue: String,
    pub payload: String,
    pub available_at: i64,
    pub reserved_at: i64,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
}

impl ReservedRow {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Decode the payload into a [QueueJob].
    pub fn hydrate<CONTEXT>(&self, registry: &JobRegistry<CONTEXT>) -> Result<QueueJob<CONTEXT>>
    where
        CONTEXT: Send + Sync + Debug + Clone + 'static,
    {
        let job = registry.decode(&self.payload)?;

        Ok(QueueJob {
            id: self.id,
            queue: self.queue.clone(),
            job,
            available_at: from_timestamp(self.available_at, "available_at")?,
            reserved_at: (self.reserved_at != 0)
                .then(|| from_timestamp(self.reserved_at, "reserved_at"))
                .transpose()?,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error.clone(),
        })
    }
}

/// Claim the next eligible job in `queue`.
///
/// Selection and claim happen in one statement, and the caller holds the write lock for the
/// surrounding transaction, so two connections can never claim the same row.
pub(crate) fn reserve_next(
    tx: &Connection,
    queue: &str,
    now: i64,
    retry_after: i64,
) -> Result<Option<ReservedRow>> {
    let mut stmt = tx.prepare_cached(
        r##"UPDATE jobs
            SET attempts = attempts + 1,
                reserved_at = $now,
                updated_at = $now
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $queue
                    AND available_at <= $now
                    AND attempts < max_attempts
                    AND (reserved_at = 0 OR reserved_at <= $expired_before)
                ORDER BY priority DESC, available_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, queue, payload, available_at, reserved_at, attempts, max_attempts,
                last_error"##,
    )?;

    let row = stmt
        .query_row(
            named_params! {
                "$queue": queue,
                "$now": now,
                "$expired_before": now.saturating_sub(retry_after.max(0)),
            },
            |row| {
                Ok(ReservedRow {
                    id: row.get(0)?,
                    queue: row.get(1)?,
                    payload: row.get(2)?,
                    available_at: row.get(3)?,
                    reserved_at: row.get(4)?,
                    attempts: row.get(5)?,
                    max_attempts: row.get(6)?,
                    last_error: row.get(7)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}
