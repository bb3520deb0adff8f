//! Job ledger queries.
//!
//! Every state change is a conditional update: transitions name the status
//! they expect and, for claimed work, the worker holding the claim. A worker
//! whose claim was lost or whose job moved on gets `Error::Conflict` instead
//! of overwriting the newer state.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use stemforged_common::{
    CollectionInfo, Error, JobId, JobSource, JobStatus, PipelineSettings, Result, Stage,
};

use crate::models::{format_ts, parse_json, parse_opt_ts, parse_text, parse_ts, Job};

const COLS: &str = "id, filename, original_filename, status, source, settings, collection, \
    metadata_retries, separation_retries, packaging_retries, error, last_error, output_path, \
    claimed_by, claimed_at, not_before, created_at, updated_at, completed_at";

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let collection: Option<String> = row.get(6)?;
    Ok(Job {
        id: parse_text(0, &row.get::<_, String>(0)?)?,
        filename: row.get(1)?,
        original_filename: row.get(2)?,
        status: parse_text(3, &row.get::<_, String>(3)?)?,
        source: parse_text(4, &row.get::<_, String>(4)?)?,
        settings: parse_json(5, &row.get::<_, String>(5)?)?,
        collection: collection.map(|c| parse_json(6, &c)).transpose()?,
        metadata_retries: row.get(7)?,
        separation_retries: row.get(8)?,
        packaging_retries: row.get(9)?,
        error: row.get(10)?,
        last_error: row.get(11)?,
        output_path: row.get(12)?,
        claimed_by: row.get(13)?,
        claimed_at: parse_opt_ts(14, row.get(14)?)?,
        not_before: parse_opt_ts(15, row.get(15)?)?,
        created_at: parse_ts(16, &row.get::<_, String>(16)?)?,
        updated_at: parse_ts(17, &row.get::<_, String>(17)?)?,
        completed_at: parse_opt_ts(18, row.get(18)?)?,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn retries_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Metadata => "metadata_retries",
        Stage::Separation => "separation_retries",
        Stage::Packaging => "packaging_retries",
    }
}

/// Fields supplied by intake when a job is created.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub filename: String,
    pub original_filename: String,
    pub source: JobSource,
    pub settings: PipelineSettings,
    pub collection: Option<CollectionInfo>,
}

/// Insert a new job in `waiting` status.
pub fn create_job(conn: &Connection, new: &NewJob) -> Result<Job> {
    let now = format_ts(Utc::now());
    let settings = serde_json::to_string(&new.settings)
        .map_err(|e| Error::internal(format!("Failed to serialize settings: {}", e)))?;
    let collection = new
        .collection
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::internal(format!("Failed to serialize collection: {}", e)))?;

    conn.query_row(
        &format!(
            "INSERT INTO jobs (id, filename, original_filename, status, source, settings,
                               collection, created_at, updated_at)
             VALUES (:id, :filename, :original_filename, 'waiting', :source, :settings,
                     :collection, :now, :now)
             RETURNING {COLS}"
        ),
        rusqlite::named_params! {
            ":id": new.id.to_string(),
            ":filename": new.filename,
            ":original_filename": new.original_filename,
            ":source": new.source.as_str(),
            ":settings": settings,
            ":collection": collection,
            ":now": now,
        },
        job_from_row,
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::conflict(format!("Job for '{}' already exists", new.filename))
        } else {
            db_err(e)
        }
    })
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM jobs WHERE id = ?1"),
        [id.to_string()],
        job_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// List jobs newest first, optionally filtered by status.
pub fn list_jobs(
    conn: &Connection,
    status: Option<JobStatus>,
    limit: u32,
    offset: u32,
) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLS} FROM jobs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))
        .map_err(db_err)?;

    let rows = stmt
        .query_map(
            rusqlite::params![status.map(|s| s.as_str()), limit, offset],
            job_from_row,
        )
        .map_err(db_err)?;

    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Count jobs, optionally filtered by status.
pub fn count_jobs(conn: &Connection, status: Option<JobStatus>) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE (?1 IS NULL OR status = ?1)",
        [status.map(|s| s.as_str())],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n.max(0) as u64)
    .map_err(db_err)
}

/// Count jobs per status. Statuses with no jobs are reported as zero.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(JobStatus, u64)>> {
    let mut counts: Vec<(JobStatus, u64)> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(db_err)?;

    for row in rows {
        let (status, n) = row.map_err(db_err)?;
        if let Some(entry) = counts.iter_mut().find(|(s, _)| s.as_str() == status) {
            entry.1 = n.max(0) as u64;
        }
    }
    Ok(counts)
}

/// Claim the oldest eligible job in `status` for `worker`.
///
/// Eligible means unclaimed and past its `not_before` retry gate. The claim is
/// a single conditional UPDATE, so two workers racing for the same row cannot
/// both win.
pub fn claim_next(conn: &Connection, status: JobStatus, worker: &str) -> Result<Option<Job>> {
    let now = format_ts(Utc::now());
    conn.query_row(
        &format!(
            "UPDATE jobs SET claimed_by = :worker, claimed_at = :now, updated_at = :now
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = :status
                   AND claimed_by IS NULL
                   AND (not_before IS NULL OR not_before <= :now)
                 ORDER BY created_at, rowid
                 LIMIT 1
             )
             AND claimed_by IS NULL
             RETURNING {COLS}"
        ),
        rusqlite::named_params! {
            ":worker": worker,
            ":now": now,
            ":status": status.as_str(),
        },
        job_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Move a claimed job from `from` to the next status and release the claim.
///
/// `output_path` is recorded when given. Reaching `completed` stamps
/// `completed_at`.
pub fn advance_job(
    conn: &Connection,
    id: JobId,
    from: JobStatus,
    worker: &str,
    output_path: Option<&str>,
) -> Result<Job> {
    let to = from
        .next()
        .ok_or_else(|| Error::invalid_input(format!("No transition out of '{}'", from)))?;
    let now = format_ts(Utc::now());
    let completed_at = (to == JobStatus::Completed).then(|| now.clone());

    conn.query_row(
        &format!(
            "UPDATE jobs SET status = :to,
                    output_path = COALESCE(:output_path, output_path),
                    completed_at = COALESCE(:completed_at, completed_at),
                    last_error = NULL,
                    not_before = NULL,
                    claimed_by = NULL, claimed_at = NULL,
                    updated_at = :now
             WHERE id = :id AND status = :from AND claimed_by = :worker
             RETURNING {COLS}"
        ),
        rusqlite::named_params! {
            ":to": to.as_str(),
            ":output_path": output_path,
            ":completed_at": completed_at,
            ":now": now,
            ":id": id.to_string(),
            ":from": from.as_str(),
            ":worker": worker,
        },
        job_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| {
        Error::conflict(format!(
            "Job {} is not in '{}' or is not claimed by {}",
            id, from, worker
        ))
    })
}

/// Outcome of recording a transient stage failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The job stays in its status and becomes claimable after `not_before`.
    Retrying {
        attempt: u32,
        not_before: DateTime<Utc>,
    },
    /// The retry budget is spent; the job is now in `error`.
    Exhausted(Job),
}

/// Record a transient failure of `stage` for a claimed job.
///
/// `max_attempts` is the total number of attempts allowed. The failure that
/// uses the last attempt moves the job to `error`; earlier failures bump the
/// stage's retry count, release the claim and gate the next claim by
/// `retry_delay`.
pub fn record_stage_failure(
    conn: &Connection,
    id: JobId,
    stage: Stage,
    worker: &str,
    message: &str,
    max_attempts: u32,
    retry_delay: Duration,
) -> Result<FailureOutcome> {
    let tx = conn.unchecked_transaction().map_err(db_err)?;
    let job = get_job(&tx, id)?.ok_or_else(|| Error::not_found("Job"))?;

    if job.status != stage.input_status() || job.claimed_by.as_deref() != Some(worker) {
        return Err(Error::conflict(format!(
            "Job {} is not claimed by {} in '{}'",
            id,
            worker,
            stage.input_status()
        )));
    }

    let attempt = job.retries(stage) + 1;
    let now = Utc::now();
    let column = retries_column(stage);

    let outcome = if attempt >= max_attempts.max(1) {
        let failed = tx
            .query_row(
                &format!(
                    "UPDATE jobs SET status = 'error', {column} = :attempt,
                            error = :message, last_error = :message,
                            claimed_by = NULL, claimed_at = NULL, not_before = NULL,
                            updated_at = :now
                     WHERE id = :id
                     RETURNING {COLS}"
                ),
                rusqlite::named_params! {
                    ":attempt": attempt,
                    ":message": message,
                    ":now": format_ts(now),
                    ":id": id.to_string(),
                },
                job_from_row,
            )
            .map_err(db_err)?;
        FailureOutcome::Exhausted(failed)
    } else {
        let not_before = now + retry_delay;
        tx.execute(
            &format!(
                "UPDATE jobs SET {column} = :attempt, last_error = :message,
                        claimed_by = NULL, claimed_at = NULL, not_before = :not_before,
                        updated_at = :now
                 WHERE id = :id"
            ),
            rusqlite::named_params! {
                ":attempt": attempt,
                ":message": message,
                ":not_before": format_ts(not_before),
                ":now": format_ts(now),
                ":id": id.to_string(),
            },
        )
        .map_err(db_err)?;
        FailureOutcome::Retrying {
            attempt,
            not_before,
        }
    };

    tx.commit().map_err(db_err)?;
    Ok(outcome)
}

/// Move a job straight to `error` without touching retry counts.
///
/// With `worker` set, the job must be claimed by that worker. Jobs already in
/// a terminal status are left alone and reported as a conflict.
pub fn fail_job(conn: &Connection, id: JobId, worker: Option<&str>, message: &str) -> Result<Job> {
    let now = format_ts(Utc::now());
    conn.query_row(
        &format!(
            "UPDATE jobs SET status = 'error', error = :message,
                    claimed_by = NULL, claimed_at = NULL, not_before = NULL,
                    updated_at = :now
             WHERE id = :id
               AND status NOT IN ('completed', 'error')
               AND (:worker IS NULL OR claimed_by = :worker)
             RETURNING {COLS}"
        ),
        rusqlite::named_params! {
            ":message": message,
            ":now": now,
            ":id": id.to_string(),
            ":worker": worker,
        },
        job_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| Error::conflict(format!("Job {} cannot be failed", id)))
}

/// Give up a claim without changing status.
pub fn release_claim(conn: &Connection, id: JobId, worker: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE jobs SET claimed_by = NULL, claimed_at = NULL, updated_at = ?3
             WHERE id = ?1 AND claimed_by = ?2",
            rusqlite::params![id.to_string(), worker, format_ts(Utc::now())],
        )
        .map_err(db_err)?;
    Ok(changed > 0)
}

/// Release claims taken before `cutoff`. Returns the number released.
pub fn release_stale_claims(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "UPDATE jobs SET claimed_by = NULL, claimed_at = NULL, updated_at = ?2
         WHERE claimed_by IS NOT NULL AND claimed_at < ?1
           AND status NOT IN ('completed', 'error')",
        rusqlite::params![format_ts(cutoff), format_ts(Utc::now())],
    )
    .map_err(db_err)
}

/// Claim owner name for worker `name` of process instance `instance`.
pub fn worker_id(instance: &str, name: &str) -> String {
    format!("{}/{}", instance, name)
}

/// Release the claims held by workers of `instance`. Used at startup, when
/// none of that instance's workers can be running yet. Claims of other
/// instances sharing the ledger are left alone.
pub fn reset_orphaned_claims(conn: &Connection, instance: &str) -> Result<usize> {
    let prefix = worker_id(instance, "");
    conn.execute(
        "UPDATE jobs SET claimed_by = NULL, claimed_at = NULL, updated_at = ?2
         WHERE claimed_by IS NOT NULL
           AND substr(claimed_by, 1, length(?1)) = ?1",
        rusqlite::params![prefix, format_ts(Utc::now())],
    )
    .map_err(db_err)
}
