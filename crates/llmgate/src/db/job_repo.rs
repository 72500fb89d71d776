//! Job repository — raw CRUD operations for the `jobs` table.
//!
//! Rows are plain strings here; decoding into domain types happens in
//! `jobs::store`. Status transitions are guarded in SQL so that a row can
//! only move `pending -> running -> fulfilled|failed`.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

const COLUMNS_WITH_RESULT: &str =
    "id, created_at, started_at, fulfilled_at, status, job_type, model, prompt, result, images_path";
const COLUMNS_WITHOUT_RESULT: &str =
    "id, created_at, started_at, fulfilled_at, status, job_type, model, prompt, images_path";

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub fulfilled_at: Option<String>,
    pub status: String,
    pub job_type: String,
    pub model: String,
    pub prompt: String,
    /// `None` either because the job has no result yet or because the
    /// projection omitted the column.
    pub result: Option<String>,
    /// JSON-encoded list of staged input paths.
    pub images_path: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>, with_result: bool) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            fulfilled_at: row.get("fulfilled_at")?,
            status: row.get("status")?,
            job_type: row.get("job_type")?,
            model: row.get("model")?,
            prompt: row.get("prompt")?,
            result: if with_result { row.get("result")? } else { None },
            images_path: row.get("images_path")?,
        })
    }
}

fn columns(with_result: bool) -> &'static str {
    if with_result {
        COLUMNS_WITH_RESULT
    } else {
        COLUMNS_WITHOUT_RESULT
    }
}

/// Inserts a new job row. Fails on a duplicate id.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, created_at, started_at, fulfilled_at, status, job_type,
             model, prompt, result, images_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.created_at,
                job.started_at,
                job.fulfilled_at,
                job.status,
                job.job_type,
                job.model,
                job.prompt,
                job.result,
                job.images_path,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID. The `result` column is only read when asked for.
pub fn find_by_id(
    db: &Database,
    id: &str,
    with_result: bool,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", columns(with_result));
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], |r| JobRow::from_row(r, with_result))?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Reads only the status column of a job.
pub fn find_status(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(status)) => Ok(Some(status)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns the most recent `limit` jobs, newest first.
pub fn list_recent(
    db: &Database,
    limit: u32,
    with_result: bool,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            columns(with_result)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit], |r| JobRow::from_row(r, with_result))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns all jobs with the given status, oldest first, without results.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
            COLUMNS_WITHOUT_RESULT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status], |r| JobRow::from_row(r, false))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a pending job to running. Returns `false` if the job was not pending.
pub fn mark_running(db: &Database, id: &str, started_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, started_at],
        )?;
        Ok(changed == 1)
    })
}

/// Writes the terminal status, result and `fulfilled_at` of a running job in
/// one statement. Returns `false` if the job was not running.
pub fn mark_finished(
    db: &Database,
    id: &str,
    status: &str,
    result: &str,
    fulfilled_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, result = ?3, fulfilled_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, status, result, fulfilled_at],
        )?;
        Ok(changed == 1)
    })
}

/// Fails every running job that started before `cutoff`. Returns the ids
/// that were moved.
pub fn fail_running_before(
    db: &Database,
    cutoff: &str,
    result: &str,
    fulfilled_at: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE jobs SET status = 'failed', result = ?2, fulfilled_at = ?3
             WHERE status = 'running' AND (started_at IS NULL OR started_at < ?1)
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(params![cutoff, result, fulfilled_at], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Counts jobs grouped by status.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}

/// Removes every job. Returns the number of deleted rows.
pub fn delete_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute("DELETE FROM jobs", [])?;
        Ok(deleted as u64)
    })
}
