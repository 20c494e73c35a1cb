use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use tracing::info;

use crate::error::Error;
use crate::ids::DatasetId;
use crate::types::{ContentType, DatasetRow, JobRow, JobWithResult, LogKind, LogRow, ResultRow};

/// Durable store for jobs, results, logs and datasets.
///
/// A single SQLite connection behind a mutex; statements are short-lived and
/// the manager is the only writer.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        init_tables(&conn)?;

        // File permissions: 0o600 (owner-only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        info!("store opened at {:?}", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // --- Jobs ---

    pub fn add_job(&self, job: &JobRow) -> Result<(), Error> {
        self.conn.lock().execute(
            "INSERT INTO job (id, name, submitted, wasm_id, dataset_id, owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                job.name,
                job.submitted,
                job.wasm_hash,
                job.dataset_id,
                job.owner
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobWithResult>, Error> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{JOB_WITH_RESULT_SELECT} WHERE j.id = ?1"),
                params![id],
                job_with_result_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobWithResult>, Error> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("{JOB_WITH_RESULT_SELECT} ORDER BY j.submitted ASC"))?;
        let rows = stmt.query_map([], job_with_result_from_row)?;
        collect(rows)
    }

    pub fn delete_job(&self, id: &str) -> Result<bool, Error> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM job WHERE id = ?1", params![id])?;
        Ok(affected != 0)
    }

    /// Jobs that have no result row yet; these are restored as queued on boot.
    pub fn jobs_without_result(&self) -> Result<Vec<JobRow>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT j.id, j.name, j.submitted, j.wasm_id, j.dataset_id, j.owner
             FROM job j LEFT JOIN job_result r ON r.job_id = j.id
             WHERE r.job_id IS NULL
             ORDER BY j.submitted ASC",
        )?;
        let rows = stmt.query_map([], job_from_row)?;
        collect(rows)
    }

    // --- Results ---

    /// Insert the result row for a job. At most one per job; a second insert
    /// violates the primary key and fails.
    pub fn save_result(&self, result: &ResultRow) -> Result<(), Error> {
        self.conn.lock().execute(
            "INSERT INTO job_result (job_id, success, content, content_type, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.job_id,
                result.success,
                result.content,
                result.content_type,
                result.created
            ],
        )?;
        Ok(())
    }

    pub fn get_result(&self, job_id: &str) -> Result<Option<ResultRow>, Error> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT job_id, success, content, content_type, created
                 FROM job_result WHERE job_id = ?1",
                params![job_id],
                result_from_row,
            )
            .optional()?;
        Ok(row)
    }

    // --- Logs ---

    pub fn add_log(&self, log: &LogRow) -> Result<(), Error> {
        self.conn.lock().execute(
            "INSERT INTO log (kind, content, created, job_id) VALUES (?1, ?2, ?3, ?4)",
            params![log.kind, log.content, log.created, log.job_id],
        )?;
        Ok(())
    }

    /// Append a batch of log rows in one transaction, preserving order.
    pub fn add_logs(&self, logs: &[LogRow]) -> Result<(), Error> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO log (kind, content, created, job_id) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for log in logs {
                stmt.execute(params![log.kind, log.content, log.created, log.job_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent `limit` log rows for a job, oldest first.
    pub fn last_logs(&self, limit: u32, job_id: &str) -> Result<Vec<LogRow>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, created, content, job_id FROM log
             WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job_id, limit], log_from_row)?;
        let mut logs = collect(rows)?;
        logs.reverse();
        Ok(logs)
    }

    // --- Datasets ---

    /// Insert a dataset row. Idempotent by id; returns true when the row
    /// already existed.
    pub fn add_dataset(&self, dataset: &DatasetRow) -> Result<bool, Error> {
        let affected = self.conn.lock().execute(
            "INSERT OR IGNORE INTO dataset (id, name, size) VALUES (?1, ?2, ?3)",
            params![dataset.id, dataset.name, dataset.size],
        )?;
        Ok(affected == 0)
    }

    pub fn delete_dataset(&self, id: &DatasetId) -> Result<bool, Error> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM dataset WHERE id = ?1", params![id])?;
        Ok(affected != 0)
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetRow>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, size FROM dataset ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(DatasetRow {
                id: row.get(0)?,
                name: row.get(1)?,
                size: row.get(2)?,
            })
        })?;
        collect(rows)
    }
}

fn init_tables(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            submitted TEXT NOT NULL,
            wasm_id TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            owner TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS job_result (
            job_id TEXT PRIMARY KEY REFERENCES job(id) ON DELETE CASCADE,
            success INTEGER NOT NULL,
            content BLOB NOT NULL,
            content_type INTEGER NOT NULL,
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind INTEGER NOT NULL,
            content TEXT NOT NULL,
            created TEXT NOT NULL,
            job_id TEXT NOT NULL REFERENCES job(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_log_job ON log(job_id);

        CREATE TABLE IF NOT EXISTS dataset (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            size INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

const JOB_WITH_RESULT_SELECT: &str = "SELECT j.id, j.name, j.submitted, j.wasm_id, j.dataset_id, j.owner,
            r.success, r.content, r.content_type, r.created
     FROM job j LEFT JOIN job_result r ON r.job_id = j.id";

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        name: row.get(1)?,
        submitted: row.get(2)?,
        wasm_hash: row.get(3)?,
        dataset_id: row.get(4)?,
        owner: row.get(5)?,
    })
}

fn job_with_result_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobWithResult> {
    let job = job_from_row(row)?;
    let success: Option<bool> = row.get(6)?;
    let result = match success {
        Some(success) => Some(ResultRow {
            job_id: job.id.clone(),
            success,
            content: row.get(7)?,
            content_type: row.get(8)?,
            created: row.get(9)?,
        }),
        None => None,
    };
    Ok(JobWithResult { job, result })
}

fn result_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        job_id: row.get(0)?,
        success: row.get(1)?,
        content: row.get(2)?,
        content_type: row.get(3)?,
        created: row.get(4)?,
    })
}

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        kind: row.get(0)?,
        created: row.get(1)?,
        content: row.get(2)?,
        job_id: row.get(3)?,
    })
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, Error> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// SQL mappings for the enum columns.

impl ToSql for LogKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_u16() as i64))
    }
}

impl FromSql for LogKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = u16::column_result(value)?;
        LogKind::try_from(raw).map_err(|v| FromSqlError::OutOfRange(v as i64))
    }
}

impl ToSql for ContentType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_u16() as i64))
    }
}

impl FromSql for ContentType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = u16::column_result(value)?;
        ContentType::try_from(raw).map_err(|v| FromSqlError::OutOfRange(v as i64))
    }
}
