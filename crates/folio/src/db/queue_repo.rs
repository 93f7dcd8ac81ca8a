//! Queue repository: row-level operations on the `queue` table.
//!
//! Functions take a `&Connection` so the queue can compose several of them
//! inside one transaction (see [`super::Database::with_tx`]).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw queue row.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub job_type: String,
    pub is_control: bool,
    pub priority: i32,
    pub data_integer: Option<i64>,
    pub data_string: Option<String>,
    pub touched_at: String,
    pub blog_id: i64,
    pub site_id: i64,
    pub status: String,
    pub claim_id: Option<String>,
    pub claimed_at: Option<String>,
    pub error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            is_control: row.get("is_control")?,
            priority: row.get("priority")?,
            data_integer: row.get("data_integer")?,
            data_string: row.get("data_string")?,
            touched_at: row.get("touched_at")?,
            blog_id: row.get("blog_id")?,
            site_id: row.get("site_id")?,
            status: row.get("status")?,
            claim_id: row.get("claim_id")?,
            claimed_at: row.get("claimed_at")?,
            error: row.get("error")?,
        })
    }
}

/// Processing order: priority, then Start before ordinary work before Stop,
/// then age.
const ORDER_BY: &str = "ORDER BY priority ASC,
    CASE job_type WHEN 'control_start' THEN 0 WHEN 'control_stop' THEN 2 ELSE 1 END ASC,
    touched_at ASC, id ASC";

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<QueueRow>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, QueueRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Inserts a row. `id` is ignored; the new id is returned.
pub fn insert(conn: &Connection, row: &QueueRow) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO queue (job_type, is_control, priority, data_integer, data_string,
         touched_at, blog_id, site_id, status, claim_id, claimed_at, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.job_type,
            row.is_control,
            row.priority,
            row.data_integer,
            row.data_string,
            row.touched_at,
            row.blog_id,
            row.site_id,
            row.status,
            row.claim_id,
            row.claimed_at,
            row.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<QueueRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM queue WHERE id = ?1",
            params![id],
            QueueRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// The pending ordinary row with the same coalescing key, if any.
pub fn find_pending_key(
    conn: &Connection,
    blog_id: i64,
    job_type: &str,
    data_integer: Option<i64>,
    data_string: Option<&str>,
) -> Result<Option<QueueRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM queue
             WHERE blog_id = ?1 AND job_type = ?2
               AND data_integer IS ?3 AND data_string IS ?4
               AND status = 'pending' AND is_control = 0",
            params![blog_id, job_type, data_integer, data_string],
            QueueRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Latest `touched_at` in the whole table.
pub fn latest_touch(conn: &Connection) -> Result<Option<String>, DatabaseError> {
    let latest: Option<String> =
        conn.query_row("SELECT MAX(touched_at) FROM queue", [], |r| r.get(0))?;
    Ok(latest)
}

pub fn touch(
    conn: &Connection,
    id: i64,
    priority: i32,
    touched_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE queue SET priority = ?2, touched_at = ?3 WHERE id = ?1",
        params![id, priority, touched_at],
    )?;
    Ok(())
}

/// Pending rows of a blog in processing order.
pub fn pending_ordered(
    conn: &Connection,
    blog_id: i64,
    limit: usize,
) -> Result<Vec<QueueRow>, DatabaseError> {
    query_rows(
        conn,
        &format!(
            "SELECT * FROM queue WHERE blog_id = ?1 AND status = 'pending' {} LIMIT ?2",
            ORDER_BY
        ),
        params![blog_id, limit as i64],
    )
}

pub fn count_pending_ordinary(conn: &Connection, blog_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM queue WHERE blog_id = ?1 AND status = 'pending' AND is_control = 0",
        params![blog_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Counts pending markers of `job_type`. `closing` selects markers whose
/// `data_string` equals it; `None` selects markers without one.
pub fn count_pending_markers(
    conn: &Connection,
    blog_id: i64,
    job_type: &str,
    closing: Option<&str>,
) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM queue
         WHERE blog_id = ?1 AND status = 'pending' AND job_type = ?2
           AND data_string IS ?3",
        params![blog_id, job_type, closing],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn delete_pending_markers(
    conn: &Connection,
    blog_id: i64,
    job_type: &str,
    closing: Option<&str>,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM queue
         WHERE blog_id = ?1 AND status = 'pending' AND job_type = ?2
           AND data_string IS ?3",
        params![blog_id, job_type, closing],
    )?;
    Ok(deleted)
}

/// Compare-and-swap `pending -> claimed`. Returns whether this call won.
pub fn claim(
    conn: &Connection,
    id: i64,
    claim_id: &str,
    claimed_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue SET status = 'claimed', claim_id = ?2, claimed_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        params![id, claim_id, claimed_at],
    )?;
    Ok(changed == 1)
}

/// Deletes a row still held by `claim_id`.
pub fn delete_claimed(conn: &Connection, id: i64, claim_id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM queue WHERE id = ?1 AND status = 'claimed' AND claim_id = ?2",
        params![id, claim_id],
    )?;
    Ok(changed == 1)
}

pub fn mark_failed(
    conn: &Connection,
    id: i64,
    claim_id: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue SET status = 'failed', error = ?3
         WHERE id = ?1 AND status = 'claimed' AND claim_id = ?2",
        params![id, claim_id, error],
    )?;
    Ok(changed == 1)
}

/// Puts a row back to pending with a fresh `touched_at`.
pub fn reset_to_pending(
    conn: &Connection,
    id: i64,
    touched_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE queue SET status = 'pending', claim_id = NULL, claimed_at = NULL, error = NULL,
         touched_at = ?2
         WHERE id = ?1",
        params![id, touched_at],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM queue WHERE id = ?1", params![id])?;
    Ok(())
}

/// Deletes every pending row of a blog, markers included.
pub fn delete_pending(conn: &Connection, blog_id: i64) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM queue WHERE blog_id = ?1 AND status = 'pending'",
        params![blog_id],
    )?;
    Ok(deleted)
}

/// Rows of a blog in processing order, optionally restricted by status and
/// to control markers.
pub fn list(
    conn: &Connection,
    blog_id: i64,
    status: Option<&str>,
    control_only: bool,
) -> Result<Vec<QueueRow>, DatabaseError> {
    let mut sql = String::from("SELECT * FROM queue WHERE blog_id = ?1 AND IFNULL(?2, status) = status");
    if control_only {
        sql.push_str(" AND is_control = 1");
    }
    sql.push(' ');
    sql.push_str(ORDER_BY);
    query_rows(conn, &sql, params![blog_id, status])
}

/// `(status, is_control, count)` triples for a blog.
pub fn counts(conn: &Connection, blog_id: i64) -> Result<Vec<(String, bool, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT status, is_control, COUNT(*) FROM queue WHERE blog_id = ?1
         GROUP BY status, is_control",
    )?;
    let rows = stmt
        .query_map(params![blog_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claimed rows whose claim predates `cutoff`.
pub fn claimed_before(
    conn: &Connection,
    blog_id: i64,
    cutoff: &str,
) -> Result<Vec<QueueRow>, DatabaseError> {
    query_rows(
        conn,
        "SELECT * FROM queue
         WHERE blog_id = ?1 AND status = 'claimed' AND claimed_at < ?2
         ORDER BY claimed_at, id",
        params![blog_id, cutoff],
    )
}
