//! FileInfo repository: which content item currently owns which output path.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parsed_column, timestamp_column, Database, DatabaseError};
use crate::path::{ContentRef, ContextTag, ContextType, FileInfoLookup, ResolvedPath};

/// A materialized output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: i64,
    pub page_id: Option<i64>,
    pub template_mapping_id: i64,
    pub blog_id: i64,
    pub file_path: String,
    pub sitewide_file_path: String,
    pub url: String,
    pub context_signature: String,
    pub context_key: String,
    pub modified_at: DateTime<Utc>,
}

impl FileInfo {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            page_id: row.get("page_id")?,
            template_mapping_id: row.get("template_mapping_id")?,
            blog_id: row.get("blog_id")?,
            file_path: row.get("file_path")?,
            sitewide_file_path: row.get("sitewide_file_path")?,
            url: row.get("url")?,
            context_signature: row.get("context_signature")?,
            context_key: row.get("context_key")?,
            modified_at: timestamp_column(row, "modified_at")?,
        })
    }

    pub fn owner(&self) -> ContentRef {
        ContentRef {
            page_id: self.page_id,
            mapping_id: self.template_mapping_id,
        }
    }
}

/// Result of persisting a resolved path.
#[derive(Debug, Clone)]
pub struct SavedFileInfo {
    pub fileinfo: FileInfo,
    /// Rows of the same page and mapping at another path. Their files are
    /// orphaned; the caller removes each file, then its row.
    pub orphaned: Vec<FileInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<FileInfo>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, FileInfo::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn find_at(conn: &Connection, sitewide_file_path: &str) -> Result<Option<FileInfo>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM fileinfos WHERE sitewide_file_path = ?1",
            params![sitewide_file_path],
            FileInfo::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Records `resolved` as the current output of its owner.
///
/// For pages, any earlier row of the same (page, mapping) at a different path
/// is returned as orphaned. Those rows stay until their files are gone.
pub fn save(
    db: &Database,
    blog_id: i64,
    resolved: &ResolvedPath,
) -> Result<SavedFileInfo, DatabaseError> {
    let now = format_timestamp(&Utc::now());

    db.with_tx(|tx| {
        let mut orphaned = Vec::new();
        if let Some(page_id) = resolved.owner.page_id {
            orphaned = query_rows(
                tx,
                "SELECT * FROM fileinfos
                 WHERE page_id = ?1 AND template_mapping_id = ?2 AND sitewide_file_path != ?3",
                params![page_id, resolved.owner.mapping_id, resolved.sitewide_file_path],
            )?;
        }

        let id = match find_at(tx, &resolved.sitewide_file_path)? {
            Some(existing) => {
                tx.execute(
                    "UPDATE fileinfos SET page_id = ?2, template_mapping_id = ?3, file_path = ?4,
                     url = ?5, context_signature = ?6, context_key = ?7, modified_at = ?8
                     WHERE id = ?1",
                    params![
                        existing.id,
                        resolved.owner.page_id,
                        resolved.owner.mapping_id,
                        resolved.file_path,
                        resolved.url,
                        resolved.signature(),
                        resolved.context_key(),
                        now,
                    ],
                )?;
                existing.id
            }
            None => {
                tx.execute(
                    "INSERT INTO fileinfos (page_id, template_mapping_id, blog_id, file_path,
                     sitewide_file_path, url, context_signature, context_key, modified_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        resolved.owner.page_id,
                        resolved.owner.mapping_id,
                        blog_id,
                        resolved.file_path,
                        resolved.sitewide_file_path,
                        resolved.url,
                        resolved.signature(),
                        resolved.context_key(),
                        now,
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.execute(
            "DELETE FROM fileinfo_contexts WHERE fileinfo_id = ?1",
            params![id],
        )?;
        for tag in &resolved.context_tags {
            tx.execute(
                "INSERT INTO fileinfo_contexts (fileinfo_id, context_type, value, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, tag.context_type.as_str(), tag.value, tag.position as i64],
            )?;
        }

        let fileinfo = tx.query_row(
            "SELECT * FROM fileinfos WHERE id = ?1",
            params![id],
            FileInfo::from_row,
        )?;

        log::debug!(
            "Saved fileinfo #{} at {} ({} orphaned)",
            fileinfo.id,
            fileinfo.sitewide_file_path,
            orphaned.len()
        );

        Ok(SavedFileInfo { fileinfo, orphaned })
    })
}

pub fn find_by_sitewide_path(
    db: &Database,
    sitewide_file_path: &str,
) -> Result<Option<FileInfo>, DatabaseError> {
    db.with_conn(|conn| find_at(conn, sitewide_file_path))
}

pub fn for_page(db: &Database, page_id: i64) -> Result<Vec<FileInfo>, DatabaseError> {
    db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM fileinfos WHERE page_id = ?1 ORDER BY id",
            params![page_id],
        )
    })
}

pub fn for_mapping(db: &Database, mapping_id: i64) -> Result<Vec<FileInfo>, DatabaseError> {
    db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM fileinfos WHERE template_mapping_id = ?1 ORDER BY context_key, id",
            params![mapping_id],
        )
    })
}

pub fn for_blog(db: &Database, blog_id: i64) -> Result<Vec<FileInfo>, DatabaseError> {
    db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM fileinfos WHERE blog_id = ?1 ORDER BY file_path",
            params![blog_id],
        )
    })
}

/// The context tags recorded for a FileInfo, by position.
pub fn contexts(db: &Database, fileinfo_id: i64) -> Result<Vec<ContextTag>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT context_type, value, position FROM fileinfo_contexts
             WHERE fileinfo_id = ?1 ORDER BY position",
        )?;
        let tags = stmt
            .query_map(params![fileinfo_id], |row| {
                Ok(ContextTag {
                    context_type: parsed_column(row, "context_type")?,
                    value: row.get("value")?,
                    position: row.get::<_, i64>("position")? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    })
}

/// FileInfos of a mapping tagged with the given context value, e.g. every
/// archive output for year "2021".
pub fn with_context(
    db: &Database,
    mapping_id: i64,
    context_type: ContextType,
    value: &str,
) -> Result<Vec<FileInfo>, DatabaseError> {
    db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT f.* FROM fileinfos f
             JOIN fileinfo_contexts c ON c.fileinfo_id = f.id
             WHERE f.template_mapping_id = ?1 AND c.context_type = ?2 AND c.value = ?3
             ORDER BY f.context_key, f.id",
            params![mapping_id, context_type.as_str(), value],
        )
    })
}

/// The neighbouring output of the same mapping and context signature,
/// ordered by context key.
pub fn adjacent(
    db: &Database,
    fileinfo: &FileInfo,
    direction: Direction,
) -> Result<Option<FileInfo>, DatabaseError> {
    let sql = match direction {
        Direction::Next => {
            "SELECT * FROM fileinfos
             WHERE template_mapping_id = ?1 AND context_signature = ?2 AND context_key > ?3
             ORDER BY context_key ASC, id ASC LIMIT 1"
        }
        Direction::Previous => {
            "SELECT * FROM fileinfos
             WHERE template_mapping_id = ?1 AND context_signature = ?2 AND context_key < ?3
             ORDER BY context_key DESC, id DESC LIMIT 1"
        }
    };
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                sql,
                params![
                    fileinfo.template_mapping_id,
                    fileinfo.context_signature,
                    fileinfo.context_key
                ],
                FileInfo::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM fileinfos WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Replaces the pages listed by one archive output. An empty `page_ids`
/// forgets the archive.
pub fn record_archive_listing(
    db: &Database,
    mapping_id: i64,
    descriptor: &str,
    page_ids: &[i64],
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM archive_listings WHERE template_mapping_id = ?1 AND descriptor = ?2",
            params![mapping_id, descriptor],
        )?;
        for page_id in page_ids {
            tx.execute(
                "INSERT INTO archive_listings (template_mapping_id, descriptor, page_id)
                 VALUES (?1, ?2, ?3)",
                params![mapping_id, descriptor, page_id],
            )?;
        }
        Ok(())
    })
}

/// `(mapping id, archive descriptor)` of every archive output that last
/// listed the page.
pub fn listed_archives(db: &Database, page_id: i64) -> Result<Vec<(i64, String)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT template_mapping_id, descriptor FROM archive_listings
             WHERE page_id = ?1 ORDER BY template_mapping_id, descriptor",
        )?;
        let rows = stmt
            .query_map(params![page_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn clear_archive_listings(db: &Database, mapping_id: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM archive_listings WHERE template_mapping_id = ?1",
            params![mapping_id],
        )?;
        Ok(deleted)
    })
}

impl FileInfoLookup for Database {
    fn fileinfo_at(&self, sitewide_file_path: &str) -> Result<Option<FileInfo>, DatabaseError> {
        find_by_sitewide_path(self, sitewide_file_path)
    }
}
