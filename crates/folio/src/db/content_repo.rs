//! Content repository: reads for the publishing engine, plus the inserts and
//! edits external CRUD (and the test suite) performs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    conversion_error, format_timestamp, optional_timestamp_column, parsed_column,
    timestamp_column, Database, DatabaseError,
};
use crate::content::{
    ArchiveType, Author, Blog, Category, ContentStore, Page, PageStatus, PublishingMode, Site,
    Template, TemplateMapping, TemplateType,
};
use crate::path::{unique_basename, ArchiveKey};

fn site_from_row(row: &Row<'_>) -> Result<Site, rusqlite::Error> {
    Ok(Site {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
    })
}

fn blog_from_row(row: &Row<'_>) -> Result<Blog, rusqlite::Error> {
    Ok(Blog {
        id: row.get("id")?,
        site_id: row.get("site_id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        path: row.get("path")?,
        index_file: row.get("index_file")?,
    })
}

fn page_from_row(row: &Row<'_>) -> Result<Page, rusqlite::Error> {
    Ok(Page {
        id: row.get("id")?,
        blog_id: row.get("blog_id")?,
        title: row.get("title")?,
        basename: row.get("basename")?,
        status: parsed_column(row, "status")?,
        publication_date: optional_timestamp_column(row, "publication_date")?,
        author_id: row.get("author_id")?,
        primary_category_id: row.get("primary_category_id")?,
        text: row.get("text")?,
    })
}

fn template_from_row(row: &Row<'_>) -> Result<Template, rusqlite::Error> {
    Ok(Template {
        id: row.get("id")?,
        blog_id: row.get("blog_id")?,
        title: row.get("title")?,
        template_type: parsed_column(row, "template_type")?,
        body: row.get("body")?,
        publishing_mode: parsed_column(row, "publishing_mode")?,
    })
}

fn mapping_from_row(row: &Row<'_>) -> Result<TemplateMapping, rusqlite::Error> {
    let archive_type: i64 = row.get("archive_type")?;
    Ok(TemplateMapping {
        id: row.get("id")?,
        template_id: row.get("template_id")?,
        path_string: row.get("path_string")?,
        is_default: row.get("is_default")?,
        archive_type: ArchiveType::try_from(archive_type)
            .map_err(|e| conversion_error(row, "archive_type", e))?,
        modified_at: timestamp_column(row, "modified_at")?,
    })
}

fn category_from_row(row: &Row<'_>) -> Result<Category, rusqlite::Error> {
    Ok(Category {
        id: row.get("id")?,
        blog_id: row.get("blog_id")?,
        title: row.get("title")?,
        basename: row.get("basename")?,
    })
}

fn author_from_row(row: &Row<'_>) -> Result<Author, rusqlite::Error> {
    Ok(Author {
        id: row.get("id")?,
        name: row.get("name")?,
        basename: row.get("basename")?,
    })
}

fn find_one<T>(
    conn: &Connection,
    sql: &str,
    id: i64,
    map: fn(&Row<'_>) -> Result<T, rusqlite::Error>,
) -> Result<Option<T>, DatabaseError> {
    Ok(conn.query_row(sql, params![id], map).optional()?)
}

fn find_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> Result<T, rusqlite::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const PUBLISHED_ORDER: &str = "ORDER BY IFNULL(publication_date, ''), id";

impl ContentStore for Database {
    fn blog(&self, id: i64) -> Result<Option<Blog>, DatabaseError> {
        self.with_conn(|conn| find_one(conn, "SELECT * FROM blogs WHERE id = ?1", id, blog_from_row))
    }

    fn blogs(&self) -> Result<Vec<Blog>, DatabaseError> {
        self.with_conn(|conn| find_all(conn, "SELECT * FROM blogs ORDER BY id", [], blog_from_row))
    }

    fn page(&self, id: i64) -> Result<Option<Page>, DatabaseError> {
        self.with_conn(|conn| find_one(conn, "SELECT * FROM pages WHERE id = ?1", id, page_from_row))
    }

    fn published_pages(&self, blog_id: i64) -> Result<Vec<Page>, DatabaseError> {
        self.with_conn(|conn| {
            find_all(
                conn,
                &format!(
                    "SELECT * FROM pages WHERE blog_id = ?1 AND status = 'published' {}",
                    PUBLISHED_ORDER
                ),
                params![blog_id],
                page_from_row,
            )
        })
    }

    fn adjacent_pages(&self, page: &Page) -> Result<(Option<Page>, Option<Page>), DatabaseError> {
        let date = page
            .publication_date
            .map(|d| format_timestamp(&d))
            .unwrap_or_default();

        self.with_conn(|conn| {
            let previous = conn
                .query_row(
                    "SELECT * FROM pages
                     WHERE blog_id = ?1 AND status = 'published' AND id != ?3
                       AND (IFNULL(publication_date, ''), id) < (?2, ?3)
                     ORDER BY IFNULL(publication_date, '') DESC, id DESC LIMIT 1",
                    params![page.blog_id, date, page.id],
                    page_from_row,
                )
                .optional()?;
            let next = conn
                .query_row(
                    "SELECT * FROM pages
                     WHERE blog_id = ?1 AND status = 'published' AND id != ?3
                       AND (IFNULL(publication_date, ''), id) > (?2, ?3)
                     ORDER BY IFNULL(publication_date, '') ASC, id ASC LIMIT 1",
                    params![page.blog_id, date, page.id],
                    page_from_row,
                )
                .optional()?;
            Ok((previous, next))
        })
    }

    fn archive_pages(&self, blog_id: i64, key: &ArchiveKey) -> Result<Vec<Page>, DatabaseError> {
        let pages = self.published_pages(blog_id)?;
        Ok(pages.into_iter().filter(|p| key.matches(p)).collect())
    }

    fn template(&self, id: i64) -> Result<Option<Template>, DatabaseError> {
        self.with_conn(|conn| {
            find_one(conn, "SELECT * FROM templates WHERE id = ?1", id, template_from_row)
        })
    }

    fn templates(
        &self,
        blog_id: i64,
        template_type: TemplateType,
    ) -> Result<Vec<Template>, DatabaseError> {
        self.with_conn(|conn| {
            find_all(
                conn,
                "SELECT * FROM templates WHERE blog_id = ?1 AND template_type = ?2 ORDER BY id",
                params![blog_id, template_type.as_str()],
                template_from_row,
            )
        })
    }

    fn mapping(&self, id: i64) -> Result<Option<TemplateMapping>, DatabaseError> {
        self.with_conn(|conn| {
            find_one(
                conn,
                "SELECT * FROM template_mappings WHERE id = ?1",
                id,
                mapping_from_row,
            )
        })
    }

    fn mappings(&self, template_id: i64) -> Result<Vec<TemplateMapping>, DatabaseError> {
        self.with_conn(|conn| {
            find_all(
                conn,
                "SELECT * FROM template_mappings WHERE template_id = ?1
                 ORDER BY is_default DESC, id",
                params![template_id],
                mapping_from_row,
            )
        })
    }

    fn category(&self, id: i64) -> Result<Option<Category>, DatabaseError> {
        self.with_conn(|conn| {
            find_one(conn, "SELECT * FROM categories WHERE id = ?1", id, category_from_row)
        })
    }

    fn author(&self, id: i64) -> Result<Option<Author>, DatabaseError> {
        self.with_conn(|conn| find_one(conn, "SELECT * FROM authors WHERE id = ?1", id, author_from_row))
    }
}

pub fn site(db: &Database, id: i64) -> Result<Option<Site>, DatabaseError> {
    db.with_conn(|conn| find_one(conn, "SELECT * FROM sites WHERE id = ?1", id, site_from_row))
}

pub fn insert_site(db: &Database, name: &str, url: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sites (name, url) VALUES (?1, ?2)",
            params![name, url],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

#[derive(Debug, Clone)]
pub struct NewBlog {
    pub site_id: i64,
    pub name: String,
    pub url: String,
    pub path: String,
    pub index_file: String,
}

pub fn insert_blog(db: &Database, blog: &NewBlog) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO blogs (site_id, name, url, path, index_file) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![blog.site_id, blog.name, blog.url, blog.path, blog.index_file],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn insert_author(db: &Database, name: &str, basename: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO authors (name, basename) VALUES (?1, ?2)",
            params![name, basename],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn insert_category(
    db: &Database,
    blog_id: i64,
    title: &str,
    basename: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO categories (blog_id, title, basename) VALUES (?1, ?2, ?3)",
            params![blog_id, title, basename],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub blog_id: i64,
    pub title: String,
    pub basename: String,
    pub status: PageStatus,
    pub publication_date: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub primary_category_id: Option<i64>,
    pub text: String,
}

impl NewPage {
    /// An unpublished page whose title is its basename.
    pub fn draft(blog_id: i64, basename: &str) -> Self {
        Self {
            blog_id,
            title: basename.to_string(),
            basename: basename.to_string(),
            status: PageStatus::Draft,
            publication_date: None,
            author_id: None,
            primary_category_id: None,
            text: String::new(),
        }
    }

    pub fn published(blog_id: i64, basename: &str, publication_date: DateTime<Utc>) -> Self {
        Self {
            status: PageStatus::Published,
            publication_date: Some(publication_date),
            ..Self::draft(blog_id, basename)
        }
    }
}

pub fn insert_page(db: &Database, page: &NewPage) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pages (blog_id, title, basename, status, publication_date, author_id,
             primary_category_id, text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                page.blog_id,
                page.title,
                page.basename,
                page.status.as_str(),
                page.publication_date.map(|d| format_timestamp(&d)),
                page.author_id,
                page.primary_category_id,
                page.text,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Overwrites every editable column of a page.
pub fn update_page(db: &Database, page: &Page) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pages SET title = ?2, basename = ?3, status = ?4, publication_date = ?5,
             author_id = ?6, primary_category_id = ?7, text = ?8
             WHERE id = ?1",
            params![
                page.id,
                page.title,
                page.basename,
                page.status.as_str(),
                page.publication_date.map(|d| format_timestamp(&d)),
                page.author_id,
                page.primary_category_id,
                page.text,
            ],
        )?;
        Ok(())
    })
}

pub fn basename_taken(db: &Database, blog_id: i64, basename: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE blog_id = ?1 AND basename = ?2",
            params![blog_id, basename],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Allocates a basename for a new page of `blog_id`, derived from `title`.
pub fn allocate_page_basename(
    db: &Database,
    blog_id: i64,
    title: &str,
    max_len: usize,
) -> Result<String, DatabaseError> {
    unique_basename(title, max_len, |candidate| {
        basename_taken(db, blog_id, candidate)
    })
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub blog_id: i64,
    pub title: String,
    pub template_type: TemplateType,
    pub body: String,
    pub publishing_mode: PublishingMode,
}

pub fn insert_template(db: &Database, template: &NewTemplate) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO templates (blog_id, title, template_type, body, publishing_mode)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                template.blog_id,
                template.title,
                template.template_type.as_str(),
                template.body,
                template.publishing_mode.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn set_publishing_mode(
    db: &Database,
    template_id: i64,
    mode: PublishingMode,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE templates SET publishing_mode = ?2 WHERE id = ?1",
            params![template_id, mode.as_str()],
        )?;
        Ok(())
    })
}

#[derive(Debug, Clone)]
pub struct NewMapping {
    pub template_id: i64,
    pub path_string: String,
    pub is_default: bool,
    pub archive_type: ArchiveType,
}

pub fn insert_mapping(db: &Database, mapping: &NewMapping) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO template_mappings (template_id, path_string, is_default, archive_type,
             modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mapping.template_id,
                mapping.path_string,
                mapping.is_default,
                mapping.archive_type as i64,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Changes a mapping's pattern. Callers re-resolve dependent outputs through
/// [`crate::queue::actions::mapping_changed`].
pub fn update_mapping_pattern(
    db: &Database,
    mapping_id: i64,
    path_string: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE template_mappings SET path_string = ?2, modified_at = ?3 WHERE id = ?1",
            params![mapping_id, path_string, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    })
}
