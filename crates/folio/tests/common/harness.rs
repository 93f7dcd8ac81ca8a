//! Test harness for isolated publishing runs.
//!
//! `TestHarness` owns a temporary directory holding both the SQLite file and
//! the output root, one site with one blog, and a `Publisher` wired to a
//! renderer that lists what each output saw.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::TempDir;

use folio::content::{Blog, Page, TemplateType};
use folio::db::content_repo::{self, NewBlog, NewPage};
use folio::publish::{RenderContext, RenderError};
use folio::worker::{drive, RunSummary};
use folio::{ContentStore, Database, FileStorage, Publisher, Queue};

use super::builders::TemplateBuilder;

pub const BLOG_PATH: &str = "/site/blog";
pub const BLOG_URL: &str = "http://example.com/blog";

/// Renders "<body> page=<basename> pages=<a,b,c>", omitting empty parts.
pub fn listing(body: &str, context: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
    let mut out = body.to_string();
    if let Some(page) = context.page {
        out.push_str(&format!(" page={}", page.basename));
    }
    if !context.pages.is_empty() {
        let names: Vec<&str> = context.pages.iter().map(|p| p.basename.as_str()).collect();
        out.push_str(&format!(" pages={}", names.join(",")));
    }
    Ok(out.into_bytes())
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub blog: Blog,
    pub publisher: Publisher,
    pub output_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output_dir = temp_dir.path().join("out");
        let db = Database::open(&temp_dir.path().join("folio.db")).expect("Failed to open db");

        let site_id = content_repo::insert_site(&db, "Site", "http://example.com").unwrap();
        let blog_id = content_repo::insert_blog(
            &db,
            &NewBlog {
                site_id,
                name: "Blog".to_string(),
                url: BLOG_URL.to_string(),
                path: BLOG_PATH.to_string(),
                index_file: "index.html".to_string(),
            },
        )
        .unwrap();
        let blog = db.blog(blog_id).unwrap().unwrap();

        let publisher = Publisher::new(
            Queue::new(db.clone(), Default::default()),
            FileStorage::new(&output_dir),
            Arc::new(listing),
        );

        Self {
            temp_dir,
            db,
            blog,
            publisher,
            output_dir,
        }
    }

    pub fn queue(&self) -> &Queue {
        self.publisher.queue()
    }

    /// Inserts a template and its mappings; returns (template id, mapping ids).
    pub fn add_template(&self, builder: TemplateBuilder) -> (i64, Vec<i64>) {
        let template_id = content_repo::insert_template(&self.db, builder.template()).unwrap();
        let mapping_ids = builder
            .mappings(template_id)
            .iter()
            .map(|m| content_repo::insert_mapping(&self.db, m).unwrap())
            .collect();
        (template_id, mapping_ids)
    }

    pub fn template(&self, template_type: TemplateType, title: &str) -> TemplateBuilder {
        TemplateBuilder::new(self.blog.id, template_type, title)
    }

    pub fn add_page(&self, page: NewPage) -> Page {
        let id = content_repo::insert_page(&self.db, &page).unwrap();
        self.db.page(id).unwrap().unwrap()
    }

    /// Published pages, oldest first.
    pub fn blog_pages(&self) -> Vec<Page> {
        self.db.published_pages(self.blog.id).unwrap()
    }

    /// Drains the queue in batches of `batch_size`.
    pub fn run(&self, batch_size: usize) -> RunSummary {
        drive(
            &self.publisher,
            self.blog.owner(),
            batch_size,
            None,
            &AtomicBool::new(false),
        )
        .expect("drive failed")
    }

    /// Where a sitewide path lands under the output root.
    pub fn output_path(&self, sitewide: &str) -> PathBuf {
        self.publisher.storage().path_for(sitewide)
    }

    /// Contents of the output for a path relative to the blog root.
    pub fn read(&self, file_path: &str) -> Option<String> {
        let sitewide = format!("{}/{}", BLOG_PATH, file_path);
        std::fs::read_to_string(self.output_path(&sitewide)).ok()
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}
